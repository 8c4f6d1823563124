use std::path::PathBuf;

/// The manifest generator error type.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("Failed to access '{path}': {source}")]
    FileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("X509 error: {0}")]
    X509Error(String),

    #[error("Invalid raw public key in '{name}': expected 64 bytes, found {len}")]
    InvalidKeyLength { name: String, len: usize },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Public key of the {0} certificate does not match its raw key")]
    KeyMismatch(String),

    #[error("Verification error: {0}")]
    VerificationError(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Certificate generation error: {0}")]
    CertificateGenerationError(String),

    #[error("PEM error: {0}")]
    PemError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Base64 decoding error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid serial number: {0}")]
    InvalidSerial(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

impl ManifestError {
    /// Wrap an I/O error with the path that caused it
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManifestError::FileError {
            path: path.into(),
            source,
        }
    }
}

impl From<x509_parser::error::X509Error> for ManifestError {
    fn from(err: x509_parser::error::X509Error) -> Self {
        ManifestError::X509Error(format!("{:?}", err))
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for ManifestError {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        ManifestError::X509Error(format!("{:?}", err))
    }
}

impl From<pem::PemError> for ManifestError {
    fn from(err: pem::PemError) -> Self {
        ManifestError::PemError(err.to_string())
    }
}

impl From<rcgen::Error> for ManifestError {
    fn from(err: rcgen::Error) -> Self {
        ManifestError::CertificateGenerationError(err.to_string())
    }
}
