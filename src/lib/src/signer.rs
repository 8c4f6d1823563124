/// Manifest signing with the log signer
///
/// Manifests are not signed by the device. A separate "log signer" key and
/// certificate attest that the entry was produced from a validated chain.
/// Each entry becomes a flattened JWS:
///
/// ```text
/// protected = b64url({"typ":"JWT","alg":"ES256","kid":<SKI>,"x5t#S256":<cert hash>})
/// payload   = b64url(<device entry JSON>)
/// signature = b64url(r || s)   over  protected "." payload
/// ```
///
/// The log signer certificate is also copied onto the device drive so the
/// onboarding service can be handed both together.

use crate::error::ManifestError;
use crate::keys::RawPublicKey;
use crate::manifest::DeviceEntry;
use crate::secure_file;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, IsCa, KeyUsagePurpose,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use time::{Duration as TimeDuration, OffsetDateTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::FromDer;

/// JWS algorithm of every signed entry
pub const JWS_ALGORITHM: &str = "ES256";

/// Default file name of the log signer private key
pub const DEFAULT_LOG_KEY_FILE: &str = "manifest_signer.key";

/// Default file name of the log signer certificate
pub const DEFAULT_LOG_CERT_FILE: &str = "manifest_signer.crt";

// RFC 7093 method 1 keeps the leftmost 160 bits
const DERIVED_KEY_ID_LEN: usize = 20;

fn b64url(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn decode_b64url(s: &str) -> Result<Vec<u8>, ManifestError> {
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)?)
}

/// Subject of a newly created log signer certificate
#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub organization: String,
    pub common_name: String,
    pub validity_days: u32,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            organization: "Example Inc".to_string(),
            common_name: "Example Manifest Signer".to_string(),
            validity_days: 365,
        }
    }
}

impl SignerConfig {
    pub fn new(organization: impl Into<String>, common_name: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }
}

/// The key and certificate that sign manifest entries
pub struct LogSigner {
    signing_key: SigningKey,
    /// DER-encoded certificate
    certificate: Vec<u8>,
    key_id: String,
    thumbprint: String,
}

impl std::fmt::Debug for LogSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSigner")
            .field("key_id", &self.key_id)
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

impl LogSigner {
    /// Pair a signing key with its certificate
    ///
    /// Fails unless the certificate's public key is the signing key's.
    pub fn new(signing_key: SigningKey, certificate: Vec<u8>) -> Result<Self, ManifestError> {
        let (_, cert) = X509Certificate::from_der(&certificate).map_err(|e| {
            ManifestError::X509Error(format!("Invalid log signer certificate: {:?}", e))
        })?;

        let expected = RawPublicKey::from_encoded_point(
            &signing_key.verifying_key().to_encoded_point(false),
        )?
        .to_spki_der()?;
        if cert.public_key().raw != expected.as_slice() {
            return Err(ManifestError::KeyMismatch("log signer".to_string()));
        }

        let key_id = b64url(&subject_key_identifier(&cert));
        let thumbprint = b64url(&Sha256::digest(&certificate));
        drop(cert);

        Ok(Self {
            signing_key,
            certificate,
            key_id,
            thumbprint,
        })
    }

    /// Generate a fresh P-256 key and a self-signed certificate for it
    pub fn create(config: &SignerConfig) -> Result<Self, ManifestError> {
        let signing_key = SigningKey::random(&mut rand_core::OsRng);
        log::info!("Created log signer key for '{}'", config.common_name);
        Self::self_signed(signing_key, config)
    }

    /// Issue a self-signed certificate for an existing key
    pub fn self_signed(signing_key: SigningKey, config: &SignerConfig) -> Result<Self, ManifestError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, &config.common_name);
        dn.push(DnType::OrganizationName, &config.organization);
        params.distinguished_name = dn;

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + TimeDuration::days(config.validity_days as i64);

        // CA form makes rcgen emit a subject key identifier
        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let rcgen_keypair = rcgen::KeyPair::from_pem(&private_key_pem(&signing_key)?)?;
        let certificate = params.self_signed(&rcgen_keypair)?.der().to_vec();

        log::info!(
            "Issued log signer certificate '{}' valid for {} days",
            config.common_name,
            config.validity_days
        );
        Self::new(signing_key, certificate)
    }

    /// Load a PEM private key (PKCS#8 or SEC1) and a PEM or DER certificate
    pub fn load(
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
    ) -> Result<Self, ManifestError> {
        let key_path = key_path.as_ref();
        let cert_path = cert_path.as_ref();

        let key_pem = secure_file::read_secure(key_path)?;
        let signing_key = parse_private_key(&key_pem)?;

        let cert_data =
            std::fs::read(cert_path).map_err(|e| ManifestError::file(cert_path, e))?;
        let certificate = certificate_der(&cert_data)?;

        let signer = Self::new(signing_key, certificate)?;
        log::info!(
            "Loaded log signer from '{}' (kid {})",
            cert_path.display(),
            signer.key_id
        );
        Ok(signer)
    }

    /// Load the log signer, creating what is missing
    ///
    /// With neither file present a new key and certificate are created and
    /// saved. A key without a certificate gets a fresh self-signed
    /// certificate; the key file is never rewritten. A certificate without
    /// its key is an error.
    pub fn load_or_create(
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        config: &SignerConfig,
    ) -> Result<Self, ManifestError> {
        let key_path = key_path.as_ref();
        let cert_path = cert_path.as_ref();

        match (key_path.exists(), cert_path.exists()) {
            (true, true) => Self::load(key_path, cert_path),
            (true, false) => {
                log::warn!(
                    "No log signer certificate at '{}', issuing one for the key in '{}'",
                    cert_path.display(),
                    key_path.display()
                );
                let signing_key = parse_private_key(&secure_file::read_secure(key_path)?)?;
                let signer = Self::self_signed(signing_key, config)?;
                signer.save_certificate(cert_path)?;
                Ok(signer)
            }
            (false, true) => Err(ManifestError::file(
                key_path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!(
                        "log signer key is missing but certificate '{}' exists",
                        cert_path.display()
                    ),
                ),
            )),
            (false, false) => {
                log::warn!(
                    "No log signer at '{}' / '{}', creating one",
                    key_path.display(),
                    cert_path.display()
                );
                let signer = Self::create(config)?;
                signer.save(key_path, cert_path)?;
                Ok(signer)
            }
        }
    }

    /// Write the key (owner-only) and certificate as PEM
    pub fn save(
        &self,
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
    ) -> Result<(), ManifestError> {
        secure_file::write_secure(key_path.as_ref(), private_key_pem(&self.signing_key)?.as_bytes())?;
        self.save_certificate(cert_path.as_ref())
    }

    fn save_certificate(&self, cert_path: &Path) -> Result<(), ManifestError> {
        std::fs::write(cert_path, self.certificate_pem())
            .map_err(|e| ManifestError::file(cert_path, e))
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn certificate_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.certificate.clone()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// base64url subject key identifier
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// base64url SHA-256 of the certificate DER
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn header(&self) -> JwsHeader {
        JwsHeader {
            typ: "JWT".to_string(),
            alg: JWS_ALGORITHM.to_string(),
            kid: self.key_id.clone(),
            x5t_s256: self.thumbprint.clone(),
        }
    }

    /// Sign one device entry
    pub fn sign_entry(&self, entry: &DeviceEntry) -> Result<SignedEntry, ManifestError> {
        let protected = b64url(&serde_json::to_vec(&self.header())?);
        let payload = b64url(&serde_json::to_vec(entry)?);

        let signing_input = format!("{}.{}", protected, payload);
        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());

        Ok(SignedEntry {
            payload,
            protected,
            header: UnprotectedHeader {
                unique_id: entry.unique_id.clone(),
            },
            signature: b64url(&signature.to_bytes()),
        })
    }
}

/// Protected JWS header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub typ: String,
    pub alg: String,
    pub kid: String,
    #[serde(rename = "x5t#S256")]
    pub x5t_s256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprotectedHeader {
    pub unique_id: String,
}

/// One signed manifest entry (flattened JWS JSON serialization)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEntry {
    pub payload: String,
    pub protected: String,
    pub header: UnprotectedHeader,
    pub signature: String,
}

impl SignedEntry {
    /// Decode the protected header
    pub fn decode_header(&self) -> Result<JwsHeader, ManifestError> {
        Ok(serde_json::from_slice(&decode_b64url(&self.protected)?)?)
    }

    /// Decode the payload without checking the signature
    pub fn decode_payload(&self) -> Result<DeviceEntry, ManifestError> {
        Ok(serde_json::from_slice(&decode_b64url(&self.payload)?)?)
    }

    /// Check the signature and return the device entry it covers
    pub fn verify(&self, key: &VerifyingKey) -> Result<DeviceEntry, ManifestError> {
        let header = self.decode_header()?;
        if header.alg != JWS_ALGORITHM {
            return Err(ManifestError::UnsupportedAlgorithm(format!(
                "JWS alg '{}'",
                header.alg
            )));
        }

        let signature = Signature::from_slice(&decode_b64url(&self.signature)?).map_err(|e| {
            ManifestError::VerificationError(format!("Malformed entry signature: {}", e))
        })?;

        let signing_input = format!("{}.{}", self.protected, self.payload);
        key.verify(signing_input.as_bytes(), &signature).map_err(|_| {
            ManifestError::VerificationError(format!(
                "Signature of entry '{}' does not verify",
                self.header.unique_id
            ))
        })?;

        let entry = self.decode_payload()?;
        if entry.unique_id != self.header.unique_id {
            return Err(ManifestError::InvalidManifest(format!(
                "unprotected uniqueId '{}' does not match payload '{}'",
                self.header.unique_id, entry.unique_id
            )));
        }
        Ok(entry)
    }
}

/// Serialize signed entries as a manifest file (2-space indented JSON array)
pub fn encode_manifest(entries: &[SignedEntry]) -> Result<Vec<u8>, ManifestError> {
    Ok(serde_json::to_vec_pretty(entries)?)
}

/// Verify every entry of a manifest file against a log signer certificate
///
/// `certificate` may be PEM or DER. Entries whose `x5t#S256` names a
/// different certificate are rejected.
pub fn verify_manifest(
    manifest: &[u8],
    certificate: &[u8],
) -> Result<Vec<DeviceEntry>, ManifestError> {
    let certificate = certificate_der(certificate)?;
    let (_, cert) = X509Certificate::from_der(&certificate).map_err(|e| {
        ManifestError::X509Error(format!("Invalid log signer certificate: {:?}", e))
    })?;
    let key = VerifyingKey::from_sec1_bytes(&cert.public_key().subject_public_key.data)
        .map_err(|e| ManifestError::InvalidPublicKey(format!("Log signer key: {}", e)))?;
    let thumbprint = b64url(&Sha256::digest(&certificate));

    let entries: Vec<SignedEntry> = serde_json::from_slice(manifest)?;
    if entries.is_empty() {
        return Err(ManifestError::InvalidManifest("no entries".to_string()));
    }

    entries
        .iter()
        .map(|entry| {
            let header = entry.decode_header()?;
            if header.x5t_s256 != thumbprint {
                return Err(ManifestError::VerificationError(format!(
                    "Entry '{}' was signed by a different certificate",
                    entry.header.unique_id
                )));
            }
            entry.verify(&key)
        })
        .collect()
}

/// Subject key identifier, or the RFC 7093 method 1 value when absent
fn subject_key_identifier(cert: &X509Certificate<'_>) -> Vec<u8> {
    let ski = cert
        .extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(kid) => Some(kid.0.to_vec()),
            _ => None,
        });

    ski.unwrap_or_else(|| {
        log::debug!("Log signer certificate has no subject key identifier, deriving one");
        let bits: &[u8] = &cert.public_key().subject_public_key.data;
        Sha256::digest(bits)[..DERIVED_KEY_ID_LEN].to_vec()
    })
}

fn private_key_pem(key: &SigningKey) -> Result<String, ManifestError> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| ManifestError::InvalidPrivateKey(e.to_string()))?;
    Ok(pem::encode(&pem::Pem::new("PRIVATE KEY", der.as_bytes().to_vec())))
}

fn parse_private_key(data: &[u8]) -> Result<SigningKey, ManifestError> {
    let pem = pem::parse(data)?;
    match pem.tag() {
        "PRIVATE KEY" => SigningKey::from_pkcs8_der(pem.contents())
            .map_err(|e| ManifestError::InvalidPrivateKey(e.to_string())),
        "EC PRIVATE KEY" => p256::SecretKey::from_sec1_der(pem.contents())
            .map(SigningKey::from)
            .map_err(|e| ManifestError::InvalidPrivateKey(e.to_string())),
        other => Err(ManifestError::InvalidPrivateKey(format!(
            "unexpected PEM label '{}'",
            other
        ))),
    }
}

/// Accept a certificate as PEM or raw DER
fn certificate_der(data: &[u8]) -> Result<Vec<u8>, ManifestError> {
    if data.starts_with(b"-----BEGIN") {
        let pem = pem::parse(data)?;
        if pem.tag() != "CERTIFICATE" {
            return Err(ManifestError::PemError(format!(
                "expected CERTIFICATE, found '{}'",
                pem.tag()
            )));
        }
        Ok(pem.into_contents())
    } else {
        Ok(data.to_vec())
    }
}
