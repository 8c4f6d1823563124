/// Factory certificate chain validation
///
/// The secure element ships three certificates (root, signer, device) and,
/// separately, the raw public key of each. Validation is purely
/// cryptographic:
///
/// ```text
/// root.key   ──must equal──▶ rootCert.der SPKI     root   signed by root
/// signer.key ──must equal──▶ signerCert.der SPKI   signer signed by root
/// device.key ──must equal──▶ deviceCert.der SPKI   device signed by signer
/// ```
///
/// Validity dates, extensions and names are not checked. A factory chain can
/// legitimately carry dates that are meaningless to the host clock.

use crate::drive::{ChainLevel, MsdDrive};
use crate::error::ManifestError;
use crate::keys::RawPublicKey;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::oid_registry::{
    OID_SIG_ECDSA_WITH_SHA256, OID_SIG_ECDSA_WITH_SHA384, OID_SIG_ECDSA_WITH_SHA512,
};
use x509_parser::prelude::FromDer;

/// Certificate and raw key as read from the drive, before validation
#[derive(Debug, Clone)]
pub struct ChainInput {
    pub level: ChainLevel,
    pub certificate: Vec<u8>,
    pub public_key: RawPublicKey,
}

impl ChainInput {
    pub fn read(drive: &MsdDrive, level: ChainLevel) -> Result<Self, ManifestError> {
        Ok(Self {
            level,
            certificate: drive.read_certificate(level)?,
            public_key: drive.read_public_key(level)?,
        })
    }
}

/// A certificate whose key and signature have been checked
#[derive(Debug, Clone)]
pub struct ValidatedCertificate {
    pub level: ChainLevel,
    /// DER-encoded certificate
    pub der: Vec<u8>,
    pub public_key: RawPublicKey,
    pub common_name: Option<String>,
}

/// Root → signer → device, all links verified
#[derive(Debug, Clone)]
pub struct ValidatedChain {
    pub root: ValidatedCertificate,
    pub signer: ValidatedCertificate,
    pub device: ValidatedCertificate,
    /// Start of the device certificate validity period
    pub device_not_before: OffsetDateTime,
}

impl ValidatedChain {
    /// Read all three levels from the drive and validate them
    pub fn from_drive(drive: &MsdDrive) -> Result<Self, ManifestError> {
        let root = ChainInput::read(drive, ChainLevel::Root)?;
        let signer = ChainInput::read(drive, ChainLevel::Signer)?;
        let device = ChainInput::read(drive, ChainLevel::Device)?;
        Self::validate(&root, &signer, &device)
    }

    pub fn validate(
        root: &ChainInput,
        signer: &ChainInput,
        device: &ChainInput,
    ) -> Result<Self, ManifestError> {
        let root_cert = parse_certificate(root.level, &root.certificate)?;
        let root_key = check_public_key(root.level, &root_cert, &root.public_key)?;
        verify_signature(root.level, &root_cert, &root_key)?;
        log::info!("Validated {} certificate", root.level);

        let signer_cert = parse_certificate(signer.level, &signer.certificate)?;
        let signer_key = check_public_key(signer.level, &signer_cert, &signer.public_key)?;
        verify_signature(signer.level, &signer_cert, &root_key)?;
        log::info!("Validated {} certificate", signer.level);

        let device_cert = parse_certificate(device.level, &device.certificate)?;
        check_public_key(device.level, &device_cert, &device.public_key)?;
        verify_signature(device.level, &device_cert, &signer_key)?;
        log::info!("Validated {} certificate", device.level);

        let device_not_before = device_cert.validity().not_before.to_datetime();

        Ok(Self {
            root: validated(root, &root_cert),
            signer: validated(signer, &signer_cert),
            device: validated(device, &device_cert),
            device_not_before,
        })
    }
}

fn validated(input: &ChainInput, cert: &X509Certificate<'_>) -> ValidatedCertificate {
    ValidatedCertificate {
        level: input.level,
        der: input.certificate.clone(),
        public_key: input.public_key.clone(),
        common_name: common_name(cert),
    }
}

/// Parse a DER certificate, labelling errors with its chain level
pub fn parse_certificate(
    level: ChainLevel,
    der: &[u8],
) -> Result<X509Certificate<'_>, ManifestError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        ManifestError::X509Error(format!("Invalid {} certificate: {:?}", level, e))
    })?;

    log::info!(
        "{} certificate: {}",
        level,
        common_name(&cert).as_deref().unwrap_or("<no common name>")
    );
    log::debug!("{}", pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec())));

    Ok(cert)
}

/// Subject common name, if any
pub fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

/// Require the raw key to encode to exactly the certificate's SPKI
///
/// Returns the reconstructed key for signature checks further down the chain.
pub fn check_public_key(
    level: ChainLevel,
    cert: &X509Certificate<'_>,
    raw: &RawPublicKey,
) -> Result<VerifyingKey, ManifestError> {
    let key = raw.to_verifying_key()?;
    let raw_spki = raw.to_spki_der()?;

    if cert.public_key().raw != raw_spki.as_slice() {
        return Err(ManifestError::KeyMismatch(level.to_string()));
    }

    log::debug!("{} public key:\n{}", level, raw.to_spki_pem()?);
    Ok(key)
}

/// Check a certificate signature against its issuer's key
///
/// The TBS bytes are hashed with the digest named by the certificate's own
/// signature algorithm, then verified as an ECDSA P-256 signature.
pub fn verify_signature(
    level: ChainLevel,
    cert: &X509Certificate<'_>,
    issuer_key: &VerifyingKey,
) -> Result<(), ManifestError> {
    let tbs: &[u8] = cert.tbs_certificate.as_ref();
    let algorithm = &cert.signature_algorithm.algorithm;

    let digest = if *algorithm == OID_SIG_ECDSA_WITH_SHA256 {
        Sha256::digest(tbs).to_vec()
    } else if *algorithm == OID_SIG_ECDSA_WITH_SHA384 {
        Sha384::digest(tbs).to_vec()
    } else if *algorithm == OID_SIG_ECDSA_WITH_SHA512 {
        Sha512::digest(tbs).to_vec()
    } else {
        return Err(ManifestError::UnsupportedAlgorithm(format!(
            "{} certificate is signed with {}",
            level, algorithm
        )));
    };

    let signature_bytes: &[u8] = &cert.signature_value.data;
    let signature = Signature::from_der(signature_bytes).map_err(|e| {
        ManifestError::VerificationError(format!(
            "{} certificate signature is malformed: {}",
            level, e
        ))
    })?;

    issuer_key.verify_prehash(&digest, &signature).map_err(|_| {
        ManifestError::VerificationError(format!(
            "{} certificate signature does not verify under its issuer key",
            level
        ))
    })
}
