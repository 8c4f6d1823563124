//! Raw P-256 public keys as the secure element exports them
//!
//! The ATECC608 reports public keys as 64 bytes: the big-endian X coordinate
//! followed by the big-endian Y coordinate, without the SEC1 `0x04` prefix.

use crate::error::ManifestError;
use base64::Engine;
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::EncodePublicKey;
use p256::{EncodedPoint, FieldBytes};

/// Length of a raw X‖Y public key
pub const RAW_PUBLIC_KEY_LEN: usize = 64;

const COORDINATE_LEN: usize = RAW_PUBLIC_KEY_LEN / 2;

/// An uncompressed P-256 point in secure element layout
#[derive(Clone, PartialEq, Eq)]
pub struct RawPublicKey([u8; RAW_PUBLIC_KEY_LEN]);

impl RawPublicKey {
    /// Wrap raw key bytes; `name` only labels the error
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, ManifestError> {
        let raw: [u8; RAW_PUBLIC_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| ManifestError::InvalidKeyLength {
                    name: name.to_string(),
                    len: bytes.len(),
                })?;
        Ok(Self(raw))
    }

    /// Build from a SEC1 point (`0x04 || X || Y`)
    pub fn from_encoded_point(point: &EncodedPoint) -> Result<Self, ManifestError> {
        match (point.x(), point.y()) {
            (Some(x), Some(y)) => {
                let mut raw = [0u8; RAW_PUBLIC_KEY_LEN];
                raw[..COORDINATE_LEN].copy_from_slice(x);
                raw[COORDINATE_LEN..].copy_from_slice(y);
                Ok(Self(raw))
            }
            _ => Err(ManifestError::InvalidPublicKey(
                "point is not uncompressed".to_string(),
            )),
        }
    }

    pub fn x(&self) -> &[u8] {
        &self.0[..COORDINATE_LEN]
    }

    pub fn y(&self) -> &[u8] {
        &self.0[COORDINATE_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Reconstruct the curve point; fails if it is not on P-256
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, ManifestError> {
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(self.x()),
            FieldBytes::from_slice(self.y()),
            false,
        );
        VerifyingKey::from_encoded_point(&point)
            .map_err(|e| ManifestError::InvalidPublicKey(format!("not a P-256 point: {}", e)))
    }

    /// DER SubjectPublicKeyInfo (id-ecPublicKey, prime256v1)
    pub fn to_spki_der(&self) -> Result<Vec<u8>, ManifestError> {
        let key = self.to_verifying_key()?;
        key.to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| ManifestError::InvalidPublicKey(format!("SPKI encoding failed: {}", e)))
    }

    /// PEM SubjectPublicKeyInfo, for logging
    pub fn to_spki_pem(&self) -> Result<String, ManifestError> {
        let der = self.to_spki_der()?;
        Ok(pem::encode(&pem::Pem::new("PUBLIC KEY", der)))
    }

    /// JWK `x` member
    pub fn x_b64url(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.x())
    }

    /// JWK `y` member
    pub fn y_b64url(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.y())
    }
}

impl std::fmt::Debug for RawPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawPublicKey({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;

    fn random_raw() -> (SigningKey, RawPublicKey) {
        let sk = SigningKey::random(&mut rand_core::OsRng);
        let point = sk.verifying_key().to_encoded_point(false);
        let raw = RawPublicKey::from_encoded_point(&point).unwrap();
        (sk, raw)
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = RawPublicKey::from_bytes("slot1", &[0u8; 65]).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::InvalidKeyLength { len: 65, .. }
        ));
        assert!(RawPublicKey::from_bytes("slot1", &[]).is_err());
    }

    #[test]
    fn test_rejects_point_off_curve() {
        let raw = RawPublicKey::from_bytes("device", &[0x01; 64]).unwrap();
        assert!(raw.to_verifying_key().is_err());
    }

    #[test]
    fn test_reconstructs_generated_key() {
        let (sk, raw) = random_raw();
        assert_eq!(&raw.to_verifying_key().unwrap(), sk.verifying_key());
    }

    #[test]
    fn test_spki_der_structure() {
        let (sk, raw) = random_raw();
        let der = raw.to_spki_der().unwrap();

        // SEQUENCE { SEQUENCE { ecPublicKey, prime256v1 }, BIT STRING (0x00 0x04 X Y) }
        assert_eq!(der.len(), 91);
        assert_eq!(der[0], 0x30);
        assert_eq!(
            der,
            sk.verifying_key().to_public_key_der().unwrap().as_bytes()
        );
        assert_eq!(&der[der.len() - 64..], raw.as_bytes());
    }

    #[test]
    fn test_jwk_coordinates_are_unpadded_base64url() {
        let raw = RawPublicKey::from_bytes("slot0", &[0xff; 64]).unwrap();
        // 32 bytes -> 43 chars without padding
        assert_eq!(raw.x_b64url().len(), 43);
        assert!(!raw.x_b64url().contains('='));
        assert!(raw.y_b64url().starts_with("__"));
    }

    #[test]
    fn test_spki_pem() {
        let (_, raw) = random_raw();
        let pem = raw.to_spki_pem().unwrap();
        assert!(pem.contains("-----BEGIN PUBLIC KEY-----"));
    }
}
