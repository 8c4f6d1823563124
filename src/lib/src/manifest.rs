//! Device manifest entries
//!
//! A manifest entry is the JSON record an onboarding service consumes: who
//! made and provisioned the secure element, when, its unique ID, and the
//! public keys of its slots as JWKs. Member names and order follow the
//! Microchip manifest format.

use crate::chain::ValidatedChain;
use crate::drive::{MsdDrive, KEY_SLOT_COUNT};
use crate::error::ManifestError;
use crate::keys::RawPublicKey;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::OffsetDateTime;

/// Manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// Organization block used by manufacturer, provisioner and distributor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub organization_name: String,
    pub organizational_unit_name: String,
}

impl Organization {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            organization_name: name.into(),
            organizational_unit_name: unit.into(),
        }
    }
}

/// Fixed descriptive fields of a device family
///
/// Defaults describe an ATECC608A Trust&GO part sold through Microchip
/// Direct. A JSON file with the same member names can override any of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceProfile {
    pub model: String,
    pub part_number: String,
    pub manufacturer: Organization,
    pub provisioner: Organization,
    pub distributor: Organization,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            model: "ATECC608A".to_string(),
            part_number: "ATECC608A-TNGTLS".to_string(),
            manufacturer: Organization::new("Microchip Technology Inc", "Secure Products Group"),
            provisioner: Organization::new("Microchip Technology Inc", "Secure Products Group"),
            distributor: Organization::new("Microchip Technology Inc", "Microchip Direct"),
        }
    }
}

impl DeviceProfile {
    /// Load a profile from a JSON file; absent members keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ManifestError::file(path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_part_number(mut self, part_number: impl Into<String>) -> Self {
        self.part_number = part_number.into();
        self
    }

    pub fn with_distributor(mut self, distributor: Organization) -> Self {
        self.distributor = distributor;
        self
    }
}

/// EC public key in JWK form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    /// Standard base64 DER certificates, leaf first
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x5c: Option<Vec<String>>,
}

impl Jwk {
    pub fn for_slot(slot: u8, key: &RawPublicKey) -> Self {
        Self {
            kid: slot.to_string(),
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: key.x_b64url(),
            y: key.y_b64url(),
            x5c: None,
        }
    }

    pub fn with_x5c(mut self, chain: &[&[u8]]) -> Self {
        self.x5c = Some(
            chain
                .iter()
                .map(|der| base64::prelude::BASE64_STANDARD.encode(der))
                .collect(),
        );
        self
    }

    /// Decode `x`/`y` back into a raw key
    pub fn raw_public_key(&self) -> Result<RawPublicKey, ManifestError> {
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let mut raw = engine.decode(&self.x)?;
        raw.extend(engine.decode(&self.y)?);
        RawPublicKey::from_bytes(&format!("kid {}", self.kid), &raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeySet {
    pub keys: Vec<Jwk>,
}

/// The unsigned manifest entry for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub version: u32,
    pub model: String,
    pub part_number: String,
    pub manufacturer: Organization,
    pub provisioner: Organization,
    pub distributor: Organization,
    pub provisioning_timestamp: String,
    pub unique_id: String,
    pub public_key_set: PublicKeySet,
}

impl DeviceEntry {
    /// Assemble an entry from a validated chain and the slot keys
    ///
    /// `slot_keys[0]` gets the device and signer certificates as `x5c`.
    pub fn new(
        profile: &DeviceProfile,
        chain: &ValidatedChain,
        unique_id: impl Into<String>,
        slot_keys: &[RawPublicKey],
    ) -> Self {
        let keys = slot_keys
            .iter()
            .enumerate()
            .map(|(slot, key)| {
                let jwk = Jwk::for_slot(slot as u8, key);
                if slot == 0 {
                    jwk.with_x5c(&[chain.device.der.as_slice(), chain.signer.der.as_slice()])
                } else {
                    jwk
                }
            })
            .collect();

        Self {
            version: MANIFEST_VERSION,
            model: profile.model.clone(),
            part_number: profile.part_number.clone(),
            manufacturer: profile.manufacturer.clone(),
            provisioner: profile.provisioner.clone(),
            distributor: profile.distributor.clone(),
            provisioning_timestamp: format_timestamp(chain.device_not_before),
            unique_id: unique_id.into(),
            public_key_set: PublicKeySet { keys },
        }
    }

    /// Read the serial number and slot keys from the drive and assemble
    pub fn from_drive(
        drive: &MsdDrive,
        profile: &DeviceProfile,
        chain: &ValidatedChain,
    ) -> Result<Self, ManifestError> {
        let unique_id = drive.read_serial()?;
        log::info!("Device unique ID: {}", unique_id);

        let slot_keys = (0..KEY_SLOT_COUNT)
            .map(|slot| {
                log::debug!("Reading slot {} public key", slot);
                drive.read_slot_key(slot)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if slot_keys[0] != chain.device.public_key {
            log::warn!("Slot 0 public key differs from the device certificate key");
        }

        Ok(Self::new(profile, chain, unique_id, &slot_keys))
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` in UTC
pub fn format_timestamp(t: OffsetDateTime) -> String {
    let t = t.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second(),
        t.millisecond()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainInput, ValidatedChain};
    use crate::drive::ChainLevel;
    use crate::testing::FixtureChain;

    fn validated(chain: &FixtureChain) -> ValidatedChain {
        let input = |level, der: &Vec<u8>, key| ChainInput {
            level,
            certificate: der.clone(),
            public_key: key,
        };
        ValidatedChain::validate(
            &input(ChainLevel::Root, &chain.root.der, chain.root.raw_key()),
            &input(ChainLevel::Signer, &chain.signer.der, chain.signer.raw_key()),
            &input(ChainLevel::Device, &chain.device.der, chain.device.raw_key()),
        )
        .unwrap()
    }

    #[test]
    fn test_format_timestamp() {
        let t = rcgen::date_time_ymd(2021, 3, 4) + time::Duration::milliseconds(5_123);
        assert_eq!(format_timestamp(t), "2021-03-04T00:00:05.123Z");
    }

    #[test]
    fn test_format_timestamp_converts_to_utc() {
        let t = rcgen::date_time_ymd(2020, 12, 31)
            .to_offset(time::UtcOffset::from_hms(2, 0, 0).unwrap());
        assert_eq!(format_timestamp(t), "2020-12-31T00:00:00.000Z");
    }

    #[test]
    fn test_device_entry_from_chain() {
        let chain = FixtureChain::generate();
        let validated = validated(&chain);
        let slots: Vec<RawPublicKey> = (0..5).map(|_| chain.device.raw_key()).collect();

        let entry = DeviceEntry::new(&DeviceProfile::default(), &validated, "ABC 123", &slots);

        assert_eq!(entry.version, 1);
        assert_eq!(entry.unique_id, "ABC 123");
        assert_eq!(entry.provisioning_timestamp, "2021-03-04T00:00:00.000Z");
        assert_eq!(entry.public_key_set.keys.len(), 5);

        let slot0 = &entry.public_key_set.keys[0];
        assert_eq!(slot0.kid, "0");
        let x5c = slot0.x5c.as_ref().unwrap();
        assert_eq!(x5c.len(), 2);
        assert_eq!(
            base64::prelude::BASE64_STANDARD.decode(&x5c[0]).unwrap(),
            chain.device.der
        );
        assert_eq!(
            base64::prelude::BASE64_STANDARD.decode(&x5c[1]).unwrap(),
            chain.signer.der
        );
        assert!(entry.public_key_set.keys[1..].iter().all(|k| k.x5c.is_none()));
        assert_eq!(slot0.raw_public_key().unwrap(), chain.device.raw_key());
    }

    #[test]
    fn test_json_member_names_and_order() {
        let chain = FixtureChain::generate();
        let validated = validated(&chain);
        let slots = vec![chain.device.raw_key(), chain.signer.raw_key()];
        let entry = DeviceEntry::new(&DeviceProfile::default(), &validated, "sn", &slots);

        let json = serde_json::to_string(&entry).unwrap();
        let order = [
            "\"version\"",
            "\"model\"",
            "\"partNumber\"",
            "\"manufacturer\"",
            "\"provisioner\"",
            "\"distributor\"",
            "\"provisioningTimestamp\"",
            "\"uniqueId\"",
            "\"publicKeySet\"",
        ];
        let positions: Vec<usize> = order.iter().map(|m| json.find(m).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(json.contains("\"organizationalUnitName\":\"Microchip Direct\""));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["publicKeySet"]["keys"][1].get("x5c").is_none());
        assert_eq!(value["publicKeySet"]["keys"][1]["crv"], "P-256");
    }

    #[test]
    fn test_profile_partial_override() {
        let profile: DeviceProfile =
            serde_json::from_str(r#"{"model":"ATECC608B","partNumber":"ATECC608B-TNGTLS"}"#)
                .unwrap();
        assert_eq!(profile.model, "ATECC608B");
        assert_eq!(profile.part_number, "ATECC608B-TNGTLS");
        assert_eq!(profile.distributor, DeviceProfile::default().distributor);
    }

    #[test]
    fn test_profile_builder() {
        let profile = DeviceProfile::default()
            .with_model("ATECC608B")
            .with_part_number("ATECC608B-TFLXTLS")
            .with_distributor(Organization::new("Acme", "Resale"));
        assert_eq!(profile.model, "ATECC608B");
        assert_eq!(profile.distributor.organization_name, "Acme");
        assert_eq!(profile.manufacturer.organizational_unit_name, "Secure Products Group");
    }
}
