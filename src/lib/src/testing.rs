//! Test fixtures: freshly generated P-256 factory chains laid out as a drive

use crate::drive::{KEY_SLOT_COUNT, SECURITY_DIR, SERIAL_FILE};
use crate::keys::RawPublicKey;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use std::fs;
use std::path::Path;
use time::OffsetDateTime;

pub(crate) struct FixtureCert {
    pub der: Vec<u8>,
    pub key: KeyPair,
}

impl FixtureCert {
    pub fn raw_key(&self) -> RawPublicKey {
        raw_key_of(&self.key)
    }
}

pub(crate) struct FixtureChain {
    pub root: FixtureCert,
    pub signer: FixtureCert,
    pub device: FixtureCert,
    pub device_not_before: OffsetDateTime,
}

pub(crate) fn raw_key_of(key: &KeyPair) -> RawPublicKey {
    // rcgen exposes the SEC1 point; drop the 0x04 prefix
    RawPublicKey::from_bytes("fixture", &key.public_key_raw()[1..]).unwrap()
}

fn params(common_name: &str, is_ca: IsCa) -> CertificateParams {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Microchip Technology Inc");

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.is_ca = is_ca;
    params
}

impl FixtureChain {
    pub fn generate() -> Self {
        let root_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let root_cert = params("Test Root CA", IsCa::Ca(BasicConstraints::Unconstrained))
            .self_signed(&root_key)
            .unwrap();

        let signer_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let signer_cert = params("Test Signer FFFF", IsCa::Ca(BasicConstraints::Constrained(0)))
            .signed_by(&signer_key, &root_cert, &root_key)
            .unwrap();

        let device_not_before = rcgen::date_time_ymd(2021, 3, 4);
        let device_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut device_params = params("sn0123EE", IsCa::NoCa);
        device_params.not_before = device_not_before;
        let device_cert = device_params
            .signed_by(&device_key, &signer_cert, &signer_key)
            .unwrap();

        Self {
            root: FixtureCert {
                der: root_cert.der().to_vec(),
                key: root_key,
            },
            signer: FixtureCert {
                der: signer_cert.der().to_vec(),
                key: signer_key,
            },
            device: FixtureCert {
                der: device_cert.der().to_vec(),
                key: device_key,
            },
            device_not_before,
        }
    }

    /// Lay the chain out the way the device exposes it, slot 0 holding the
    /// device key and slots 1..4 holding fresh keys
    pub fn write_drive(&self, root: &Path, serial: &str) {
        let sec = root.join(SECURITY_DIR);
        fs::create_dir_all(&sec).unwrap();

        fs::write(sec.join("rootCert.der"), &self.root.der).unwrap();
        fs::write(sec.join("signerCert.der"), &self.signer.der).unwrap();
        fs::write(sec.join("deviceCert.der"), &self.device.der).unwrap();
        fs::write(sec.join("root.key"), self.root.raw_key().as_bytes()).unwrap();
        fs::write(sec.join("signer.key"), self.signer.raw_key().as_bytes()).unwrap();
        fs::write(sec.join("device.key"), self.device.raw_key().as_bytes()).unwrap();

        fs::write(sec.join("slot0.key"), self.device.raw_key().as_bytes()).unwrap();
        for slot in 1..KEY_SLOT_COUNT {
            let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
            fs::write(
                sec.join(format!("slot{}.key", slot)),
                raw_key_of(&key).as_bytes(),
            )
            .unwrap();
        }

        fs::write(root.join(SERIAL_FILE), serial).unwrap();
    }
}
