//! Secure element mass-storage drive layout
//!
//! The device exposes its provisioned identity as files on a USB mass-storage
//! drive. All paths are resolved with [`Path::join`] so the same layout works
//! whatever separator the host uses.

use crate::error::ManifestError;
use crate::keys::RawPublicKey;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding certificates and public keys
pub const SECURITY_DIR: &str = "sec";

/// Serial number file at the drive root
pub const SERIAL_FILE: &str = "serial.txt";

/// File name the log signer certificate is copied to on the drive
pub const LOG_SIGNER_CERT_FILE: &str = "manifest_signer.crt";

/// Number of conventional key slots exported by the device
pub const KEY_SLOT_COUNT: u8 = 5;

/// Level of the factory certificate chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLevel {
    Root,
    Signer,
    Device,
}

impl ChainLevel {
    pub fn name(&self) -> &'static str {
        match self {
            ChainLevel::Root => "root",
            ChainLevel::Signer => "signer",
            ChainLevel::Device => "device",
        }
    }

    fn certificate_file(&self) -> &'static str {
        match self {
            ChainLevel::Root => "rootCert.der",
            ChainLevel::Signer => "signerCert.der",
            ChainLevel::Device => "deviceCert.der",
        }
    }

    fn key_file(&self) -> &'static str {
        match self {
            ChainLevel::Root => "root.key",
            ChainLevel::Signer => "signer.key",
            ChainLevel::Device => "device.key",
        }
    }
}

impl std::fmt::Display for ChainLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A mounted secure element drive
#[derive(Debug, Clone)]
pub struct MsdDrive {
    root: PathBuf,
}

impl MsdDrive {
    /// Open a drive mounted at `root`
    ///
    /// Fails if `root` is not an existing directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|e| ManifestError::file(&root, e))?;
        if !metadata.is_dir() {
            return Err(ManifestError::file(
                &root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn certificate_path(&self, level: ChainLevel) -> PathBuf {
        self.root.join(SECURITY_DIR).join(level.certificate_file())
    }

    pub fn public_key_path(&self, level: ChainLevel) -> PathBuf {
        self.root.join(SECURITY_DIR).join(level.key_file())
    }

    pub fn slot_key_path(&self, slot: u8) -> PathBuf {
        self.root
            .join(SECURITY_DIR)
            .join(format!("slot{}.key", slot))
    }

    pub fn serial_path(&self) -> PathBuf {
        self.root.join(SERIAL_FILE)
    }

    pub fn log_signer_cert_path(&self) -> PathBuf {
        self.root.join(SECURITY_DIR).join(LOG_SIGNER_CERT_FILE)
    }

    /// DER certificate for a chain level
    pub fn read_certificate(&self, level: ChainLevel) -> Result<Vec<u8>, ManifestError> {
        read_file(&self.certificate_path(level))
    }

    /// Raw public key for a chain level
    pub fn read_public_key(&self, level: ChainLevel) -> Result<RawPublicKey, ManifestError> {
        let bytes = read_file(&self.public_key_path(level))?;
        RawPublicKey::from_bytes(level.key_file(), &bytes)
    }

    /// Raw public key exported for a key slot
    pub fn read_slot_key(&self, slot: u8) -> Result<RawPublicKey, ManifestError> {
        let path = self.slot_key_path(slot);
        let bytes = read_file(&path)?;
        RawPublicKey::from_bytes(&format!("slot{}.key", slot), &bytes)
    }

    /// Device serial number with line endings stripped
    pub fn read_serial(&self) -> Result<String, ManifestError> {
        let path = self.serial_path();
        let bytes = read_file(&path)?;
        let serial = String::from_utf8(bytes).map_err(|e| {
            ManifestError::file(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        let serial = serial.trim_end_matches(['\r', '\n']);
        if serial.is_empty() {
            return Err(ManifestError::InvalidSerial(format!(
                "'{}' is empty",
                path.display()
            )));
        }
        Ok(serial.to_string())
    }

    /// Write a file at the drive root
    pub fn write_root_file(&self, name: &str, data: &[u8]) -> Result<PathBuf, ManifestError> {
        let path = self.root.join(name);
        write_file(&path, data)?;
        Ok(path)
    }

    /// Place the log signer certificate next to the device certificates
    pub fn install_log_signer_cert(&self, pem: &str) -> Result<PathBuf, ManifestError> {
        let path = self.log_signer_cert_path();
        write_file(&path, pem.as_bytes())?;
        Ok(path)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ManifestError> {
    log::debug!("Reading {}", path.display());
    fs::read(path).map_err(|e| ManifestError::file(path, e))
}

pub(crate) fn write_file(path: &Path, data: &[u8]) -> Result<(), ManifestError> {
    log::debug!("Writing {} ({} bytes)", path.display(), data.len());
    fs::write(path, data).map_err(|e| ManifestError::file(path, e))
}
