//! Signed device manifests for Trust&GO secure elements exposed as USB drives.
//!
//! The device publishes its factory certificate chain, raw slot public keys and
//! serial number as files. This crate validates the chain, builds the manifest
//! entry an onboarding service expects, and signs it with a separate log signer.

#![forbid(unsafe_code)]

mod error;

/// Factory certificate chain validation (root → signer → device)
pub mod chain;

/// File layout of the secure element mass-storage drive
pub mod drive;

/// Manifest file naming
pub mod filename;

/// Raw 64-byte P-256 public keys
pub mod keys;

/// Device manifest entries and the device profile
pub mod manifest;

/// Owner-only storage for the log signer private key
pub mod secure_file;

/// Manifest generation session
pub mod session;

/// Log signer and JWS envelope
pub mod signer;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::ValidatedChain;
pub use drive::{ChainLevel, MsdDrive};
pub use error::*;
pub use filename::{make_valid_filename, manifest_filename};
pub use keys::RawPublicKey;
pub use manifest::{DeviceEntry, DeviceProfile, Jwk, Organization};
pub use session::{ManifestOptions, ManifestOutput, ManifestSession};
pub use signer::{verify_manifest, LogSigner, SignedEntry, SignerConfig};

pub mod reexports {
    pub use {log, serde_json};
}
