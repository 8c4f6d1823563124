//! Manifest generation session
//!
//! Runs the whole flow for one mounted device:
//!
//! ```text
//! 1. Load the log signer (create it if missing and allowed)
//! 2. Copy the log signer certificate to <drive>/sec/manifest_signer.crt
//! 3. Read and validate root → signer → device from <drive>/sec
//! 4. Read serial.txt and slot0..slot4 public keys, build the entry
//! 5. Sign the entry and write <uniqueId>_manifest.json locally and on the drive
//! ```
//!
//! Every step is fatal on error. Re-running overwrites the same files.
//!
//! # Example
//!
//! ```no_run
//! use tng_manifest::{ManifestOptions, ManifestSession};
//!
//! let options = ManifestOptions::default().with_output_dir("manifests");
//! let output = ManifestSession::new("/media/CURIOSITY", options)?.run()?;
//! println!("Wrote {}", output.local_path.display());
//! # Ok::<(), tng_manifest::ManifestError>(())
//! ```

use crate::chain::ValidatedChain;
use crate::drive::{write_file, MsdDrive};
use crate::error::ManifestError;
use crate::filename::manifest_filename;
use crate::manifest::{DeviceEntry, DeviceProfile};
use crate::signer::{
    encode_manifest, LogSigner, SignerConfig, DEFAULT_LOG_CERT_FILE, DEFAULT_LOG_KEY_FILE,
};
use std::path::PathBuf;

/// Settings for a manifest session
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Log signer private key (PEM)
    pub log_key_path: PathBuf,
    /// Log signer certificate (PEM or DER)
    pub log_cert_path: PathBuf,
    /// Where the local copy of the manifest goes
    pub output_dir: PathBuf,
    pub profile: DeviceProfile,
    /// Subject used when a log signer has to be created
    pub signer_config: SignerConfig,
    /// Create a log signer when the key or certificate is missing
    pub create_signer: bool,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            log_key_path: PathBuf::from(DEFAULT_LOG_KEY_FILE),
            log_cert_path: PathBuf::from(DEFAULT_LOG_CERT_FILE),
            output_dir: PathBuf::from("."),
            profile: DeviceProfile::default(),
            signer_config: SignerConfig::default(),
            create_signer: true,
        }
    }
}

impl ManifestOptions {
    pub fn with_log_signer(
        mut self,
        key_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
    ) -> Self {
        self.log_key_path = key_path.into();
        self.log_cert_path = cert_path.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_signer_config(mut self, config: SignerConfig) -> Self {
        self.signer_config = config;
        self
    }

    pub fn with_create_signer(mut self, create: bool) -> Self {
        self.create_signer = create;
        self
    }
}

/// What a session produced
#[derive(Debug, Clone)]
pub struct ManifestOutput {
    /// `<sanitized uniqueId>_manifest.json`
    pub filename: String,
    pub local_path: PathBuf,
    pub drive_path: PathBuf,
    /// Manifest file contents
    pub manifest: Vec<u8>,
    pub entry: DeviceEntry,
}

/// One manifest run against one drive
#[derive(Debug)]
pub struct ManifestSession {
    drive: MsdDrive,
    options: ManifestOptions,
}

impl ManifestSession {
    pub fn new(drive_root: impl Into<PathBuf>, options: ManifestOptions) -> Result<Self, ManifestError> {
        let drive = MsdDrive::open(drive_root)?;
        Ok(Self { drive, options })
    }

    pub fn drive(&self) -> &MsdDrive {
        &self.drive
    }

    /// Obtain the log signer and install its certificate on the drive
    pub fn prepare_log_signer(&self) -> Result<LogSigner, ManifestError> {
        let opts = &self.options;
        let signer = if opts.create_signer {
            LogSigner::load_or_create(&opts.log_key_path, &opts.log_cert_path, &opts.signer_config)?
        } else {
            LogSigner::load(&opts.log_key_path, &opts.log_cert_path)?
        };

        let path = self.drive.install_log_signer_cert(&signer.certificate_pem())?;
        log::info!("Copied log signer certificate to {}", path.display());
        Ok(signer)
    }

    pub fn run(&self) -> Result<ManifestOutput, ManifestError> {
        log::info!("Generating manifest for drive {}", self.drive.root().display());

        let signer = self.prepare_log_signer()?;
        let chain = ValidatedChain::from_drive(&self.drive)?;
        let entry = DeviceEntry::from_drive(&self.drive, &self.options.profile, &chain)?;

        let signed = signer.sign_entry(&entry)?;
        let manifest = encode_manifest(&[signed])?;
        let filename = manifest_filename(&entry.unique_id)?;

        let local_path = self.options.output_dir.join(&filename);
        write_file(&local_path, &manifest)?;
        let drive_path = self.drive.write_root_file(&filename, &manifest)?;

        log::info!("Generated the manifest file {}", filename);

        Ok(ManifestOutput {
            filename,
            local_path,
            drive_path,
            manifest,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::verify_manifest;
    use crate::testing::FixtureChain;
    use std::fs;

    struct Workspace {
        _dir: tempfile::TempDir,
        drive: PathBuf,
        options: ManifestOptions,
    }

    fn workspace(serial: &str) -> Workspace {
        let dir = tempfile::tempdir().unwrap();
        let drive = dir.path().join("drive");
        let out = dir.path().join("out");
        fs::create_dir_all(&drive).unwrap();
        fs::create_dir_all(&out).unwrap();
        FixtureChain::generate().write_drive(&drive, serial);

        let options = ManifestOptions::default()
            .with_log_signer(dir.path().join("signer.key"), dir.path().join("signer.crt"))
            .with_output_dir(out);
        Workspace {
            _dir: dir,
            drive,
            options,
        }
    }

    #[test]
    fn test_run_end_to_end() {
        let ws = workspace("ABC 123");
        let output = ManifestSession::new(&ws.drive, ws.options.clone())
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(output.filename, "ABC_123_manifest.json");
        assert_eq!(fs::read(&output.local_path).unwrap(), output.manifest);
        assert_eq!(output.drive_path, ws.drive.join("ABC_123_manifest.json"));
        assert_eq!(fs::read(&output.drive_path).unwrap(), output.manifest);
        assert!(ws.drive.join("sec").join("manifest_signer.crt").exists());

        let entries: Vec<serde_json::Value> = serde_json::from_slice(&output.manifest).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(output.entry.public_key_set.keys.len(), 5);
        assert_eq!(output.entry.unique_id, "ABC 123");

        let cert = fs::read(&ws.options.log_cert_path).unwrap();
        let verified = verify_manifest(&output.manifest, &cert).unwrap();
        assert_eq!(verified, vec![output.entry]);
    }

    #[test]
    fn test_run_reuses_existing_signer() {
        let ws = workspace("0123EE");
        let session = ManifestSession::new(&ws.drive, ws.options.clone()).unwrap();
        session.run().unwrap();
        let first_cert = fs::read(&ws.options.log_cert_path).unwrap();

        session.run().unwrap();
        assert_eq!(fs::read(&ws.options.log_cert_path).unwrap(), first_cert);
    }

    #[test]
    fn test_missing_signer_without_create_fails() {
        let ws = workspace("0123EE");
        let options = ws.options.clone().with_create_signer(false);
        let err = ManifestSession::new(&ws.drive, options).unwrap().run().unwrap_err();
        assert!(matches!(err, ManifestError::FileError { .. }));
        assert!(!ws.options.log_key_path.exists());
    }

    #[test]
    fn test_missing_certificate_aborts_without_output() {
        let ws = workspace("0123EE");
        fs::remove_file(ws.drive.join("sec").join("deviceCert.der")).unwrap();

        let err = ManifestSession::new(&ws.drive, ws.options.clone())
            .unwrap()
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("deviceCert.der"));
        assert!(!ws.drive.join("0123EE_manifest.json").exists());
        assert!(!ws.options.output_dir.join("0123EE_manifest.json").exists());
    }

    #[test]
    fn test_missing_drive() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ManifestSession::new(dir.path().join("nope"), ManifestOptions::default()).is_err());
    }
}
