//! Owner-only file access for log signer private keys
//!
//! The log signer key is the only secret this crate touches. It is written
//! with mode 0600 on Unix, and reading it warns when group or other bits are
//! set. Everything else (certificates, manifests) goes through plain I/O.

use crate::error::ManifestError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Owner read/write only
#[cfg(unix)]
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Warn when a key file is readable by group or others
#[cfg(unix)]
pub fn check_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| ManifestError::file(path, e))?;
    let perm_bits = metadata.permissions().mode() & 0o777;

    if perm_bits & 0o077 != 0 {
        log::warn!(
            "Log signer key '{}' has permissive mode {:o}; consider running: chmod 600 '{}'",
            path.display(),
            perm_bits,
            path.display()
        );
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn check_permissions(path: &Path) -> Result<(), ManifestError> {
    log::debug!(
        "Permission check skipped for '{}' on this platform",
        path.display()
    );
    Ok(())
}

#[cfg(unix)]
fn create_secure_file(path: &Path) -> Result<File, ManifestError> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SECURE_FILE_MODE)
        .open(path)
        .map_err(|e| ManifestError::file(path, e))
}

#[cfg(not(unix))]
fn create_secure_file(path: &Path) -> Result<File, ManifestError> {
    log::warn!(
        "Creating '{}' without restrictive permissions on this platform",
        path.display()
    );

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| ManifestError::file(path, e))
}

/// Write key material, creating the file as 0600 before any byte lands in it
///
/// An existing file keeps its inode, so its mode is reset explicitly afterwards.
pub fn write_secure(path: &Path, data: &[u8]) -> Result<(), ManifestError> {
    let mut file = create_secure_file(path)?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| ManifestError::file(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(SECURE_FILE_MODE))
            .map_err(|e| ManifestError::file(path, e))?;
    }

    Ok(())
}

/// Read key material, warning on permissive modes
pub fn read_secure(path: &Path) -> Result<Vec<u8>, ManifestError> {
    check_permissions(path)?;
    fs::read(path).map_err(|e| ManifestError::file(path, e))
}
