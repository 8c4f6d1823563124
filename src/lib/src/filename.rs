//! Manifest file naming

use crate::error::ManifestError;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Suffix appended to the sanitized unique ID
pub const MANIFEST_SUFFIX: &str = "_manifest.json";

/// Turn an arbitrary string into an ASCII file name component
///
/// Compatibility-decomposes the input and keeps only ASCII, removes anything
/// that is not a word character, whitespace or `-`, trims, then collapses
/// whitespace runs into `_` and dash runs into a single `-`.
pub fn make_valid_filename(s: &str) -> Result<String, ManifestError> {
    let ascii: String = s.nfkd().filter(char::is_ascii).collect();

    let s = compile(r"[^\w\s-]")?.replace_all(&ascii, "");
    let s = compile(r"\s+")?.replace_all(s.trim(), "_");
    let s = compile(r"-+")?.replace_all(&s, "-");

    Ok(s.into_owned())
}

/// Manifest file name for a device unique ID
pub fn manifest_filename(unique_id: &str) -> Result<String, ManifestError> {
    let stem = make_valid_filename(unique_id)?;
    if stem.is_empty() {
        return Err(ManifestError::InvalidSerial(format!(
            "'{}' has no characters usable in a file name",
            unique_id
        )));
    }
    Ok(format!("{}{}", stem, MANIFEST_SUFFIX))
}

fn compile(pattern: &str) -> Result<Regex, ManifestError> {
    Regex::new(pattern).map_err(|e| ManifestError::InternalError(e.to_string()))
}
