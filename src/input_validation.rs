//! Validation of user-supplied paths and option names.
//!
//! rsync is spawned without a shell, so shell metacharacters are harmless;
//! the checks here catch values that can never name a real path.

use anyhow::{bail, Result};
use std::path::Path;

use crate::rsync::types::{RunOptions, RunRequest};

/// Maximum allowed path length in bytes
pub const MAX_PATH_LENGTH: usize = 4096;

/// Validate one path argument.
pub fn validate_path_argument(path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();

    if raw.trim().is_empty() {
        bail!("Path cannot be empty");
    }

    if raw.len() > MAX_PATH_LENGTH {
        bail!("Path too long: {} bytes (max: {})", raw.len(), MAX_PATH_LENGTH);
    }

    if raw.contains('\0') {
        bail!("Path contains null byte");
    }

    if raw.contains('\n') || raw.contains('\r') {
        bail!("Path contains line breaks");
    }

    Ok(())
}

/// Validate a whole request before anything is spawned.
pub fn validate_request(request: &RunRequest) -> Result<()> {
    if request.sources.is_empty() {
        bail!("No source files/folders added");
    }

    if request.destination.as_os_str().is_empty() {
        bail!("Destination path must be set");
    }

    for (i, source) in request.sources.iter().enumerate() {
        if let Err(e) = validate_path_argument(source) {
            bail!("Source {}: {}", i + 1, e);
        }
    }

    if let Err(e) = validate_path_argument(&request.destination) {
        bail!("Destination: {}", e);
    }

    Ok(())
}

/// Validate an option name given on the command line.
pub fn validate_option_name(name: &str) -> Result<()> {
    if RunOptions::default().get(name).is_none() {
        bail!(
            "Unknown option '{}' (expected one of: {})",
            name,
            RunOptions::NAMES.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(sources: &[&str], destination: &str) -> RunRequest {
        RunRequest::new(
            sources.iter().map(PathBuf::from).collect(),
            PathBuf::from(destination),
            RunOptions::default(),
        )
    }

    #[test]
    fn test_validate_path_argument_valid() {
        assert!(validate_path_argument(Path::new("/Users/test/file.txt")).is_ok());
        assert!(validate_path_argument(Path::new("/Volumes/USB; with semicolon")).is_ok());
        assert!(validate_path_argument(Path::new("C:\\Users\\test")).is_ok());
    }

    #[test]
    fn test_validate_path_argument_invalid() {
        assert!(validate_path_argument(Path::new("/path\0with\0null")).is_err());
        assert!(validate_path_argument(Path::new("/path\nnext")).is_err());
        assert!(validate_path_argument(Path::new("   ")).is_err());
    }

    #[test]
    fn test_validate_path_argument_too_long() {
        let long_path = "/".repeat(5000);
        assert!(validate_path_argument(Path::new(&long_path)).is_err());
    }

    #[test]
    fn test_validate_request() {
        assert!(validate_request(&request(&["/a", "/b"], "/dest")).is_ok());

        let err = validate_request(&request(&[], "/dest")).unwrap_err();
        assert!(err.to_string().contains("No source"));

        let err = validate_request(&request(&["/a"], "")).unwrap_err();
        assert!(err.to_string().contains("Destination"));

        let err = validate_request(&request(&["/a", "/b\0"], "/dest")).unwrap_err();
        assert!(err.to_string().contains("Source 2"));
    }

    #[test]
    fn test_validate_option_name() {
        assert!(validate_option_name("dry_run").is_ok());
        assert!(validate_option_name("human").is_ok());
        assert!(validate_option_name("turbo").is_err());
    }
}
