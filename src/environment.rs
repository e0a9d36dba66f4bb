//! rsync discovery and platform path handling.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RsyncInfo {
    pub path: PathBuf,
    /// First line of `rsync --version`
    pub version: String,
}

/// Find `program` the way the shell would.
///
/// Names containing a separator are checked as given. Bare names are looked
/// up on `PATH`; on Windows the Git for Windows `usr\bin` directory is tried
/// as well, since that is where rsync usually comes from there.
pub fn locate_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return is_executable(program).then(|| program.to_path_buf());
    }

    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    if cfg!(windows) {
        dirs.push(git_usr_bin(std::env::var_os("ProgramFiles")));
    }

    search_dirs(program, &dirs)
}

fn search_dirs(program: &Path, dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in dirs {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if is_executable(&exe) {
                return Some(exe);
            }
        }
    }
    None
}

fn git_usr_bin(program_files: Option<OsString>) -> PathBuf {
    let base = program_files
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("C:\\Program Files"));
    base.join("Git").join("usr").join("bin")
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Locate rsync and read its version line.
pub async fn check_rsync(program: &Path) -> Result<RsyncInfo> {
    let Some(path) = locate_program(program) else {
        bail!(
            "rsync not found: '{}' is not on PATH. Is rsync installed?",
            program.display()
        );
    };

    let output = tokio::process::Command::new(&path)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("failed to execute {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "{} --version exited with {}",
            path.display(),
            output.status
        );
    }

    let version = parse_version_line(&output.stdout)
        .unwrap_or_else(|| "unknown version".to_string());
    debug!(path = %path.display(), %version, "rsync found");

    Ok(RsyncInfo { path, version })
}

/// First non-empty line of `--version` output
fn parse_version_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Rewrite a Windows path into the form MSYS/Cygwin rsync understands:
/// `C:\Users\me` becomes `/c/Users/me`. Other paths only get their
/// separators flipped.
pub fn to_rsync_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';

    if has_drive {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = path[2..].replace('\\', "/");
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            format!("/{drive}/")
        } else {
            format!("/{drive}/{rest}")
        }
    } else {
        path.replace('\\', "/")
    }
}

/// Path argument as it should be passed to rsync on this platform.
pub fn rsync_argument(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if cfg!(windows) {
        to_rsync_path(&raw)
    } else {
        raw.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rsync_path_drive_letters() {
        assert_eq!(to_rsync_path("C:\\Users\\me\\Photos"), "/c/Users/me/Photos");
        assert_eq!(to_rsync_path("d:/backup"), "/d/backup");
        assert_eq!(to_rsync_path("E:\\"), "/e/");
        assert_eq!(to_rsync_path("relative\\dir"), "relative/dir");
        assert_eq!(to_rsync_path("/already/posix"), "/already/posix");
    }

    #[test]
    fn test_parse_version_line() {
        let out = b"\nrsync  version 3.2.7  protocol version 31\nCopyright (C) 1996-2022\n";
        assert_eq!(
            parse_version_line(out).as_deref(),
            Some("rsync  version 3.2.7  protocol version 31")
        );
        assert_eq!(parse_version_line(b"  \n"), None);
    }

    #[test]
    fn test_git_usr_bin_default() {
        let path = git_usr_bin(None);
        assert!(path.ends_with(Path::new("Git").join("usr").join("bin")));
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_program() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("fake-rsync");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("not-executable");
        std::fs::write(&plain, "").unwrap();

        let dirs = vec![dir.path().to_path_buf()];
        assert_eq!(search_dirs(Path::new("fake-rsync"), &dirs), Some(tool.clone()));
        assert_eq!(search_dirs(Path::new("not-executable"), &dirs), None);
        assert_eq!(locate_program(&tool), Some(tool));
        assert_eq!(locate_program(Path::new("/definitely/missing/rsync")), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_rsync_missing() {
        let err = check_rsync(Path::new("/definitely/missing/rsync")).await.unwrap_err();
        assert!(err.to_string().contains("rsync not found"));
    }
}
