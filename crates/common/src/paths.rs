//! Layout of the persisted state directory (`~/.harbor/` by default).
//!
//! Resolution order:
//! 1. programmatic override ([`set_data_dir`], used by the CLI `--data-dir` flag)
//! 2. `HARBOR_DATA_DIR`
//! 3. `~/.harbor`

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

static DATA_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Set the data directory for the lifetime of the process.
///
/// Returns `false` if an override was already installed.
pub fn set_data_dir(path: PathBuf) -> bool {
    DATA_DIR_OVERRIDE.set(path).is_ok()
}

/// Root of all persisted harbor state.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = DATA_DIR_OVERRIDE.get() {
        return dir.clone();
    }
    if let Ok(dir) = std::env::var("HARBOR_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs_next::home_dir()
        .map(|h| h.join(".harbor"))
        .unwrap_or_else(|| PathBuf::from(".harbor"))
}

/// Directory holding OAuth token files. Created 0700.
pub fn auth_dir(root: &Path) -> PathBuf {
    root.join("auth")
}

/// Directory holding per-server secret files. Created 0700.
pub fn secrets_dir(root: &Path) -> PathBuf {
    root.join("secrets")
}

pub fn catalog_db_path(root: &Path) -> PathBuf {
    root.join("catalog.db")
}

pub fn oauth_tokens_path(root: &Path) -> PathBuf {
    auth_dir(root).join("oauth-tokens.json")
}

pub fn credentials_path(root: &Path) -> PathBuf {
    secrets_dir(root).join("credentials.json")
}

pub fn permissions_path(root: &Path) -> PathBuf {
    root.join("permissions.json")
}

pub fn installed_servers_path(root: &Path) -> PathBuf {
    root.join("installed_servers.json")
}

/// Create a directory (and parents) with mode 0700 on Unix.
pub fn ensure_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Restrict a file to owner read/write (0600) on Unix.
pub fn restrict_file(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_root() {
        let root = PathBuf::from("/tmp/harbor-test");
        assert_eq!(catalog_db_path(&root), root.join("catalog.db"));
        assert_eq!(
            oauth_tokens_path(&root),
            root.join("auth").join("oauth-tokens.json")
        );
        assert_eq!(
            credentials_path(&root),
            root.join("secrets").join("credentials.json")
        );
        assert_eq!(permissions_path(&root), root.join("permissions.json"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_private_dir_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("auth");
        ensure_private_dir(&target).unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_restrict_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tokens.json");
        std::fs::write(&file, "{}").unwrap();
        restrict_file(&file).unwrap();
        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
