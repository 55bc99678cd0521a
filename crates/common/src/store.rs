//! Private JSON persistence, shared by every file-backed store.
//!
//! Grants, OAuth tokens, server secrets, and the installed-server index all
//! persist the same way: parent directory 0700, serialize, write a sibling
//! temp file, restrict it to 0600, rename over the target. Readers therefore
//! never observe a torn file, and secrets never transit through a
//! world-readable path.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} holds invalid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Load a JSON file. Absent files are `None`; unreadable or unparseable
/// files are errors the caller decides how to survive (most stores start
/// fresh, the token store also checks its version envelope).
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        },
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `value` and atomically replace `path` with a 0600 file under a
/// 0700 parent.
pub fn write_json_private<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        crate::paths::ensure_private_dir(parent).map_err(write_err)?;
    }

    let data = serde_json::to_string_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(write_err)?;
    crate::paths::restrict_file(&tmp).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    #[test]
    fn test_absent_file_is_none() {
        let loaded: Option<HashMap<String, String>> =
            read_json(Path::new("/nonexistent/harbor/state.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("grants.json");

        let value = HashMap::from([("origin".to_string(), "granted".to_string())]);
        write_json_private(&path, &value).unwrap();

        let loaded: HashMap<String, String> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not { json").unwrap();

        let result: Result<Option<HashMap<String, String>>> = read_json(&path);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_private(&path, &serde_json::json!({"k": 1})).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_modes_applied() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("auth");
        let path = parent.join("tokens.json");
        write_json_private(&path, &serde_json::json!({})).unwrap();

        let dir_mode = std::fs::metadata(&parent).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_private(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_private(&path, &serde_json::json!({"v": 2})).unwrap();

        let loaded: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded["v"], 2);
    }
}
