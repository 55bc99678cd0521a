//! Versioned on-disk token store.
//!
//! Single file at `~/.harbor/auth/oauth-tokens.json`, envelope
//! `{version, tokens[], updatedAt}`. A version mismatch ignores the file and
//! starts fresh. Writes are temp-file-then-rename under one async mutex, so
//! there is exactly one writer and readers never observe a torn file.

use std::path::PathBuf;

use {
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    error::Result,
    now_secs,
    types::StoredTokens,
};

const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenFile {
    version: u32,
    tokens: Vec<StoredTokens>,
    updated_at: u64,
}

impl Default for TokenFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            tokens: Vec::new(),
            updated_at: 0,
        }
    }
}

pub struct TokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn read_file(&self) -> TokenFile {
        match harbor_common::read_json::<TokenFile>(&self.path) {
            Ok(Some(file)) if file.version == STORE_VERSION => file,
            Ok(Some(file)) => {
                warn!(
                    path = %self.path.display(),
                    found = file.version,
                    expected = STORE_VERSION,
                    "token store version mismatch, starting fresh"
                );
                TokenFile::default()
            },
            Ok(None) => TokenFile::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file unreadable");
                TokenFile::default()
            },
        }
    }

    fn write_file(&self, mut file: TokenFile) -> Result<()> {
        file.version = STORE_VERSION;
        file.updated_at = now_secs();
        harbor_common::write_json_private(&self.path, &file)?;
        Ok(())
    }

    pub async fn get(&self, server_id: &str) -> Option<StoredTokens> {
        let file = self.read_file();
        let found = file.tokens.into_iter().find(|t| t.server_id == server_id);
        if found.is_none() {
            debug!(server = %server_id, "no stored tokens");
        }
        found
    }

    pub async fn upsert(&self, tokens: StoredTokens) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file();
        file.tokens.retain(|t| t.server_id != tokens.server_id);
        info!(server = %tokens.server_id, provider = %tokens.provider, "saving OAuth tokens");
        file.tokens.push(tokens);
        self.write_file(file)
    }

    pub async fn delete(&self, server_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file();
        let before = file.tokens.len();
        file.tokens.retain(|t| t.server_id != server_id);
        let removed = file.tokens.len() < before;
        if removed {
            info!(server = %server_id, "deleting OAuth tokens");
            self.write_file(file)?;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<StoredTokens> {
        self.read_file().tokens
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    fn tokens(server_id: &str, expires_at: Option<u64>) -> StoredTokens {
        StoredTokens {
            server_id: server_id.into(),
            provider: "google".into(),
            access_token: Secret::new("at".into()),
            refresh_token: Some(Secret::new("rt".into())),
            expires_at,
            scopes: vec!["a".into()],
            created_at: now_secs(),
            updated_at: now_secs(),
        }
    }

    #[tokio::test]
    async fn test_upsert_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("auth").join("oauth-tokens.json"));

        store.upsert(tokens("gmail", Some(12345))).await.unwrap();
        let loaded = store.get("gmail").await.unwrap();
        assert_eq!(loaded.provider, "google");
        assert_eq!(loaded.expires_at, Some(12345));
        assert!(store.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("oauth-tokens.json"));

        store.upsert(tokens("s", Some(1))).await.unwrap();
        store.upsert(tokens("s", Some(2))).await.unwrap();
        let all = store.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].expires_at, Some(2));
    }

    #[tokio::test]
    async fn test_version_mismatch_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth-tokens.json");
        std::fs::write(&path, r#"{"version":99,"tokens":[{"serverId":"x"}],"updatedAt":0}"#)
            .unwrap();

        let store = TokenStore::new(path);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("oauth-tokens.json"));
        store.upsert(tokens("s", None)).await.unwrap();
        assert!(store.delete("s").await.unwrap());
        assert!(!store.delete("s").await.unwrap());
        assert!(store.get("s").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_and_dir_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let auth_dir = dir.path().join("auth");
        let store = TokenStore::new(auth_dir.join("oauth-tokens.json"));
        store.upsert(tokens("s", None)).await.unwrap();

        let dir_mode = std::fs::metadata(&auth_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        let file_mode = std::fs::metadata(auth_dir.join("oauth-tokens.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_envelope_shape_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth-tokens.json");
        let store = TokenStore::new(path.clone());
        store.upsert(tokens("s", Some(7))).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["updatedAt"].as_u64().unwrap() > 0);
        assert_eq!(raw["tokens"][0]["serverId"], "s");
        assert_eq!(raw["tokens"][0]["accessToken"], "at");
    }
}
