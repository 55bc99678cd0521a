//! Per-server secret storage: `~/.harbor/secrets/credentials.json`, a map of
//! `{serverId → {key → value}}`, file mode 0600.

use std::{collections::HashMap, path::PathBuf};

use {
    tokio::sync::Mutex,
    tracing::info,
};

type CredentialMap = HashMap<String, HashMap<String, String>>;

pub struct SecretsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SecretsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> CredentialMap {
        harbor_common::read_json(&self.path)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn write_map(&self, map: &CredentialMap) -> anyhow::Result<()> {
        harbor_common::write_json_private(&self.path, map)?;
        Ok(())
    }

    /// Replace a server's secrets wholesale.
    pub async fn set(&self, server_id: &str, secrets: HashMap<String, String>) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map();
        info!(server = %server_id, keys = secrets.len(), "storing server secrets");
        map.insert(server_id.to_string(), secrets);
        self.write_map(&map)
    }

    pub async fn get(&self, server_id: &str) -> HashMap<String, String> {
        self.read_map().get(server_id).cloned().unwrap_or_default()
    }

    pub async fn delete(&self, server_id: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map();
        let removed = map.remove(server_id).is_some();
        if removed {
            self.write_map(&map)?;
        }
        Ok(removed)
    }
}
