//! The forked catalog worker: refresh once, report via exit code.
//!
//! IPC with the parent helper is deliberately narrow — the shared SQLite file
//! carries the data, the exit code carries success — so running the refresh
//! inline remains a drop-in alternative.

use std::path::Path;

use tracing::info;

use harbor_catalog::{
    CatalogManager, CatalogStore, CommunityReadmeProvider, CuratedProvider, RegistryProvider,
};

pub async fn run(data_dir: &Path, force: bool) -> anyhow::Result<()> {
    let store = CatalogStore::open(&harbor_common::paths::catalog_db_path(data_dir)).await?;
    let manager = CatalogManager::new(store, vec![
        Box::new(RegistryProvider::default()),
        Box::new(CuratedProvider::builtin()),
        Box::new(CommunityReadmeProvider::default()),
    ]);

    let changes = manager.refresh(force).await?;
    info!(changes = changes.len(), "catalog worker finished");

    let failures: Vec<String> = manager
        .provider_statuses()
        .await?
        .into_iter()
        .filter(|s| s.last_error.is_some())
        .map(|s| s.source)
        .collect();
    if !failures.is_empty() {
        anyhow::bail!("providers failed: {}", failures.join(", "));
    }
    Ok(())
}
