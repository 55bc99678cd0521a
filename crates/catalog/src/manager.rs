//! CatalogManager: owns the store and the provider set, and runs refreshes.
//!
//! This is the single writer for catalog data. It runs inside the forked
//! catalog worker when that mode is enabled, or inline on the helper's loop
//! otherwise — the surface is identical either way, keeping inlining a
//! drop-in alternative.

use tracing::{info, warn};

use crate::{
    entry::CatalogEntry,
    now_secs,
    providers::CatalogProvider,
    store::{CatalogStore, ChangeEvent, ProviderStatus},
};

pub struct CatalogManager {
    store: CatalogStore,
    providers: Vec<Box<dyn CatalogProvider>>,
}

impl CatalogManager {
    pub fn new(store: CatalogStore, providers: Vec<Box<dyn CatalogProvider>>) -> Self {
        Self { store, providers }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Refresh every provider whose cache has gone stale (or all of them when
    /// `force`). Per-provider failures are recorded and skipped; the merge of
    /// each successful fetch is one transaction.
    pub async fn refresh(&self, force: bool) -> anyhow::Result<Vec<ChangeEvent>> {
        let now = now_secs();
        let fresh_sources: Vec<String> = if force {
            Vec::new()
        } else {
            self.store
                .provider_statuses()
                .await?
                .into_iter()
                .filter(|s| {
                    s.last_success_at
                        .is_some_and(|at| now.saturating_sub(at) <= crate::CACHE_TTL_SECS)
                })
                .map(|s| s.source)
                .collect()
        };

        let mut events = Vec::new();
        for provider in &self.providers {
            let source = provider.source().to_string();
            if fresh_sources.contains(&source) {
                continue;
            }

            match provider.fetch().await {
                Ok(entries) => {
                    let merged = self.store.apply_fetch(&source, &entries, now_secs()).await?;
                    events.extend(merged);
                },
                Err(e) => {
                    warn!(source = %source, error = %e, "catalog provider fetch failed");
                    self.store.record_failure(&source, &e.to_string(), now_secs()).await?;
                },
            }
        }

        info!(changes = events.len(), "catalog refresh complete");
        Ok(events)
    }

    pub async fn search(&self, query: &str) -> anyhow::Result<Vec<CatalogEntry>> {
        self.store.search(query).await
    }

    pub async fn get_all(&self) -> anyhow::Result<Vec<CatalogEntry>> {
        self.store.get_all(false).await
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<CatalogEntry>> {
        self.store.get(id).await
    }

    pub async fn is_stale(&self) -> anyhow::Result<bool> {
        self.store.is_stale(now_secs()).await
    }

    pub async fn provider_statuses(&self) -> anyhow::Result<Vec<ProviderStatus>> {
        self.store.provider_statuses().await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{entry::DiscoveredEntry, providers::CuratedProvider},
        async_trait::async_trait,
        std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    struct FlakyProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CatalogProvider for FlakyProvider {
        fn source(&self) -> &str {
            "flaky"
        }

        async fn fetch(&self) -> anyhow::Result<Vec<DiscoveredEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("upstream down")
        }
    }

    #[tokio::test]
    async fn test_refresh_merges_and_records_failures() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = CatalogManager::new(store, vec![
            Box::new(CuratedProvider::builtin()),
            Box::new(FlakyProvider {
                calls: Arc::clone(&calls),
            }),
        ]);

        let events = manager.refresh(true).await.unwrap();
        assert!(!events.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let statuses = manager.provider_statuses().await.unwrap();
        let flaky = statuses.iter().find(|s| s.source == "flaky").unwrap();
        assert!(flaky.last_error.is_some());
        assert!(flaky.last_success_at.is_none());

        // The good provider's data is queryable despite the bad one.
        assert!(!manager.search("filesystem").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_providers_skipped_without_force() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        let manager = CatalogManager::new(store, vec![Box::new(CuratedProvider::builtin())]);

        manager.refresh(false).await.unwrap();
        // Second refresh inside the TTL: nothing to do, no change events.
        let events = manager.refresh(false).await.unwrap();
        assert!(events.is_empty());

        // Forced refresh re-fetches (still no changes, but it ran: the
        // success timestamp moves).
        let before = manager.provider_statuses().await.unwrap()[0].last_success_at;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        manager.refresh(true).await.unwrap();
        let after = manager.provider_statuses().await.unwrap()[0].last_success_at;
        assert!(after >= before);
    }
}
