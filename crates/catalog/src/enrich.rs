//! Enrichment pipeline: best-effort popularity signals layered onto the base
//! catalog.
//!
//! Enrichers run in bounded-concurrency batches with an inter-batch delay to
//! stay under external rate limits. Each enricher carries its own in-memory
//! cache so a re-run within the TTL costs nothing. Failures are logged and
//! skipped; the base catalog never waits on enrichment.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::future::join_all,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{
    CACHE_TTL_SECS,
    entry::{CatalogEntry, DiscoveredEntry, priority_score},
    now_secs,
    store::CatalogStore,
};

#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    /// A popularity signal for one entry, or `None` when this enricher has
    /// nothing to say about it.
    async fn enrich(&self, entry: &CatalogEntry) -> anyhow::Result<Option<i64>>;
}

/// Per-enricher result cache with TTL.
#[derive(Default)]
pub struct EnrichmentCache {
    values: Mutex<HashMap<String, (u64, Option<i64>)>>,
}

impl EnrichmentCache {
    pub async fn get(&self, id: &str, now: u64) -> Option<Option<i64>> {
        self.values
            .lock()
            .await
            .get(id)
            .filter(|(at, _)| now.saturating_sub(*at) <= CACHE_TTL_SECS)
            .map(|(_, v)| *v)
    }

    pub async fn put(&self, id: &str, value: Option<i64>, now: u64) {
        self.values
            .lock()
            .await
            .insert(id.to_string(), (now, value));
    }
}

/// An enricher plus its cache, the unit the pipeline runs.
pub struct CachedEnricher {
    pub enricher: Arc<dyn Enricher>,
    pub cache: EnrichmentCache,
}

impl CachedEnricher {
    pub fn new(enricher: Arc<dyn Enricher>) -> Self {
        Self {
            enricher,
            cache: EnrichmentCache::default(),
        }
    }

    async fn lookup(&self, entry: &CatalogEntry, now: u64) -> Option<i64> {
        if let Some(cached) = self.cache.get(&entry.id, now).await {
            return cached;
        }
        let result = match self.enricher.enrich(entry).await {
            Ok(value) => value,
            Err(e) => {
                warn!(enricher = self.enricher.name(), entry = %entry.id, error = %e,
                    "enrichment failed");
                None
            },
        };
        self.cache.put(&entry.id, result, now).await;
        result
    }
}

/// Run every enricher over the live catalog in batches of `batch_size`, with
/// `batch_delay` between batches.
pub async fn run_enrichment(
    store: &CatalogStore,
    enrichers: &[CachedEnricher],
    batch_size: usize,
    batch_delay: Duration,
) -> anyhow::Result<usize> {
    let entries = store.get_all(false).await?;
    let now = now_secs();
    let mut enriched = 0;

    for (batch_index, batch) in entries.chunks(batch_size.max(1)).enumerate() {
        if batch_index > 0 && !batch_delay.is_zero() {
            tokio::time::sleep(batch_delay).await;
        }

        let results = join_all(batch.iter().map(|entry| async move {
            let mut best: Option<i64> = None;
            for cached in enrichers {
                if let Some(value) = cached.lookup(entry, now).await {
                    best = Some(best.map_or(value, |b| b.max(value)));
                }
            }
            (entry, best)
        }))
        .await;

        for (entry, popularity) in results {
            let Some(popularity) = popularity else {
                continue;
            };
            if popularity == entry.popularity_score {
                continue;
            }
            let discovered = DiscoveredEntry {
                name: entry.name.clone(),
                endpoint_url: entry.endpoint_url.clone(),
                packages: entry.packages.clone(),
                description: entry.description.clone(),
                repository_url: entry.repository_url.clone(),
                tags: entry.tags.clone(),
                remote_capable: entry.remote_capable,
                featured: entry.featured,
                popularity_score: popularity,
                updated_upstream_at: entry.updated_upstream_at,
            };
            let priority = priority_score(&entry.source, &discovered, now);
            store.update_popularity(&entry.id, popularity, priority).await?;
            enriched += 1;
        }
    }

    debug!(enriched, total = entries.len(), "enrichment pass complete");
    Ok(enriched)
}
