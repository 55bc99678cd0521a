//! MCP server catalog: provider-based discovery with deterministic merge into
//! a persistent SQLite store.
//!
//! Providers fetch independently and may fail independently; the store's
//! upsert is the single merge point and the last-good data stays queryable
//! through any failure. Enrichment is a separate best-effort pipeline that
//! never blocks the base catalog.

pub mod enrich;
pub mod entry;
pub mod manager;
pub mod providers;
pub mod store;

pub use {
    enrich::{CachedEnricher, Enricher, run_enrichment},
    entry::{CatalogEntry, DiscoveredEntry, entry_id, priority_score},
    manager::CatalogManager,
    providers::{CatalogProvider, CommunityReadmeProvider, CuratedProvider, RegistryProvider},
    store::{CatalogStore, ChangeEvent, ProviderStatus},
};

/// Provider fetches and enrichment results are cached this long.
pub const CACHE_TTL_SECS: u64 = 3600;

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
