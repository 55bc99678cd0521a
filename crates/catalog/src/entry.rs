//! Catalog entry types, deterministic ids, and the priority score.

use {
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

/// Seven days, the "recently updated" horizon for scoring.
const RECENT_UPDATE_SECS: u64 = 7 * 24 * 3600;

/// What a provider reports about one server, before the store assigns
/// identity and history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub remote_capable: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub popularity_score: i64,
    /// Unix timestamp of the last upstream update, when the provider knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_upstream_at: Option<u64>,
}

/// A stored catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub source: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    pub packages: Vec<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    pub tags: Vec<String>,
    pub remote_capable: bool,
    pub featured: bool,
    pub popularity_score: i64,
    pub priority_score: i64,
    pub first_seen_at: u64,
    pub last_seen_at: u64,
    pub is_removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_upstream_at: Option<u64>,
}

/// Deterministic id from `(source, endpointUrl|repo, name)`.
pub fn entry_id(source: &str, entry: &DiscoveredEntry) -> String {
    let locator = entry
        .endpoint_url
        .as_deref()
        .or(entry.repository_url.as_deref())
        .unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(locator.as_bytes());
    hasher.update(b"|");
    hasher.update(entry.name.as_bytes());
    let digest = hasher.finalize();
    hex(&digest[..16])
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Priority score: a pure function of the entry and the clock, recomputed on
/// every upsert from fixed weights.
pub fn priority_score(source: &str, entry: &DiscoveredEntry, now: u64) -> i64 {
    let mut score = 0i64;
    if entry.endpoint_url.is_some() {
        score += 1000;
    }
    if entry.remote_capable {
        score += 400;
    }
    if entry.featured {
        score += 500;
    }
    if entry.tags.iter().any(|t| t.eq_ignore_ascii_case("official")) {
        score += 300;
    }
    if source == "official" {
        score += 200;
    }
    if !entry.description.trim().is_empty() {
        score += 50;
    }
    if entry.repository_url.is_some() {
        score += 25;
    }
    if entry
        .updated_upstream_at
        .is_some_and(|at| now.saturating_sub(at) <= RECENT_UPDATE_SECS)
    {
        score += 100;
    }
    score += entry.popularity_score.clamp(0, 500);
    score
}
