//! SQLite-backed catalog store.
//!
//! One fetch's worth of upserts runs as a single transaction per provider, so
//! readers see either the previous catalog or the merged one. Change events
//! come out of the merge, not a separate log.

use {
    serde::Serialize,
    sqlx::{SqlitePool, sqlite::SqliteConnectOptions},
    tracing::{debug, info},
};

use crate::{
    CACHE_TTL_SECS,
    entry::{CatalogEntry, DiscoveredEntry, entry_id, priority_score},
};

/// What changed for one entry during a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum ChangeEvent {
    Added { id: String },
    Updated { id: String },
    Removed { id: String },
    Restored { id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub source: String,
    pub last_attempt_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub last_error: Option<String>,
}

pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open (and create) the store at `path`.
    pub async fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests and the `--ephemeral` helper mode.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                name TEXT NOT NULL,
                endpoint_url TEXT,
                packages TEXT NOT NULL DEFAULT '[]',
                description TEXT NOT NULL DEFAULT '',
                repository_url TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                remote_capable INTEGER NOT NULL DEFAULT 0,
                featured INTEGER NOT NULL DEFAULT 0,
                popularity_score INTEGER NOT NULL DEFAULT 0,
                priority_score INTEGER NOT NULL DEFAULT 0,
                first_seen_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL,
                is_removed INTEGER NOT NULL DEFAULT 0,
                removed_at INTEGER,
                updated_upstream_at INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS provider_status (
                source TEXT PRIMARY KEY,
                last_attempt_at INTEGER,
                last_success_at INTEGER,
                last_error TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merge one provider fetch. Entries from `source` absent from the fetch
    /// are tombstoned; re-observed tombstones are restored.
    pub async fn apply_fetch(
        &self,
        source: &str,
        entries: &[DiscoveredEntry],
        now: u64,
    ) -> anyhow::Result<Vec<ChangeEvent>> {
        let mut tx = self.pool.begin().await?;
        let mut events = Vec::new();

        let existing: Vec<(String, String, Option<String>, String, i64)> = sqlx::query_as(
            "SELECT id, name, endpoint_url, description, is_removed FROM entries WHERE source = ?",
        )
        .bind(source)
        .fetch_all(&mut *tx)
        .await?;
        let mut unseen: std::collections::HashMap<String, (String, Option<String>, String, bool)> =
            existing
                .into_iter()
                .map(|(id, name, endpoint, desc, removed)| {
                    (id, (name, endpoint, desc, removed != 0))
                })
                .collect();

        for entry in entries {
            let id = entry_id(source, entry);
            let score = priority_score(source, entry, now);
            let packages = serde_json::to_string(&entry.packages)?;
            let tags = serde_json::to_string(&entry.tags)?;

            let event = match unseen.remove(&id) {
                None => {
                    sqlx::query(
                        "INSERT INTO entries (id, source, name, endpoint_url, packages, description,
                             repository_url, tags, remote_capable, featured, popularity_score,
                             priority_score, first_seen_at, last_seen_at, is_removed, removed_at,
                             updated_upstream_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)",
                    )
                    .bind(&id)
                    .bind(source)
                    .bind(&entry.name)
                    .bind(&entry.endpoint_url)
                    .bind(&packages)
                    .bind(&entry.description)
                    .bind(&entry.repository_url)
                    .bind(&tags)
                    .bind(entry.remote_capable as i64)
                    .bind(entry.featured as i64)
                    .bind(entry.popularity_score)
                    .bind(score)
                    .bind(now as i64)
                    .bind(now as i64)
                    .bind(entry.updated_upstream_at.map(|v| v as i64))
                    .execute(&mut *tx)
                    .await?;
                    Some(ChangeEvent::Added { id: id.clone() })
                },
                Some((old_name, old_endpoint, old_desc, was_removed)) => {
                    sqlx::query(
                        "UPDATE entries SET name = ?, endpoint_url = ?, packages = ?,
                             description = ?, repository_url = ?, tags = ?, remote_capable = ?,
                             featured = ?, popularity_score = ?, priority_score = ?,
                             last_seen_at = ?, is_removed = 0, removed_at = NULL,
                             updated_upstream_at = ?
                         WHERE id = ?",
                    )
                    .bind(&entry.name)
                    .bind(&entry.endpoint_url)
                    .bind(&packages)
                    .bind(&entry.description)
                    .bind(&entry.repository_url)
                    .bind(&tags)
                    .bind(entry.remote_capable as i64)
                    .bind(entry.featured as i64)
                    .bind(entry.popularity_score)
                    .bind(score)
                    .bind(now as i64)
                    .bind(entry.updated_upstream_at.map(|v| v as i64))
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;

                    if was_removed {
                        Some(ChangeEvent::Restored { id: id.clone() })
                    } else if old_name != entry.name
                        || old_endpoint != entry.endpoint_url
                        || old_desc != entry.description
                    {
                        Some(ChangeEvent::Updated { id: id.clone() })
                    } else {
                        None
                    }
                },
            };
            events.extend(event);
        }

        // Everything left over was not observed in this fetch.
        for (id, (_, _, _, was_removed)) in unseen {
            if was_removed {
                continue;
            }
            sqlx::query("UPDATE entries SET is_removed = 1, removed_at = ? WHERE id = ?")
                .bind(now as i64)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            events.push(ChangeEvent::Removed { id });
        }

        sqlx::query(
            "INSERT INTO provider_status (source, last_attempt_at, last_success_at, last_error)
             VALUES (?, ?, ?, NULL)
             ON CONFLICT(source) DO UPDATE SET
                 last_attempt_at = excluded.last_attempt_at,
                 last_success_at = excluded.last_success_at,
                 last_error = NULL",
        )
        .bind(source)
        .bind(now as i64)
        .bind(now as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(source, entries = entries.len(), changes = events.len(), "catalog fetch merged");
        Ok(events)
    }

    /// A failed fetch touches only `provider_status`; the last-good entries
    /// stay queryable.
    pub async fn record_failure(&self, source: &str, error: &str, now: u64) -> anyhow::Result<()> {
        debug!(source, error, "recording provider failure");
        sqlx::query(
            "INSERT INTO provider_status (source, last_attempt_at, last_success_at, last_error)
             VALUES (?, ?, NULL, ?)
             ON CONFLICT(source) DO UPDATE SET
                 last_attempt_at = excluded.last_attempt_at,
                 last_error = excluded.last_error",
        )
        .bind(source)
        .bind(now as i64)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Case-insensitive substring search over name, description, and tags,
    /// best-first.
    pub async fn search(&self, query: &str) -> anyhow::Result<Vec<CatalogEntry>> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT * FROM entries
             WHERE is_removed = 0
               AND (lower(name) LIKE ? OR lower(description) LIKE ? OR lower(tags) LIKE ?)
             ORDER BY priority_score DESC, name ASC",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    pub async fn get_all(&self, include_removed: bool) -> anyhow::Result<Vec<CatalogEntry>> {
        let sql = if include_removed {
            "SELECT * FROM entries ORDER BY priority_score DESC, name ASC"
        } else {
            "SELECT * FROM entries WHERE is_removed = 0 ORDER BY priority_score DESC, name ASC"
        };
        let rows = sqlx::query_as::<_, EntryRow>(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<CatalogEntry>> {
        let row = sqlx::query_as::<_, EntryRow>("SELECT * FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// Persist an enrichment result (popularity feeds the priority score).
    pub async fn update_popularity(
        &self,
        id: &str,
        popularity: i64,
        priority: i64,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE entries SET popularity_score = ?, priority_score = ? WHERE id = ?")
            .bind(popularity)
            .bind(priority)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn provider_statuses(&self) -> anyhow::Result<Vec<ProviderStatus>> {
        let rows: Vec<(String, Option<i64>, Option<i64>, Option<String>)> = sqlx::query_as(
            "SELECT source, last_attempt_at, last_success_at, last_error FROM provider_status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(source, attempt, success, error)| ProviderStatus {
                source,
                last_attempt_at: attempt.map(|v| v as u64),
                last_success_at: success.map(|v| v as u64),
                last_error: error,
            })
            .collect())
    }

    /// Stale when the oldest provider success is more than the TTL ago (or a
    /// provider has never succeeded).
    pub async fn is_stale(&self, now: u64) -> anyhow::Result<bool> {
        let statuses = self.provider_statuses().await?;
        if statuses.is_empty() {
            return Ok(true);
        }
        Ok(statuses.iter().any(|s| match s.last_success_at {
            Some(at) => now.saturating_sub(at) > CACHE_TTL_SECS,
            None => true,
        }))
    }
}

/// Raw row shape; booleans and JSON arrays unpacked by `into_entry`.
#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    source: String,
    name: String,
    endpoint_url: Option<String>,
    packages: String,
    description: String,
    repository_url: Option<String>,
    tags: String,
    remote_capable: i64,
    featured: i64,
    popularity_score: i64,
    priority_score: i64,
    first_seen_at: i64,
    last_seen_at: i64,
    is_removed: i64,
    removed_at: Option<i64>,
    updated_upstream_at: Option<i64>,
}

impl EntryRow {
    fn into_entry(self) -> anyhow::Result<CatalogEntry> {
        Ok(CatalogEntry {
            id: self.id,
            source: self.source,
            name: self.name,
            endpoint_url: self.endpoint_url,
            packages: serde_json::from_str(&self.packages)?,
            description: self.description,
            repository_url: self.repository_url,
            tags: serde_json::from_str(&self.tags)?,
            remote_capable: self.remote_capable != 0,
            featured: self.featured != 0,
            popularity_score: self.popularity_score,
            priority_score: self.priority_score,
            first_seen_at: self.first_seen_at as u64,
            last_seen_at: self.last_seen_at as u64,
            is_removed: self.is_removed != 0,
            removed_at: self.removed_at.map(|v| v as u64),
            updated_upstream_at: self.updated_upstream_at.map(|v| v as u64),
        })
    }
}
