//! Catalog providers: each fetches one source's view of the world.

use {async_trait::async_trait, tracing::debug};

use crate::entry::DiscoveredEntry;

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Stable source key; rows and provider status are keyed on this.
    fn source(&self) -> &str;

    async fn fetch(&self) -> anyhow::Result<Vec<DiscoveredEntry>>;
}

// ── Official registry ───────────────────────────────────────────────

/// Paginated fetch from the official MCP registry HTTP API.
pub struct RegistryProvider {
    base_url: String,
    client: reqwest::Client,
    page_size: usize,
}

impl RegistryProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://registry.modelcontextprotocol.io";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            page_size: 100,
        }
    }
}

impl Default for RegistryProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl CatalogProvider for RegistryProvider {
    fn source(&self) -> &str {
        "official"
    }

    async fn fetch(&self) -> anyhow::Result<Vec<DiscoveredEntry>> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!("{}/v0/servers?limit={}", self.base_url, self.page_size);
            if let Some(c) = &cursor {
                url.push_str(&format!("&cursor={c}"));
            }

            let page: serde_json::Value = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let servers = page["servers"].as_array().cloned().unwrap_or_default();
            debug!(source = self.source(), page_entries = servers.len(), "registry page fetched");
            for server in &servers {
                entries.push(parse_registry_server(server));
            }

            cursor = page["metadata"]["next_cursor"]
                .as_str()
                .filter(|c| !c.is_empty())
                .map(ToString::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}

fn parse_registry_server(server: &serde_json::Value) -> DiscoveredEntry {
    let str_list = |v: &serde_json::Value| -> Vec<String> {
        v.as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|x| x.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    let remotes = server["remotes"].as_array().cloned().unwrap_or_default();
    let endpoint_url = remotes
        .first()
        .and_then(|r| r["url"].as_str())
        .map(ToString::to_string);

    DiscoveredEntry {
        name: server["name"].as_str().unwrap_or_default().to_string(),
        endpoint_url,
        packages: server["packages"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| p["identifier"].as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        description: server["description"].as_str().unwrap_or_default().to_string(),
        repository_url: server["repository"]["url"].as_str().map(ToString::to_string),
        tags: str_list(&server["tags"]),
        remote_capable: !remotes.is_empty(),
        featured: false,
        popularity_score: 0,
        updated_upstream_at: None,
    }
}

// ── Curated list ────────────────────────────────────────────────────

/// A static, hand-maintained list shipped with the helper.
pub struct CuratedProvider {
    entries: Vec<DiscoveredEntry>,
}

impl CuratedProvider {
    pub fn new(entries: Vec<DiscoveredEntry>) -> Self {
        Self { entries }
    }

    /// The built-in list: a small set of widely useful servers.
    pub fn builtin() -> Self {
        let entry = |name: &str, description: &str, package: &str| DiscoveredEntry {
            name: name.into(),
            description: description.into(),
            packages: vec![package.into()],
            repository_url: Some(format!(
                "https://github.com/modelcontextprotocol/servers/tree/main/src/{name}"
            )),
            tags: vec!["official".into()],
            featured: true,
            ..Default::default()
        };
        Self::new(vec![
            entry(
                "filesystem",
                "Secure file operations with configurable access controls",
                "@modelcontextprotocol/server-filesystem",
            ),
            entry(
                "fetch",
                "Web content fetching and conversion for efficient LLM usage",
                "mcp-server-fetch",
            ),
            entry(
                "memory",
                "Knowledge graph-based persistent memory system",
                "@modelcontextprotocol/server-memory",
            ),
        ])
    }
}

#[async_trait]
impl CatalogProvider for CuratedProvider {
    fn source(&self) -> &str {
        "curated"
    }

    async fn fetch(&self) -> anyhow::Result<Vec<DiscoveredEntry>> {
        Ok(self.entries.clone())
    }
}

// ── Community README ────────────────────────────────────────────────

/// Scrapes the community awesome-list README for server entries.
///
/// The list is maintained as markdown bullet lines of the shape
/// `- [name](repo-url) - description`. Anything that doesn't look like that
/// (section headings, anchors, badges) is skipped; a formatting change
/// upstream degrades this source to fewer entries, never to an error.
pub struct CommunityReadmeProvider {
    raw_url: String,
    client: reqwest::Client,
}

impl CommunityReadmeProvider {
    pub const DEFAULT_RAW_URL: &'static str =
        "https://raw.githubusercontent.com/punkpeye/awesome-mcp-servers/main/README.md";

    pub fn new(raw_url: impl Into<String>) -> Self {
        Self {
            raw_url: raw_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for CommunityReadmeProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RAW_URL)
    }
}

#[async_trait]
impl CatalogProvider for CommunityReadmeProvider {
    fn source(&self) -> &str {
        "community"
    }

    async fn fetch(&self) -> anyhow::Result<Vec<DiscoveredEntry>> {
        let markdown = self
            .client
            .get(&self.raw_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let entries = parse_readme(&markdown);
        debug!(source = self.source(), entries = entries.len(), "README parsed");
        Ok(entries)
    }
}

fn parse_readme(markdown: &str) -> Vec<DiscoveredEntry> {
    let mut entries: Vec<DiscoveredEntry> = markdown.lines().filter_map(parse_readme_line).collect();
    // The same repo can be listed under several sections; keep the first.
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert((e.name.clone(), e.repository_url.clone())));
    entries
}

fn parse_readme_line(line: &str) -> Option<DiscoveredEntry> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("- [")
        .or_else(|| trimmed.strip_prefix("* ["))?;
    let (name, rest) = rest.split_once("](")?;
    let (url, rest) = rest.split_once(')')?;

    // In-page anchors and badges are not servers.
    if !url.starts_with("http") || name.is_empty() {
        return None;
    }

    let description = rest
        .trim_start_matches(|c: char| c == ' ' || c == '-' || c == '–' || c == ':')
        .trim()
        .to_string();

    Some(DiscoveredEntry {
        name: name.trim().to_string(),
        repository_url: Some(url.to_string()),
        description,
        tags: vec!["community".into()],
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_pagination() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v0/servers?limit=100")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"servers":[{"name":"a","description":"first"}],
                    "metadata":{"next_cursor":"c2"}}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/v0/servers?limit=100&cursor=c2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"servers":[{"name":"b","description":"second"}],"metadata":{}}"#)
            .create_async()
            .await;

        let provider = RegistryProvider::new(server.url());
        let entries = provider.fetch().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[1].name, "b");
    }

    #[tokio::test]
    async fn test_registry_remote_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v0/servers?limit=100")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"servers":[{"name":"r","remotes":[{"url":"https://mcp.example/sse"}],
                    "packages":[{"identifier":"@x/r"}],
                    "repository":{"url":"https://github.com/x/r"}}],"metadata":{}}"#,
            )
            .create_async()
            .await;

        let entries = RegistryProvider::new(server.url()).fetch().await.unwrap();
        assert_eq!(entries[0].endpoint_url.as_deref(), Some("https://mcp.example/sse"));
        assert!(entries[0].remote_capable);
        assert_eq!(entries[0].packages, vec!["@x/r"]);
    }

    #[tokio::test]
    async fn test_registry_http_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v0/servers?limit=100")
            .with_status(503)
            .create_async()
            .await;
        assert!(RegistryProvider::new(server.url()).fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_curated_builtin_nonempty() {
        let entries = CuratedProvider::builtin().fetch().await.unwrap();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| !e.packages.is_empty()));
    }

    #[test]
    fn test_readme_line_parsing() {
        let entry = parse_readme_line(
            "- [mcp-time](https://github.com/example/mcp-time) - Tells the time.",
        )
        .unwrap();
        assert_eq!(entry.name, "mcp-time");
        assert_eq!(
            entry.repository_url.as_deref(),
            Some("https://github.com/example/mcp-time")
        );
        assert_eq!(entry.description, "Tells the time.");
        assert_eq!(entry.tags, vec!["community"]);
    }

    #[test]
    fn test_readme_skips_non_entries() {
        assert!(parse_readme_line("## Browser Automation").is_none());
        assert!(parse_readme_line("- [What is MCP?](#what-is-mcp)").is_none());
        assert!(parse_readme_line("Plain prose about servers.").is_none());
    }

    #[test]
    fn test_readme_dedup_and_nesting() {
        let markdown = "\
# Awesome MCP Servers\n\
\n\
## Files\n\
- [fs](https://github.com/x/fs) - File access.\n\
  * [fs](https://github.com/x/fs) - File access.\n\
\n\
## Time\n\
* [time](https://github.com/x/time) – Clock tools.\n";
        let entries = parse_readme(markdown);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "fs");
        assert_eq!(entries[1].description, "Clock tools.");
    }

    #[tokio::test]
    async fn test_community_fetch_over_http() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/README.md")
            .with_status(200)
            .with_body("- [srv](https://github.com/x/srv) - A server.\n")
            .create_async()
            .await;

        let provider = CommunityReadmeProvider::new(format!("{}/README.md", server.url()));
        let entries = provider.fetch().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "srv");
    }

    #[tokio::test]
    async fn test_community_http_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/README.md")
            .with_status(404)
            .create_async()
            .await;
        let provider = CommunityReadmeProvider::new(format!("{}/README.md", server.url()));
        assert!(provider.fetch().await.is_err());
    }
}
