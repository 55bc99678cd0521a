//! Install-state persistence and launch-spec resolution.

use std::{collections::HashMap, path::PathBuf};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::{debug, info},
};

use harbor_mcp::LaunchSpec;

use crate::{
    manifest::{PackageKind, PackageSpec, ServerManifest},
    runtimes::{RuntimeCache, RuntimeKind},
};

/// Wire-visible install state. `Running`/`Failed` are derived by combining
/// with the MCP manager's state machine; this store only persists
/// `Absent`/`Installed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallState {
    Absent,
    Installed,
    Running,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledServer {
    pub manifest: ServerManifest,
    pub installed_at: u64,
    #[serde(default)]
    pub env_overrides: HashMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstalledFile {
    #[serde(default)]
    servers: HashMap<String, InstalledServer>,
}

pub struct Installer {
    path: PathBuf,
    runtimes: RuntimeCache,
    installed: RwLock<InstalledFile>,
}

impl Installer {
    /// Load `installed_servers.json`, starting empty when absent.
    pub fn load(path: PathBuf, runtimes: RuntimeCache) -> anyhow::Result<Self> {
        let installed: InstalledFile = harbor_common::read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            runtimes,
            installed: RwLock::new(installed),
        })
    }

    fn save(&self, file: &InstalledFile) -> anyhow::Result<()> {
        harbor_common::write_json_private(&self.path, file)?;
        Ok(())
    }

    pub fn runtimes(&self) -> &RuntimeCache {
        &self.runtimes
    }

    /// Pick the package a manifest would launch with: the container runtime
    /// when native code demands it (and docker exists), otherwise the first
    /// package whose runtime is available.
    pub fn resolve_package<'m>(&self, manifest: &'m ServerManifest) -> Option<&'m PackageSpec> {
        if manifest.runtime.has_native_code {
            if let Some(pkg) = manifest
                .packages
                .iter()
                .find(|p| p.kind == PackageKind::Container)
            {
                if self.runtimes.available(RuntimeKind::Container) {
                    return Some(pkg);
                }
            }
        }
        manifest
            .packages
            .iter()
            .find(|p| self.runtimes.available(p.kind.runtime()))
    }

    /// Register a server as installed. Fails when no package is launchable on
    /// this machine.
    pub async fn install(&self, manifest: ServerManifest) -> anyhow::Result<()> {
        if self.resolve_package(&manifest).is_none() {
            anyhow::bail!(
                "no launchable package for '{}': required runtimes are not installed",
                manifest.id
            );
        }

        let mut file = self.installed.write().await;
        info!(server = %manifest.id, "installing server");
        file.servers.insert(manifest.id.clone(), InstalledServer {
            manifest,
            installed_at: now_secs(),
            env_overrides: HashMap::new(),
        });
        self.save(&file)
    }

    pub async fn uninstall(&self, id: &str) -> anyhow::Result<bool> {
        let mut file = self.installed.write().await;
        let removed = file.servers.remove(id).is_some();
        if removed {
            info!(server = %id, "uninstalled server");
            self.save(&file)?;
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<InstalledServer> {
        self.installed.read().await.servers.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<InstalledServer> {
        let file = self.installed.read().await;
        let mut servers: Vec<InstalledServer> = file.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        servers
    }

    pub async fn set_env_overrides(
        &self,
        id: &str,
        env: HashMap<String, String>,
    ) -> anyhow::Result<bool> {
        let mut file = self.installed.write().await;
        let Some(server) = file.servers.get_mut(id) else {
            return Ok(false);
        };
        server.env_overrides = env;
        self.save(&file)?;
        Ok(true)
    }

    /// Resolve the full launch spec for a server.
    ///
    /// Env precedence, later wins: manifest env → user secrets → user env
    /// overrides → OAuth env. The child also inherits the helper's process
    /// env, so anything here is additive.
    pub async fn launch_spec(
        &self,
        id: &str,
        secrets: HashMap<String, String>,
        oauth_env: HashMap<String, String>,
    ) -> anyhow::Result<LaunchSpec> {
        let server = self
            .get(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("server '{id}' is not installed"))?;
        let package = self
            .resolve_package(&server.manifest)
            .ok_or_else(|| anyhow::anyhow!("no launchable package for '{id}'"))?;

        let mut env = server.manifest.env.clone();
        env.extend(secrets);
        env.extend(server.env_overrides.clone());
        env.extend(oauth_env);

        let spec = match package.kind {
            PackageKind::Node => {
                let runner = self.runner_path(RuntimeKind::Node)?;
                let mut args = vec!["-y".to_string(), versioned(package, "@")];
                args.extend(package.args.clone());
                LaunchSpec {
                    command: runner,
                    args,
                    env,
                }
            },
            PackageKind::Python => {
                let runner = self.runner_path(RuntimeKind::Python)?;
                let mut args = vec![versioned(package, "==")];
                args.extend(package.args.clone());
                LaunchSpec {
                    command: runner,
                    args,
                    env,
                }
            },
            PackageKind::Container => {
                let runner = self.runner_path(RuntimeKind::Container)?;
                let mut args = vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];
                // Values travel through the client env, not the command line.
                let mut keys: Vec<&String> = env.keys().collect();
                keys.sort();
                for key in keys {
                    args.push("-e".to_string());
                    args.push(key.clone());
                }
                args.push(package.identifier.clone());
                args.extend(package.args.clone());
                LaunchSpec {
                    command: runner,
                    args,
                    env,
                }
            },
            PackageKind::Binary => LaunchSpec {
                command: package.identifier.clone(),
                args: package.args.clone(),
                env,
            },
        };

        debug!(server = %id, command = %spec.command, "resolved launch spec");
        Ok(spec)
    }

    fn runner_path(&self, kind: RuntimeKind) -> anyhow::Result<String> {
        self.runtimes
            .path(kind)
            .map(|p| p.display().to_string())
            .ok_or_else(|| anyhow::anyhow!("runtime {kind:?} is not available"))
    }
}

fn versioned(package: &PackageSpec, separator: &str) -> String {
    match &package.version {
        Some(version) => format!("{}{}{}", package.identifier, separator, version),
        None => package.identifier.clone(),
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use {super::*, crate::manifest::RuntimeHints};

    fn manifest(id: &str, packages: Vec<PackageSpec>, native: bool) -> ServerManifest {
        ServerManifest {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            packages,
            env: HashMap::from([("TZ".to_string(), "UTC".to_string())]),
            oauth: None,
            runtime: RuntimeHints {
                has_native_code: native,
            },
        }
    }

    fn node_pkg() -> PackageSpec {
        PackageSpec {
            kind: PackageKind::Node,
            identifier: "@example/mcp-time".into(),
            version: Some("1.2.0".into()),
            args: vec!["--utc".into()],
        }
    }

    fn container_pkg() -> PackageSpec {
        PackageSpec {
            kind: PackageKind::Container,
            identifier: "ghcr.io/example/mcp-time:latest".into(),
            version: None,
            args: Vec::new(),
        }
    }

    fn installer_with(runtimes: RuntimeCache) -> Installer {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed_servers.json");
        // Keep the tempdir alive through the test by leaking it; each test
        // process cleans up via the OS tempdir.
        std::mem::forget(dir);
        Installer::load(path, runtimes).unwrap()
    }

    fn node_only() -> RuntimeCache {
        RuntimeCache::with_entries([(RuntimeKind::Node, PathBuf::from("/usr/bin/npx"))])
    }

    fn node_and_docker() -> RuntimeCache {
        RuntimeCache::with_entries([
            (RuntimeKind::Node, PathBuf::from("/usr/bin/npx")),
            (RuntimeKind::Container, PathBuf::from("/usr/bin/docker")),
        ])
    }

    #[tokio::test]
    async fn test_install_requires_launchable_runtime() {
        let installer = installer_with(RuntimeCache::with_entries([]));
        let err = installer
            .install(manifest("t", vec![node_pkg()], false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no launchable package"));
    }

    #[tokio::test]
    async fn test_install_list_uninstall_round_trip() {
        let installer = installer_with(node_only());
        installer
            .install(manifest("time-wasm", vec![node_pkg()], false))
            .await
            .unwrap();

        let listed = installer.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].manifest.id, "time-wasm");

        assert!(installer.uninstall("time-wasm").await.unwrap());
        assert!(!installer.uninstall("time-wasm").await.unwrap());
        assert!(installer.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_node_launch_spec() {
        let installer = installer_with(node_only());
        installer
            .install(manifest("t", vec![node_pkg()], false))
            .await
            .unwrap();

        let spec = installer
            .launch_spec("t", HashMap::new(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(spec.command, "/usr/bin/npx");
        assert_eq!(spec.args, vec!["-y", "@example/mcp-time@1.2.0", "--utc"]);
        assert_eq!(spec.env["TZ"], "UTC");
    }

    #[tokio::test]
    async fn test_native_code_prefers_container() {
        let installer = installer_with(node_and_docker());
        installer
            .install(manifest("t", vec![node_pkg(), container_pkg()], true))
            .await
            .unwrap();

        let spec = installer
            .launch_spec("t", HashMap::new(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(spec.command, "/usr/bin/docker");
        assert_eq!(spec.args[..3], ["run", "-i", "--rm"]);
        assert!(spec.args.contains(&"ghcr.io/example/mcp-time:latest".to_string()));
        // Env keys are forwarded as -e flags, values stay off the cmdline.
        assert!(spec.args.windows(2).any(|w| w[0] == "-e" && w[1] == "TZ"));
        assert!(!spec.args.iter().any(|a| a.contains("UTC")));
    }

    #[tokio::test]
    async fn test_native_code_without_docker_falls_back() {
        let installer = installer_with(node_only());
        installer
            .install(manifest("t", vec![node_pkg(), container_pkg()], true))
            .await
            .unwrap();
        let spec = installer
            .launch_spec("t", HashMap::new(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(spec.command, "/usr/bin/npx");
    }

    #[tokio::test]
    async fn test_env_merge_precedence() {
        let installer = installer_with(node_only());
        let mut m = manifest("t", vec![node_pkg()], false);
        m.env.insert("SHARED".into(), "manifest".into());
        installer.install(m).await.unwrap();
        installer
            .set_env_overrides("t", HashMap::from([("SHARED".to_string(), "override".to_string())]))
            .await
            .unwrap();

        let spec = installer
            .launch_spec(
                "t",
                HashMap::from([("SECRET_KEY".to_string(), "s3cr3t".to_string())]),
                HashMap::from([("GMAIL_ACCESS_TOKEN".to_string(), "tok".to_string())]),
            )
            .await
            .unwrap();

        assert_eq!(spec.env["SHARED"], "override", "user override beats manifest");
        assert_eq!(spec.env["SECRET_KEY"], "s3cr3t");
        assert_eq!(spec.env["GMAIL_ACCESS_TOKEN"], "tok");
        assert_eq!(spec.env["TZ"], "UTC");
    }

    #[tokio::test]
    async fn test_persistence_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed_servers.json");

        let installer = Installer::load(path.clone(), node_only()).unwrap();
        installer
            .install(manifest("t", vec![node_pkg()], false))
            .await
            .unwrap();
        drop(installer);

        let reloaded = Installer::load(path, node_only()).unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
    }
}
