//! The forked MCP runner: supervise one installed server in its own process.

use std::path::Path;

use tracing::info;

use {
    harbor_installer::{Installer, RuntimeCache, SecretsStore},
    harbor_mcp::McpManager,
    harbor_oauth::{OAuthBroker, TokenSource, TokenStore},
};

pub async fn run(data_dir: &Path, server_id: &str) -> anyhow::Result<()> {
    let runtimes = RuntimeCache::warm();
    let installer = Installer::load(
        harbor_common::paths::installed_servers_path(data_dir),
        runtimes,
    )?;
    let secrets = SecretsStore::new(harbor_common::paths::credentials_path(data_dir));
    let oauth = OAuthBroker::new(
        TokenStore::new(harbor_common::paths::oauth_tokens_path(data_dir)),
        harbor_oauth::providers::host_capabilities_from_env(),
    );

    let server = installer
        .get(server_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("server '{server_id}' is not installed"))?;

    let oauth_env = match &server.manifest.oauth {
        Some(manifest) => {
            let source = oauth.check_oauth_capabilities(manifest)?;
            if source == TokenSource::Host || source == TokenSource::User {
                oauth.env_vars_for_server(server_id, manifest).await?
            } else {
                Default::default()
            }
        },
        None => Default::default(),
    };

    let spec = installer
        .launch_spec(server_id, secrets.get(server_id).await, oauth_env)
        .await?;

    let mcp = McpManager::new();
    mcp.configure(server_id, spec).await;
    mcp.start(server_id).await?;
    info!(server = %server_id, "mcp runner supervising server");

    tokio::signal::ctrl_c().await?;
    info!("mcp runner shutting down");
    mcp.shutdown_all().await;
    Ok(())
}
