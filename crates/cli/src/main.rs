//! The `harbor` binary.
//!
//! With no subcommand it runs as the native-messaging helper on stdio. The
//! same binary is re-invoked by the helper for the forked run modes:
//! `catalog-worker` (memory- and crash-isolated catalog refresh) and
//! `mcp-runner <id>` (single-server supervisor).

mod providers;
mod runner;
mod worker;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "harbor", about = "Harbor — native helper for the browser agent platform")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom data directory (overrides default ~/.harbor/).
    #[arg(long, global = true, env = "HARBOR_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the native-messaging helper on stdio (default).
    Helper,
    /// Refresh the catalog once and exit (forked by the helper).
    CatalogWorker {
        /// Re-fetch providers whose cache is still fresh.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Supervise a single installed MCP server (forked by the helper).
    McpRunner {
        /// Installed server id.
        server_id: String,
    },
    /// Report detected runtimes and exit.
    Doctor,
}

fn init_tracing(level: &str, json: bool) {
    // stdout belongs to the native-messaging channel; logs go to stderr.
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Fork the catalog refresh into a child of the same binary so its memory and
/// crashes stay contained. Disabled with `HARBOR_NO_CATALOG_WORKER=1`; the
/// `catalog_refresh` handler refreshes inline either way.
fn spawn_catalog_worker() {
    if std::env::var("HARBOR_NO_CATALOG_WORKER").is_ok_and(|v| v == "1") {
        return;
    }
    let Ok(exe) = std::env::current_exe() else {
        return;
    };
    tokio::spawn(async move {
        match tokio::process::Command::new(exe)
            .arg("catalog-worker")
            .spawn()
        {
            Ok(mut child) => {
                let status = child.wait().await;
                info!(?status, "catalog worker exited");
            },
            Err(e) => tracing::warn!(error = %e, "failed to spawn catalog worker"),
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    if let Some(dir) = cli.data_dir.clone() {
        harbor_common::paths::set_data_dir(dir);
    }
    let data_dir = harbor_common::paths::data_dir();

    match cli.command.unwrap_or(Commands::Helper) {
        Commands::Helper => {
            info!(data_dir = %data_dir.display(), "starting helper");
            spawn_catalog_worker();
            let models = providers::router_from_env();
            let services = harbor_bridge::ServicesBuilder::new(data_dir, models)
                .build()
                .await?;
            harbor_bridge::run_helper(tokio::io::stdin(), tokio::io::stdout(), services).await
        },
        Commands::CatalogWorker { force } => worker::run(&data_dir, force).await,
        Commands::McpRunner { server_id } => runner::run(&data_dir, &server_id).await,
        Commands::Doctor => {
            let cache = harbor_installer::RuntimeCache::warm();
            let report = cache.report().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        },
    }
}
