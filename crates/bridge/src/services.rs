//! Composition root.
//!
//! Every subsystem is constructed here and passed by `Arc` — no process-wide
//! singletons. The forked run modes (catalog worker, MCP runner) build a
//! narrower set from the same pieces.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use {
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    harbor_broker::{GrantStore, PendingPrompts, PermissionBroker, PermissionPrompter},
    harbor_catalog::{
        CatalogManager, CatalogStore, CommunityReadmeProvider, CuratedProvider, RegistryProvider,
    },
    harbor_installer::{Installer, RuntimeCache, SecretsStore},
    harbor_mcp::McpManager,
    harbor_models::ProviderRouter,
    harbor_oauth::{OAuthBroker, TokenStore},
};

use crate::text_sessions::TextSessions;

/// Where unsolicited frames (permission prompts, stream events) go. The loop
/// installs the sender once its writer task exists; anything emitted before
/// that is dropped.
#[derive(Clone, Default)]
pub struct EventSink {
    inner: Arc<Mutex<Option<mpsc::Sender<serde_json::Value>>>>,
}

impl EventSink {
    pub async fn install(&self, sender: mpsc::Sender<serde_json::Value>) {
        *self.inner.lock().await = Some(sender);
    }

    /// Drop the sender so the writer task can observe channel close.
    pub async fn clear(&self) {
        *self.inner.lock().await = None;
    }

    pub async fn send(&self, frame: serde_json::Value) -> bool {
        let sender = self.inner.lock().await.clone();
        match sender {
            Some(sender) => sender.send(frame).await.is_ok(),
            None => false,
        }
    }
}

/// In-flight streaming requests, cancellable by id via `abort` frames.
#[derive(Default)]
pub struct Aborts {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Aborts {
    pub async fn register(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .await
            .insert(request_id.to_string(), token.clone());
        token
    }

    pub async fn cancel(&self, request_id: &str) {
        if let Some(token) = self.tokens.lock().await.remove(request_id) {
            token.cancel();
        }
    }

    pub async fn forget(&self, request_id: &str) {
        self.tokens.lock().await.remove(request_id);
    }
}

pub struct Services {
    pub broker: Arc<PermissionBroker>,
    pub prompts: Arc<PendingPrompts>,
    pub mcp: Arc<McpManager>,
    pub oauth: Arc<OAuthBroker>,
    pub catalog: Arc<CatalogManager>,
    pub models: Arc<ProviderRouter>,
    pub installer: Arc<Installer>,
    pub secrets: Arc<SecretsStore>,
    pub text_sessions: TextSessions,
    pub aborts: Aborts,
    pub events: EventSink,
}

impl Services {
    /// Helper shutdown: children die with us.
    pub async fn shutdown(&self) {
        info!("shutting down services");
        self.mcp.shutdown_all().await;
    }
}

pub struct ServicesBuilder {
    data_dir: PathBuf,
    models: Arc<ProviderRouter>,
    prompter: Option<Arc<dyn PermissionPrompter>>,
    catalog_store: Option<CatalogStore>,
}

impl ServicesBuilder {
    pub fn new(data_dir: PathBuf, models: Arc<ProviderRouter>) -> Self {
        Self {
            data_dir,
            models,
            prompter: None,
            catalog_store: None,
        }
    }

    /// Override the prompter (tests; the default routes through the
    /// extension).
    pub fn with_prompter(mut self, prompter: Arc<dyn PermissionPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_catalog_store(mut self, store: CatalogStore) -> Self {
        self.catalog_store = Some(store);
        self
    }

    pub async fn build(self) -> anyhow::Result<Arc<Services>> {
        let root = &self.data_dir;
        harbor_common::paths::ensure_private_dir(root)?;

        let events = EventSink::default();
        let prompts = PendingPrompts::new();
        let prompter = match self.prompter {
            Some(prompter) => prompter,
            None => Arc::new(crate::prompter::ExtensionPrompter::new(
                Arc::clone(&prompts),
                events.clone(),
            )),
        };

        let grants = GrantStore::load(&harbor_common::paths::permissions_path(root))?;
        let broker = Arc::new(PermissionBroker::new(grants, prompter));

        let token_store = TokenStore::new(harbor_common::paths::oauth_tokens_path(root));
        let oauth = Arc::new(OAuthBroker::new(
            token_store,
            harbor_oauth::providers::host_capabilities_from_env(),
        ));

        let catalog_store = match self.catalog_store {
            Some(store) => store,
            None => CatalogStore::open(&harbor_common::paths::catalog_db_path(root)).await?,
        };
        let catalog = Arc::new(CatalogManager::new(catalog_store, vec![
            Box::new(RegistryProvider::default()),
            Box::new(CuratedProvider::builtin()),
            Box::new(CommunityReadmeProvider::default()),
        ]));

        let runtimes = RuntimeCache::warm();
        let installer = Arc::new(Installer::load(
            harbor_common::paths::installed_servers_path(root),
            runtimes,
        )?);
        let secrets = Arc::new(SecretsStore::new(harbor_common::paths::credentials_path(
            root,
        )));

        Ok(Arc::new(Services {
            broker,
            prompts,
            mcp: Arc::new(McpManager::new()),
            oauth,
            catalog,
            models: self.models,
            installer,
            secrets,
            text_sessions: TextSessions::default(),
            aborts: Aborts::default(),
            events,
        }))
    }
}
