//! Permission prompter that round-trips through the extension.
//!
//! The broker asks; we push an unsolicited `permission_prompt` frame to the
//! background script, which opens the prompt window. The user's choice comes
//! back as a `permission_decision` request that the loop feeds into
//! [`PendingPrompts`].

use std::sync::Arc;

use {async_trait::async_trait, tracing::warn};

use harbor_broker::{
    BrokerError, PendingPrompts, PermissionPrompter, PromptDecision, PromptRequest,
};

use crate::services::EventSink;

pub struct ExtensionPrompter {
    prompts: Arc<PendingPrompts>,
    events: EventSink,
}

impl ExtensionPrompter {
    pub fn new(prompts: Arc<PendingPrompts>, events: EventSink) -> Self {
        Self { prompts, events }
    }
}

#[async_trait]
impl PermissionPrompter for ExtensionPrompter {
    async fn prompt(&self, request: PromptRequest) -> harbor_broker::Result<PromptDecision> {
        let rx = self.prompts.register(&request.id).await;

        let frame = serde_json::json!({
            "type": "permission_prompt",
            "request_id": request.id,
            "prompt": request,
        });
        if !self.events.send(frame).await {
            warn!(id = %request.id, "no channel to deliver permission prompt");
            return Err(BrokerError::PromptFailed(
                "no connection to the extension".into(),
            ));
        }

        self.prompts.wait(&request, rx).await
    }
}
