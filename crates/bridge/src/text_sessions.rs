//! Helper-side state for `ai.createTextSession` handles.
//!
//! A text session is conversational: each prompt appends to its history.
//! Sessions never persist — they die with the helper or on `destroy`.

use std::collections::HashMap;

use {tokio::sync::Mutex, uuid::Uuid};

#[derive(Debug, Clone)]
pub struct TextSessionState {
    pub id: String,
    pub origin: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub messages: Vec<serde_json::Value>,
}

#[derive(Default)]
pub struct TextSessions {
    sessions: Mutex<HashMap<String, TextSessionState>>,
}

impl TextSessions {
    pub async fn create(
        &self,
        origin: &str,
        provider: Option<String>,
        model: Option<String>,
        temperature: Option<f32>,
        system_prompt: Option<String>,
    ) -> TextSessionState {
        let state = TextSessionState {
            id: Uuid::new_v4().to_string(),
            origin: origin.to_string(),
            provider,
            model,
            temperature,
            system_prompt,
            messages: Vec::new(),
        };
        self.sessions
            .lock()
            .await
            .insert(state.id.clone(), state.clone());
        state
    }

    pub async fn get(&self, id: &str) -> Option<TextSessionState> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Append one user/assistant exchange to the session's history.
    pub async fn record_exchange(&self, id: &str, input: &str, output: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(id) {
            state
                .messages
                .push(serde_json::json!({"role": "user", "content": input}));
            state
                .messages
                .push(serde_json::json!({"role": "assistant", "content": output}));
        }
    }

    /// Idempotent.
    pub async fn destroy(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }
}
