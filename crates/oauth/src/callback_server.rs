use std::{collections::HashMap, future::IntoFuture, sync::Arc};

use {
    axum::{Router, extract::Query, response::Html, routing::get},
    tokio::sync::oneshot,
};

use crate::error::{Error, Result};

/// Starts a local HTTP server to receive the OAuth callback, then shuts down.
pub struct CallbackServer;

impl CallbackServer {
    /// Listen on `127.0.0.1:{port}` for a GET `/auth/callback` with `code`
    /// and `state` params. Validates state against `expected_state` and
    /// returns the authorization code. Times out after 60 seconds.
    pub async fn wait_for_code(port: u16, expected_state: String) -> Result<String> {
        let (tx, rx) = oneshot::channel::<Result<String>>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let app = Router::new().route(
            "/auth/callback",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let tx = tx.lock().unwrap_or_else(|e| e.into_inner()).take();
                async move {
                    let result = (|| {
                        let state = params
                            .get("state")
                            .ok_or_else(|| Error::message("missing state"))?;
                        if *state != expected_state {
                            return Err(Error::StateMismatch);
                        }
                        params
                            .get("code")
                            .cloned()
                            .ok_or_else(|| Error::message("missing code"))
                    })();

                    match result {
                        Ok(code) => {
                            if let Some(tx) = tx {
                                let _ = tx.send(Ok(code));
                            }
                            Html(
                                "<h1>Authentication successful!</h1><p>You can close this window.</p>"
                                    .to_string(),
                            )
                        },
                        Err(e) => {
                            let message = e.to_string();
                            if let Some(tx) = tx {
                                let _ = tx.send(Err(e));
                            }
                            Html(format!("<h1>Authentication failed</h1><p>{message}</p>"))
                        },
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await?;
        let server = axum::serve(listener, app);

        tokio::select! {
            result = rx => {
                result.map_err(|_| Error::message("callback channel dropped"))?
            }
            _ = server.into_future() => {
                Err(Error::message("callback server exited unexpectedly"))
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {
                Err(Error::message("OAuth callback timed out after 60 seconds"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_callback_receives_code() {
        let port = 18976;
        let state = "expected-state".to_string();
        let handle =
            tokio::spawn(async move { CallbackServer::wait_for_code(port, state).await });

        // Give the listener a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let url = format!(
            "http://127.0.0.1:{port}/auth/callback?code=auth-code-1&state=expected-state"
        );
        reqwest::get(&url).await.unwrap().error_for_status().unwrap();

        let code = handle.await.unwrap().unwrap();
        assert_eq!(code, "auth-code-1");
    }

    #[tokio::test]
    async fn test_callback_rejects_state_mismatch() {
        let port = 18977;
        let handle = tokio::spawn(async move {
            CallbackServer::wait_for_code(port, "right".to_string()).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let url = format!("http://127.0.0.1:{port}/auth/callback?code=c&state=wrong");
        reqwest::get(&url).await.unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::StateMismatch)
        ));
    }
}
