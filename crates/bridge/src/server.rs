//! The helper's main loop: framed messages in, framed responses and events
//! out.
//!
//! Handlers run as spawned tasks, so a handler parked on an OAuth callback or
//! a slow MCP child never blocks the loop; responses leave in completion
//! order and the background router re-correlates by `request_id`. The single
//! writer task owns the outbound half, so frames are never interleaved.

use std::sync::Arc;

use {
    serde::Deserialize,
    tokio::{
        io::{AsyncRead, AsyncWrite},
        sync::mpsc,
    },
    tracing::{debug, info, warn},
};

use harbor_protocol::{
    ErrorShape, FrameError, NativeErrorFrame, NativeRequest, NativeResponse, error_codes,
    framing::{read_frame, write_frame},
    native::msg,
};

use crate::{methods, services::Services};

/// How often the proactive OAuth refresh sweep runs.
const REFRESH_SWEEP_SECS: u64 = 60;

/// Outbound frame queue depth; a stalled consumer beyond this backpressures
/// producers, which reduce to abort.
const OUT_QUEUE_DEPTH: usize = 256;

/// Run the helper loop until EOF or transport failure.
pub async fn run_helper<R, W>(
    mut reader: R,
    mut writer: W,
    services: Arc<Services>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<serde_json::Value>(OUT_QUEUE_DEPTH);
    services.events.install(out_tx.clone()).await;

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!(error = %e, "writing frame failed, stopping writer");
                break;
            }
        }
    });

    // Proactive token refresh, per the 5-minute-before-expiry policy.
    let refresher = {
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(REFRESH_SWEEP_SECS));
            tick.tick().await;
            loop {
                tick.tick().await;
                services.oauth.refresh_expiring().await;
            }
        })
    };

    info!(version = env!("CARGO_PKG_VERSION"), "helper loop started");

    loop {
        match read_frame(&mut reader).await {
            Ok(value) => handle_frame(&services, &out_tx, value).await,
            Err(FrameError::Eof) => {
                info!("native channel closed, shutting down");
                break;
            },
            Err(FrameError::TooLarge { len }) => {
                debug!(len, "oversize frame rejected");
                send_unsolicited_error(
                    &out_tx,
                    ErrorShape::new(
                        error_codes::MESSAGE_TOO_LARGE,
                        format!("frame of {len} bytes exceeds the limit"),
                    ),
                )
                .await;
            },
            Err(FrameError::Invalid(message)) => {
                debug!(%message, "malformed frame rejected");
                send_unsolicited_error(
                    &out_tx,
                    ErrorShape::new(error_codes::INVALID_MESSAGE, message),
                )
                .await;
            },
            Err(FrameError::Io(e)) => {
                warn!(error = %e, "transport failure, exiting loop");
                break;
            },
        }
    }

    refresher.abort();
    services.shutdown().await;
    services.events.clear().await;
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

async fn send_unsolicited_error(out: &mpsc::Sender<serde_json::Value>, error: ErrorShape) {
    let frame = NativeErrorFrame::unsolicited(error);
    let _ = out.send(serde_json::to_value(&frame).unwrap_or_default()).await;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionPayload {
    scopes: std::collections::HashMap<harbor_protocol::Scope, harbor_protocol::GrantState>,
    #[serde(default)]
    allowed_tools: Option<Vec<String>>,
}

async fn handle_frame(
    services: &Arc<Services>,
    out: &mpsc::Sender<serde_json::Value>,
    value: serde_json::Value,
) {
    let request: NativeRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            send_unsolicited_error(
                out,
                ErrorShape::new(
                    error_codes::INVALID_MESSAGE,
                    format!("frame is not a request envelope: {e}"),
                ),
            )
            .await;
            return;
        },
    };

    match request.request_type.as_str() {
        // Control frames handled inline; they never produce a response.
        msg::ABORT => {
            debug!(request_id = %request.request_id, "abort received");
            services.aborts.cancel(&request.request_id).await;
        },
        msg::PAGE_RESET => {
            if let Some(origin) = request.payload.get("origin").and_then(|v| v.as_str()) {
                debug!(origin, "page reset");
                services.broker.page_reset(origin).await;
            }
        },
        msg::PERMISSION_DECISION => {
            let decision: DecisionPayload = match serde_json::from_value(request.payload_value()) {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(error = %e, "malformed permission decision ignored");
                    return;
                },
            };
            services
                .prompts
                .resolve(&request.request_id, harbor_broker::PromptDecision {
                    scopes: decision.scopes,
                    allowed_tools: decision.allowed_tools,
                })
                .await;
        },

        request_type if methods::is_streaming(request_type) => {
            let services = Arc::clone(services);
            let out = out.clone();
            tokio::spawn(async move {
                match request.request_type.as_str() {
                    msg::AGENT_RUN => {
                        methods::agent::run_streaming(services, request, out).await;
                    },
                    msg::SESSION_PROMPT_STREAMING => {
                        methods::ai::session_prompt_streaming(services, request, out).await;
                    },
                    _ => {},
                }
            });
        },

        _ => {
            let services = Arc::clone(services);
            let out = out.clone();
            tokio::spawn(async move {
                let request_id = request.request_id.clone();
                let frame = match methods::dispatch(&services, &request).await {
                    Ok(result) => serde_json::to_value(&NativeResponse::ok(&request_id, result)),
                    Err(error) => {
                        serde_json::to_value(&NativeErrorFrame::new(&request_id, error))
                    },
                };
                match frame {
                    Ok(frame) => {
                        let _ = out.send(frame).await;
                    },
                    Err(e) => {
                        // Serialization of our own response failing is the
                        // catch-all path.
                        let frame = NativeErrorFrame::new(
                            &request_id,
                            ErrorShape::internal(e.to_string()),
                        );
                        let _ = out
                            .send(serde_json::to_value(&frame).unwrap_or_default())
                            .await;
                    },
                }
            });
        },
    }
}
