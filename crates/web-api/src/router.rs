//! The background router: correlation, timeouts, stream ordering, abort.
//!
//! One router instance serves every page. Pages call [`PageRouter::request`]
//! / [`PageRouter::request_streaming`]; the helper side consumes the frame
//! receiver handed out by [`PageRouter::connect_helper`] and feeds replies
//! back through [`PageRouter::handle_helper_frame`].

use std::{collections::HashMap, pin::Pin, sync::Arc, task::Poll};

use {
    tokio::sync::{Mutex, RwLock, mpsc, oneshot},
    tokio_stream::Stream,
    tracing::{debug, warn},
    uuid::Uuid,
};

use harbor_protocol::{
    ErrorShape, PageResponse, PageStreamEvent, REQUEST_TIMEOUT_SECS, error_codes, native::msg,
};

enum Pending {
    Single(oneshot::Sender<PageResponse>),
    Stream(mpsc::Sender<PageStreamEvent>),
}

#[derive(Default)]
pub struct PageRouter {
    helper: RwLock<Option<mpsc::Sender<serde_json::Value>>>,
    pending: Mutex<HashMap<String, Pending>>,
}

impl PageRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach the native channel. The returned receiver yields frames to
    /// write to the helper; a reconnect replaces any previous channel.
    pub async fn connect_helper(&self) -> mpsc::Receiver<serde_json::Value> {
        let (tx, rx) = mpsc::channel(64);
        *self.helper.write().await = Some(tx);
        rx
    }

    pub async fn disconnect_helper(&self) {
        *self.helper.write().await = None;
    }

    pub async fn is_connected(&self) -> bool {
        self.helper.read().await.is_some()
    }

    async fn forward(
        &self,
        request_type: &str,
        request_id: &str,
        origin: &str,
        payload: serde_json::Value,
    ) -> Result<(), ErrorShape> {
        let helper = self.helper.read().await.clone();
        let Some(helper) = helper else {
            return Err(ErrorShape::new(
                error_codes::ERR_HARBOR_NOT_FOUND,
                "no helper connection",
            ));
        };

        // The background script is the trust boundary for origin: pages never
        // supply it, the router stamps it.
        let mut frame = match payload {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            serde_json::Value::Null => serde_json::json!({}),
            other => serde_json::json!({"payload": other}),
        };
        frame["type"] = serde_json::json!(request_type);
        frame["request_id"] = serde_json::json!(request_id);
        if !origin.is_empty() {
            frame["origin"] = serde_json::json!(origin);
        }

        helper.send(frame).await.map_err(|_| {
            ErrorShape::new(error_codes::ERR_HARBOR_NOT_FOUND, "helper channel closed")
        })
    }

    /// One-shot request with the standard 30 s budget.
    pub async fn request(
        &self,
        origin: &str,
        request_type: &str,
        payload: serde_json::Value,
    ) -> PageResponse {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id.clone(), Pending::Single(tx));

        if let Err(error) = self.forward(request_type, &id, origin, payload).await {
            self.pending.lock().await.remove(&id);
            return PageResponse::err(id, error);
        }

        match tokio::time::timeout(
            std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS),
            rx,
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => PageResponse::err(
                id,
                ErrorShape::internal("router dropped the pending request"),
            ),
            Err(_) => {
                debug!(id, request_type, "request timed out");
                self.pending.lock().await.remove(&id);
                PageResponse::err(
                    id,
                    ErrorShape::timeout(format!(
                        "no response within {REQUEST_TIMEOUT_SECS}s"
                    )),
                )
            },
        }
    }

    /// Streaming request: events for the id arrive strictly ordered; there is
    /// no wall timeout. Dropping the handle aborts the upstream work.
    pub async fn request_streaming(
        self: &Arc<Self>,
        origin: &str,
        request_type: &str,
        payload: serde_json::Value,
    ) -> Result<StreamHandle, ErrorShape> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(64);
        self.pending
            .lock()
            .await
            .insert(id.clone(), Pending::Stream(tx));

        if let Err(error) = self.forward(request_type, &id, origin, payload).await {
            self.pending.lock().await.remove(&id);
            return Err(error);
        }

        Ok(StreamHandle {
            id,
            router: Arc::clone(self),
            receiver: rx,
            done: false,
        })
    }

    /// Best-effort abort: stop delivering events and tell the helper to
    /// cancel upstream.
    pub async fn abort(&self, id: &str) {
        self.pending.lock().await.remove(id);
        let _ = self
            .forward(msg::ABORT, id, "", serde_json::json!({}))
            .await;
    }

    /// The content script for `origin` disconnected (navigation or tab
    /// close): tell the helper so page-lifetime grants are consumed and
    /// implicit sessions end.
    pub async fn notify_page_closed(&self, origin: &str) {
        let _ = self
            .forward(msg::PAGE_RESET, "", origin, serde_json::json!({}))
            .await;
    }

    /// Feed one helper frame back into the router.
    pub async fn handle_helper_frame(&self, frame: serde_json::Value) {
        let Some(request_id) = frame["request_id"].as_str().map(ToString::to_string) else {
            warn!("helper frame without request_id dropped");
            return;
        };

        match frame["type"].as_str() {
            Some("response") => {
                if let Some(Pending::Single(tx)) =
                    self.pending.lock().await.remove(&request_id)
                {
                    let _ = tx.send(PageResponse::ok(
                        &request_id,
                        frame.get("result").cloned().unwrap_or_default(),
                    ));
                }
            },
            Some("error") => {
                let error: ErrorShape = serde_json::from_value(frame["error"].clone())
                    .unwrap_or_else(|_| ErrorShape::internal("malformed error frame"));
                match self.pending.lock().await.remove(&request_id) {
                    Some(Pending::Single(tx)) => {
                        let _ = tx.send(PageResponse::err(&request_id, error));
                    },
                    Some(Pending::Stream(tx)) => {
                        let _ = tx
                            .send(PageStreamEvent {
                                id: request_id.clone(),
                                event: serde_json::json!({"type": "error", "error": error}),
                                done: Some(true),
                            })
                            .await;
                    },
                    None => debug!(id = %request_id, "error frame for unknown request"),
                }
            },
            Some("stream_event") => {
                let done = frame["done"].as_bool() == Some(true);
                let mut pending = self.pending.lock().await;
                let Some(Pending::Stream(tx)) = pending.get(&request_id) else {
                    debug!(id = %request_id, "stream event for unknown request");
                    return;
                };
                let event = PageStreamEvent {
                    id: request_id.clone(),
                    event: frame.get("event").cloned().unwrap_or_default(),
                    done: done.then_some(true),
                };
                // Send while holding the lock keeps per-id ordering strict.
                let _ = tx.send(event).await;
                if done {
                    pending.remove(&request_id);
                }
            },
            other => warn!(?other, "unrecognized helper frame type"),
        }
    }
}

/// A live stream for one request id. Dropping it (or calling
/// [`StreamHandle::abort`]) cancels the upstream work.
pub struct StreamHandle {
    id: String,
    router: Arc<PageRouter>,
    receiver: mpsc::Receiver<PageStreamEvent>,
    done: bool,
}

impl StreamHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn abort(mut self) {
        self.done = true;
        self.receiver.close();
        self.router.abort(&self.id).await;
    }
}

impl Stream for StreamHandle {
    type Item = PageStreamEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.done == Some(true) {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.done {
            let router = Arc::clone(&self.router);
            let id = self.id.clone();
            tokio::spawn(async move { router.abort(&id).await });
        }
    }
}
