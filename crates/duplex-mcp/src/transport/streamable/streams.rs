//! SSE stream registry for the Streamable HTTP server transport.
//!
//! Two stream flavors exist per client:
//!
//! - request streams (`{client}:request:{id}`): opened for every POSTed MCP
//!   request, carry server frames related to that request, and auto-close
//!   after the response frame
//! - server streams (`{client}:server:{uuid}`): opened by GET, long-lived,
//!   carry server-initiated traffic with no originating request
//!
//! Each stream is a single-producer/single-consumer queue: session-layer
//! senders push frames, the HTTP response body drains them as SSE events.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Mutex;

use axum::response::sse::Event;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::jsonrpc::RequestId;

/// One queued item: a frame to emit, or an instruction to end the stream.
#[derive(Debug)]
pub enum StreamFrame {
    Frame(Value),
    Close,
}

/// True if the frame completes a request (carries `result` or `error`).
#[must_use]
pub fn is_response_frame(frame: &Value) -> bool {
    frame.get("result").is_some() || frame.get("error").is_some()
}

/// Consumer end of one SSE stream, handed to the HTTP response.
pub struct StreamHandle {
    stream_id: String,
    receiver: mpsc::UnboundedReceiver<StreamFrame>,
}

impl StreamHandle {
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Turn the queue into an SSE event stream.
    ///
    /// Emits one `data: <minified JSON>` event per frame. Exits on the close
    /// instruction, and after emitting a response frame to honor the
    /// always-stream invariant.
    pub fn into_event_stream(self) -> impl Stream<Item = Result<Event, Infallible>> {
        let StreamHandle { stream_id, mut receiver } = self;
        async_stream::stream! {
            while let Some(item) = receiver.recv().await {
                match item {
                    StreamFrame::Close => {
                        tracing::debug!(stream = %stream_id, "Stream closed");
                        break;
                    }
                    StreamFrame::Frame(frame) => {
                        let done = is_response_frame(&frame);
                        let data = serde_json::to_string(&frame)
                            .expect("frame serializes");
                        yield Ok::<_, Infallible>(Event::default().data(data));
                        if done {
                            tracing::debug!(stream = %stream_id, "Response sent; auto-closing stream");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    streams: HashMap<String, mpsc::UnboundedSender<StreamFrame>>,
    by_client: HashMap<String, HashSet<String>>,
}

/// Owns every open SSE stream and routes outbound frames onto them.
#[derive(Default)]
pub struct StreamManager {
    registry: Mutex<Registry>,
}

fn request_stream_id(client_id: &str, request_id: &RequestId) -> String {
    format!("{client_id}:request:{request_id}")
}

impl StreamManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, stream_id: String, client_id: &str) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().expect("stream registry lock poisoned");
        registry.streams.insert(stream_id.clone(), tx);
        registry.by_client.entry(client_id.to_string()).or_default().insert(stream_id.clone());
        tracing::debug!(stream = %stream_id, client = %client_id, "Created stream");
        StreamHandle { stream_id, receiver: rx }
    }

    /// Open the ephemeral stream answering one POSTed request.
    #[must_use]
    pub fn create_request_stream(&self, client_id: &str, request_id: &RequestId) -> StreamHandle {
        self.register(request_stream_id(client_id, request_id), client_id)
    }

    /// Open a long-lived stream for server-initiated traffic.
    #[must_use]
    pub fn create_server_stream(&self, client_id: &str) -> StreamHandle {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.register(format!("{client_id}:server:{}", &suffix[..8]), client_id)
    }

    /// Route a frame to the client.
    ///
    /// With an originating request id the frame goes to that request's
    /// stream, which is torn down once the frame is a response. Otherwise
    /// any open server stream takes it. Returns false if no stream could
    /// accept the frame.
    #[must_use]
    pub fn send(
        &self,
        client_id: &str,
        frame: &Value,
        originating_request_id: Option<&RequestId>,
    ) -> bool {
        if let Some(request_id) = originating_request_id {
            let stream_id = request_stream_id(client_id, request_id);
            let sent = self.send_to_stream(&stream_id, frame);
            if sent && is_response_frame(frame) {
                self.remove_stream(&stream_id);
            }
            return sent;
        }

        let server_streams: Vec<String> = {
            let registry = self.registry.lock().expect("stream registry lock poisoned");
            registry
                .by_client
                .get(client_id)
                .map(|ids| {
                    let mut ids: Vec<String> = ids
                        .iter()
                        .filter(|id| id.starts_with(&format!("{client_id}:server:")))
                        .cloned()
                        .collect();
                    ids.sort();
                    ids
                })
                .unwrap_or_default()
        };

        for stream_id in server_streams {
            if self.send_to_stream(&stream_id, frame) {
                return true;
            }
        }
        false
    }

    fn send_to_stream(&self, stream_id: &str, frame: &Value) -> bool {
        let sender = {
            let registry = self.registry.lock().expect("stream registry lock poisoned");
            registry.streams.get(stream_id).cloned()
        };
        let Some(sender) = sender else {
            tracing::debug!(stream = %stream_id, "No such stream");
            return false;
        };

        if sender.send(StreamFrame::Frame(frame.clone())).is_err() {
            // Consumer hung up; drop the dead registration.
            self.remove_stream(stream_id);
            return false;
        }
        true
    }

    fn remove_stream(&self, stream_id: &str) {
        let mut registry = self.registry.lock().expect("stream registry lock poisoned");
        if let Some(sender) = registry.streams.remove(stream_id) {
            let _ = sender.send(StreamFrame::Close);
        }
        if let Some((client_id, _)) = stream_id.split_once(':') {
            if let Some(ids) = registry.by_client.get_mut(client_id) {
                ids.remove(stream_id);
                if ids.is_empty() {
                    registry.by_client.remove(client_id);
                }
            }
        }
    }

    /// Close and forget every stream belonging to a client.
    pub fn close_client_streams(&self, client_id: &str) {
        let stream_ids: Vec<String> = {
            let registry = self.registry.lock().expect("stream registry lock poisoned");
            registry.by_client.get(client_id).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
        };
        for stream_id in &stream_ids {
            self.remove_stream(stream_id);
        }
        tracing::debug!(client = %client_id, count = stream_ids.len(), "Closed client streams");
    }

    /// Close every stream for every client.
    pub fn close_all(&self) {
        let stream_ids: Vec<String> = {
            let registry = self.registry.lock().expect("stream registry lock poisoned");
            registry.streams.keys().cloned().collect()
        };
        for stream_id in stream_ids {
            self.remove_stream(&stream_id);
        }
    }

    /// Number of open streams, across all clients.
    #[must_use]
    pub fn active_stream_count(&self) -> usize {
        self.registry.lock().expect("stream registry lock poisoned").streams.len()
    }

    /// Number of open streams for one client.
    #[must_use]
    pub fn client_stream_count(&self, client_id: &str) -> usize {
        self.registry
            .lock()
            .expect("stream registry lock poisoned")
            .by_client
            .get(client_id)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_stream_auto_closes_after_response() {
        let manager = StreamManager::new();
        let id = RequestId::from("r-1");
        let handle = manager.create_request_stream("cli", &id);

        let notification = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
        let response = json!({"jsonrpc": "2.0", "id": "r-1", "result": {}});
        assert!(manager.send("cli", &notification, Some(&id)));
        assert!(manager.send("cli", &response, Some(&id)));

        let events: Vec<_> = handle.into_event_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(manager.active_stream_count(), 0);

        // Stream is gone; a second response has nowhere to go.
        assert!(!manager.send("cli", &response, Some(&id)));
    }

    #[tokio::test]
    async fn test_server_stream_routing_without_request_id() {
        let manager = StreamManager::new();
        let _handle = manager.create_server_stream("cli");

        let frame = json!({"jsonrpc": "2.0", "method": "roots/list", "id": "s-1"});
        assert!(manager.send("cli", &frame, None));
        assert!(!manager.send("other", &frame, None));
    }

    #[tokio::test]
    async fn test_close_client_streams() {
        let manager = StreamManager::new();
        let _a = manager.create_server_stream("cli");
        let _b = manager.create_request_stream("cli", &RequestId::from(1));
        assert_eq!(manager.client_stream_count("cli"), 2);

        manager.close_client_streams("cli");
        assert_eq!(manager.client_stream_count("cli"), 0);
        assert_eq!(manager.active_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_sse_event_format_round_trips() {
        let manager = StreamManager::new();
        let id = RequestId::from("r-2");
        let handle = manager.create_request_stream("cli", &id);

        let response = json!({"jsonrpc": "2.0", "id": "r-2", "result": {"tools": []}});
        assert!(manager.send("cli", &response, Some(&id)));

        let events: Vec<_> = handle.into_event_stream().collect().await;
        assert_eq!(events.len(), 1);
    }
}
