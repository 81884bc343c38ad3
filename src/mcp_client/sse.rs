//! JSON-RPC over an event-stream (SSE) connection.
//!
//! The client opens a long-lived `GET` on the server URL. The first event the
//! server sends is `endpoint`, whose data is the URL (usually relative) that
//! requests must be `POST`ed to. Responses to those requests come back as
//! `message` events on the original stream, correlated by JSON-RPC `id`.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{Client as HttpClient, Url};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::next_request_id;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout for the stream and for each POST.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the server to announce its message endpoint.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests waiting for their `message` event. `None` once the stream ended.
type PendingMap = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>>;

// ─── Event parsing ───────────────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE parser that survives events split across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseEventBuffer {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventBuffer {
    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end().to_string();
            self.feed_line(&line);
        }
        self.dispatch()
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None; // comment / keep-alive
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// JSON-RPC transport over a persistent event stream plus per-request POSTs.
pub struct SseTransport {
    server_name: String,
    http: HttpClient,
    endpoint: Url,
    pending: PendingMap,
    reader_task: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(server_name: &str, url: &str) -> Result<Self, McpError> {
        let base = Url::parse(url).map_err(|e| McpError::InvalidSpec {
            spec: url.to_string(),
            reason: format!("not a valid URL: {e}"),
        })?;

        let connection_failed = |reason: String| McpError::ConnectionFailed {
            name: server_name.to_string(),
            reason,
        };

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| connection_failed(format!("failed to build HTTP client: {e}")))?;

        let response = http
            .get(base.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| connection_failed(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(connection_failed(format!("{url}: HTTP {status}")));
        }

        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let reader_task = tokio::spawn(pump_events(
            server_name.to_string(),
            response.bytes_stream(),
            Arc::clone(&pending),
            endpoint_tx,
        ));

        let announced = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader_task.abort();
                return Err(connection_failed(
                    "event stream closed before the endpoint was announced".into(),
                ));
            }
            Err(_) => {
                reader_task.abort();
                return Err(connection_failed(format!(
                    "no endpoint event within {}s",
                    ENDPOINT_TIMEOUT.as_secs()
                )));
            }
        };

        let endpoint = match base.join(announced.trim()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader_task.abort();
                return Err(connection_failed(format!(
                    "server announced an invalid endpoint '{announced}': {e}"
                )));
            }
        };

        tracing::debug!(server = server_name, endpoint = %endpoint, "event stream ready");

        Ok(Self {
            server_name: server_name.to_string(),
            http,
            endpoint,
            pending,
            reader_task,
        })
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// Post a JSON-RPC request and wait for its response on the event stream.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            let Some(map) = pending.as_mut() else {
                return Err(self.error("event stream is closed".into()));
            };
            map.insert(id, tx);
        }

        let req = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.post(&req).await {
            if let Some(map) = self.pending.lock().await.as_mut() {
                map.remove(&id);
            }
            return Err(e);
        }

        rx.await
            .map_err(|_| self.error("event stream closed before the response arrived".into()))
    }

    /// Post a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    async fn post<T: serde::Serialize>(&self, body: &T) -> Result<(), McpError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| self.error(format!("failed to post to {}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {status}: {body_text}")));
        }
        Ok(())
    }

    /// Stop reading the event stream and fail any outstanding requests.
    pub async fn close(&self) {
        self.reader_task.abort();
        self.pending.lock().await.take();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Read the event stream until it ends, routing responses to their waiters.
async fn pump_events<S, B, E>(
    server_name: String,
    stream: S,
    pending: PendingMap,
    endpoint_tx: oneshot::Sender<String>,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut buffer = SseEventBuffer::default();
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let events = match stream.next().await {
            Some(Ok(chunk)) => buffer.push(chunk.as_ref()),
            Some(Err(e)) => {
                tracing::warn!(server = %server_name, error = %e, "event stream read error");
                break;
            }
            None => {
                let tail = buffer.finish().into_iter().collect::<Vec<_>>();
                for event in tail {
                    route_event(&server_name, event, &pending, &mut endpoint_tx).await;
                }
                tracing::info!(server = %server_name, "event stream ended");
                break;
            }
        };

        for event in events {
            route_event(&server_name, event, &pending, &mut endpoint_tx).await;
        }
    }

    // Dropping the senders wakes every waiter with an error.
    pending.lock().await.take();
}

async fn route_event(
    server_name: &str,
    event: SseEvent,
    pending: &PendingMap,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
) {
    match event.event.as_str() {
        "endpoint" => {
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(event.data);
            }
        }
        "message" => match serde_json::from_str::<JsonRpcResponse>(&event.data) {
            Ok(resp) if resp.is_server_request() => tracing::debug!(
                server = server_name,
                method = resp.method.as_deref().unwrap_or_default(),
                "skipping server-initiated request"
            ),
            Ok(resp) => {
                let waiter = pending
                    .lock()
                    .await
                    .as_mut()
                    .and_then(|map| map.remove(&resp.id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => tracing::debug!(server = server_name, id = resp.id, "unsolicited response"),
                }
            }
            Err(_) => tracing::trace!(server = server_name, data = %event.data, "ignoring non-response message"),
        },
        other => tracing::trace!(server = server_name, event = other, "ignoring event"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::transport::extract_result;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_buffer_handles_split_events() {
        let mut buffer = SseEventBuffer::default();
        assert!(buffer.push(b"event: endpoint\r\ndata: /mess").is_empty());
        let events = buffer.push(b"ages?id=1\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages?id=1".into(),
            }]
        );
    }

    #[test]
    fn test_buffer_defaults_to_message_and_joins_data() {
        let mut buffer = SseEventBuffer::default();
        let events = buffer.push(b": keep-alive\n\ndata: {\"a\":\ndata: 1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":\n1}");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut buffer = SseEventBuffer::default();
        assert!(buffer.push(b"data: tail").is_empty());
        let event = buffer.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(buffer.finish().is_none());
    }

    #[tokio::test]
    async fn test_pump_routes_responses_and_closes_pending() {
        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.as_mut().unwrap().insert(7, tx);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok(b"event: endpoint\ndata: /msg\n\n".as_slice()),
            Ok(b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"x\":1}}\n\n".as_slice()),
        ];
        pump_events(
            "sse0".into(),
            futures::stream::iter(chunks),
            Arc::clone(&pending),
            endpoint_tx,
        )
        .await;

        assert_eq!(endpoint_rx.await.unwrap(), "/msg");
        assert_eq!(rx.await.unwrap().id, 7);
        assert!(pending.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_skips_server_request_with_pending_id() {
        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.as_mut().unwrap().insert(9, tx);
        let (endpoint_tx, _endpoint_rx) = oneshot::channel();

        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok(b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\n\n".as_slice()),
            Ok(b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":9,\"result\":{\"ok\":true}}\n\n".as_slice()),
        ];
        pump_events(
            "sse0".into(),
            futures::stream::iter(chunks),
            Arc::clone(&pending),
            endpoint_tx,
        )
        .await;

        let resp = rx.await.unwrap();
        assert!(resp.method.is_none());
        assert_eq!(extract_result(resp).unwrap()["ok"], true);
    }

    // ─── Minimal HTTP+SSE tool server ───────────────────────────────────

    async fn read_http_request<R: tokio::io::AsyncBufRead + Unpin>(
        reader: &mut R,
    ) -> Option<(String, Vec<u8>)> {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.ok()? == 0 {
            return None;
        }
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).await.ok()?;
            let header = header.trim();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok()?;
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await.ok()?;
        Some((request_line, body))
    }

    /// Serves one event stream and answers `tools/list` posts on it.
    async fn spawn_sse_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<String>();
        let events_rx = Arc::new(Mutex::new(Some(events_rx)));

        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let events_tx = events_tx.clone();
                let events_rx = Arc::clone(&events_rx);
                tokio::spawn(async move {
                    let (read_half, mut write_half) = socket.into_split();
                    let mut reader = BufReader::new(read_half);
                    while let Some((request_line, body)) = read_http_request(&mut reader).await {
                        if request_line.starts_with("GET") {
                            let mut rx = events_rx.lock().await.take().unwrap();
                            write_half
                                .write_all(
                                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\nevent: endpoint\ndata: /messages?session=abc\n\n",
                                )
                                .await
                                .unwrap();
                            while let Some(event) = rx.recv().await {
                                if write_half.write_all(event.as_bytes()).await.is_err() {
                                    return;
                                }
                            }
                            return;
                        }

                        assert!(request_line.contains("/messages?session=abc"));
                        write_half
                            .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n")
                            .await
                            .unwrap();
                        let message: serde_json::Value = serde_json::from_slice(&body).unwrap();
                        if let Some(id) = message.get("id").and_then(|id| id.as_u64()) {
                            let reply = serde_json::json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": {"tools": [{"name": "echo"}]},
                            });
                            let _ = events_tx.send(format!("event: message\ndata: {reply}\n\n"));
                        }
                    }
                });
            }
        });

        format!("http://{addr}/sse")
    }

    #[tokio::test]
    async fn test_connect_and_request_over_http() {
        let url = spawn_sse_server().await;
        let transport = SseTransport::connect("sse0", &url).await.unwrap();
        assert_eq!(transport.endpoint().path(), "/messages");

        transport
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        let resp = transport.request("tools/list", None).await.unwrap();
        let result = extract_result(resp).unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");

        transport.close().await;
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = SseTransport::connect("sse1", &format!("http://{addr}/sse")).await;
        assert!(matches!(result, Err(McpError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_invalid_url_is_invalid_spec() {
        let result = SseTransport::connect("sse2", "not a url").await;
        assert!(matches!(result, Err(McpError::InvalidSpec { .. })));
    }
}
