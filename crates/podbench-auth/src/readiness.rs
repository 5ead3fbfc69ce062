//! Waiting for a service to report readiness over its event stream.
//!
//! The stream is protected by its own flow:
//!
//! 1. `GET` the stream: must answer 401 with an UMA challenge and a
//!    `Link: <...>; rel="service-token-endpoint"`
//! 2. resolve the challenge with a resolver that writes nothing to the cache
//! 3. `POST {resource_url}` to the service-token endpoint with that credential
//! 4. re-open the stream with `Bearer <service_token>`
//!
//! Events are parsed line by line (`event:` sets the type of the following
//! `data:` lines, a blank line resets it) and delivered as [`StreamEvent`]s
//! over a channel by a background reader task.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::challenge::{service_token_endpoint_from_headers, Challenge};
use crate::client::helpers::{events_url, header_value};
use crate::client::http::{read_json, HttpBackend};
use crate::client::PodClient;
use crate::error::{AuthError, AuthResult};
use crate::resolver::{ChallengeResolver, Resolution};
use crate::types::ServiceTokenResponse;

const EVENT_STREAM: &str = "text/event-stream";

/// Event type of `data:` lines with no preceding `event:` line.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One outcome delivered by an open stream.
#[derive(Debug)]
pub enum StreamEvent {
    Message { event_type: String, payload: Value },
    Ended,
    Errored(AuthError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Closed,
}

/// Incremental parser for the event-stream wire format.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    event_type: Option<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk. Returns the events completed by it. Partial lines are
    /// kept until the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }

        events
    }

    fn line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            self.event_type = None;
            return None;
        }
        if let Some(event_type) = line.strip_prefix("event:") {
            self.event_type = Some(event_type.trim().to_string());
            return None;
        }
        let data = line.strip_prefix("data:")?.trim_start();

        let event_type = self
            .event_type
            .clone()
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        Some(match serde_json::from_str(data) {
            Ok(payload) => StreamEvent::Message {
                event_type,
                payload,
            },
            Err(e) => StreamEvent::Errored(AuthError::Stream {
                message: format!("invalid JSON in `{}` event: {}", event_type, e),
            }),
        })
    }
}

/// An open, authorized event stream.
#[derive(Debug)]
pub struct EventStream {
    url: String,
    state: StreamState,
    events: mpsc::Receiver<StreamEvent>,
    abort: Option<AbortHandle>,
}

impl EventStream {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Next event. `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.state == StreamState::Closed {
            return None;
        }
        let event = self.events.recv().await;
        if matches!(event, None | Some(StreamEvent::Ended | StreamEvent::Errored(_))) {
            self.state = StreamState::Closed;
        }
        event
    }

    /// Stop the reader task. Only the first call has an effect; returns
    /// whether this call performed the cancellation.
    pub fn cancel(&mut self) -> bool {
        match self.abort.take() {
            Some(handle) => {
                handle.abort();
                self.state = StreamState::Closed;
                debug!(url = %self.url, "event stream cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_none()
    }

    /// Wait for the first `event_type` message and return its payload. The
    /// stream is cancelled on every outcome.
    pub async fn wait_for(&mut self, event_type: &str) -> AuthResult<Value> {
        let outcome = loop {
            match self.next().await {
                Some(StreamEvent::Message {
                    event_type: received,
                    payload,
                }) => {
                    if received == event_type {
                        break Ok(payload);
                    }
                    debug!(url = %self.url, event = %received, "ignoring event");
                }
                Some(StreamEvent::Errored(e)) => break Err(e),
                Some(StreamEvent::Ended) | None => {
                    break Err(AuthError::StreamEnded {
                        url: self.url.clone(),
                        event: event_type.to_string(),
                    })
                }
            }
        };
        self.cancel();
        outcome
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Opens event streams with the stream-specific authorization flow.
#[derive(Debug, Clone)]
pub struct ReadinessChannel {
    http: HttpBackend,
    resolver: ChallengeResolver,
}

impl ReadinessChannel {
    pub(crate) fn new(http: HttpBackend, resolver: ChallengeResolver) -> Self {
        Self {
            http,
            resolver: resolver.detached(),
        }
    }

    /// Authorize and open the stream at `url`.
    pub async fn open(&self, url: &str) -> AuthResult<EventStream> {
        debug!(url = %url, state = ?StreamState::Connecting, "opening event stream");

        let probe = self
            .http
            .send(self.http.request(Method::GET, url).header(ACCEPT, EVENT_STREAM))
            .await?;
        if probe.status() != StatusCode::UNAUTHORIZED {
            let status = probe.status().as_u16();
            let body = probe.text().await.unwrap_or_default();
            return Err(AuthError::StreamProtocol {
                message: format!("expected 401 from {}, got {}: {}", url, status, body),
            });
        }

        let challenge =
            Challenge::from_headers(probe.headers()).ok_or_else(|| AuthError::StreamProtocol {
                message: format!("401 from {} carries no UMA challenge", url),
            })?;
        let service_endpoint = service_token_endpoint_from_headers(probe.headers())
            .ok_or_else(|| AuthError::StreamProtocol {
                message: format!("401 from {} has no service-token-endpoint link", url),
            })?;

        let credential = match self.resolver.resolve(&challenge).await? {
            Resolution::Resolved { credential, .. } => credential,
            Resolution::Aborted => {
                return Err(AuthError::DiscoveryUnavailable {
                    as_uri: challenge.as_uri,
                })
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&credential.header_value())?);
        let response = self
            .http
            .post_json(
                &service_endpoint,
                &serde_json::json!({ "resource_url": url }),
                headers,
            )
            .await?;
        let service: ServiceTokenResponse = read_json(response).await?;
        debug!(url = %url, endpoint = %service_endpoint, "service token obtained");

        let request = self
            .http
            .stream_request(Method::GET, url)
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache")
            .header(
                AUTHORIZATION,
                header_value(&format!("Bearer {}", service.service_token))?,
            );
        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Stream {
                message: format!("cannot connect to {} (HTTP {}): {}", url, status, body),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(read_events(response, tx));
        debug!(url = %url, state = ?StreamState::Streaming, "event stream open");

        Ok(EventStream {
            url: url.to_string(),
            state: StreamState::Streaming,
            events: rx,
            abort: Some(task.abort_handle()),
        })
    }
}

async fn read_events(response: Response, tx: mpsc::Sender<StreamEvent>) {
    let mut parser = EventStreamParser::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Errored(AuthError::Stream {
                        message: e.to_string(),
                    }))
                    .await;
                return;
            }
        };
        for event in parser.feed(&chunk) {
            let terminal = matches!(event, StreamEvent::Errored(_));
            if tx.send(event).await.is_err() || terminal {
                return;
            }
        }
    }

    let _ = tx.send(StreamEvent::Ended).await;
}

/// Tuning for [`wait_until_ready`].
#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Path of the stream relative to the resource.
    pub event_path: String,
    /// Event type that signals readiness.
    pub ready_event: String,
    pub connect_retry_interval: Duration,
    pub max_connect_attempts: u32,
    pub confirm_retry_interval: Duration,
    pub max_confirm_attempts: u32,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            event_path: "events".to_string(),
            ready_event: "up-to-date".to_string(),
            connect_retry_interval: Duration::from_secs(2),
            max_connect_attempts: 30,
            confirm_retry_interval: Duration::from_secs(2),
            max_confirm_attempts: 30,
        }
    }
}

impl ReadinessOptions {
    pub fn with_ready_event(mut self, event: impl Into<String>) -> Self {
        self.ready_event = event.into();
        self
    }

    pub fn with_event_path(mut self, path: impl Into<String>) -> Self {
        self.event_path = path.into();
        self
    }

    /// Use the same interval for connect and confirm retries.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self.confirm_retry_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, connect: u32, confirm: u32) -> Self {
        self.max_connect_attempts = connect.max(1);
        self.max_confirm_attempts = confirm.max(1);
        self
    }
}

/// Wait for `resource`'s stream to emit the ready event, then until a `GET`
/// of `resource` succeeds.
///
/// Opening the stream is retried only for transient failures (the service
/// not existing yet, network errors, unreachable discovery). Other errors
/// are returned on the first attempt.
pub async fn wait_until_ready(
    client: &PodClient,
    resource: &str,
    options: &ReadinessOptions,
) -> AuthResult<()> {
    let stream_url = events_url(resource, &options.event_path);
    let channel = client.readiness();

    let mut attempt = 0;
    let mut stream = loop {
        attempt += 1;
        match channel.open(&stream_url).await {
            Ok(stream) => break stream,
            Err(e) if e.is_retryable() && attempt < options.max_connect_attempts => {
                debug!(url = %stream_url, attempt, error = %e, "event stream not available yet");
                tokio::time::sleep(options.connect_retry_interval).await;
            }
            Err(e) => return Err(e),
        }
    };

    stream.wait_for(&options.ready_event).await?;
    info!(resource = %resource, event = %options.ready_event, "ready event received");

    for attempt in 1..=options.max_confirm_attempts {
        match client.get(resource).await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                debug!(resource = %resource, attempt, status = response.status().as_u16(), "resource not readable yet");
            }
            Err(e) => {
                warn!(resource = %resource, attempt, error = %e, "confirming fetch failed");
            }
        }
        if attempt < options.max_confirm_attempts {
            tokio::time::sleep(options.confirm_retry_interval).await;
        }
    }

    Err(AuthError::Stream {
        message: format!(
            "{} reported `{}` but was not readable after {} attempts",
            resource, options.ready_event, options.max_confirm_attempts
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(events: Vec<StreamEvent>) -> Vec<(String, Value)> {
        events
            .into_iter()
            .map(|event| match event {
                StreamEvent::Message {
                    event_type,
                    payload,
                } => (event_type, payload),
                other => panic!("unexpected event: {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_parser_typed_and_untyped_events() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(
            b"event: up-to-date\ndata: {\"n\":1}\n\ndata: {\"n\":2}\n\n",
        );
        assert_eq!(
            messages(events),
            vec![
                ("up-to-date".to_string(), serde_json::json!({ "n": 1 })),
                (DEFAULT_EVENT_TYPE.to_string(), serde_json::json!({ "n": 2 })),
            ]
        );
    }

    #[test]
    fn test_parser_joins_lines_split_across_chunks() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"event: upd").is_empty());
        assert!(parser.feed(b"ate\r\ndata: {\"ok\":").is_empty());
        let events = messages(parser.feed(b"true}\r\n"));
        assert_eq!(
            events,
            vec![("update".to_string(), serde_json::json!({ "ok": true }))]
        );
    }

    #[test]
    fn test_parser_ignores_comments_and_ids() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b": keep-alive\nid: 7\nretry: 100\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_parser_invalid_json_is_an_error() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b"event: x\ndata: not json\n");
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Errored(AuthError::Stream { .. })]
        ));
    }

    /// Serves one chunked event stream that pauses for `pause` between two
    /// events, then closes.
    async fn paused_stream_server(pause: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await.unwrap();

            let chunk = |data: &str| format!("{:x}\r\n{}\r\n", data.len(), data);
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            socket
                .write_all(chunk("event: progress\ndata: {}\n\n").as_bytes())
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(pause).await;
            socket
                .write_all(chunk("event: up-to-date\ndata: {\"done\":true}\n\n").as_bytes())
                .await
                .unwrap();
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{}/q/events", addr)
    }

    #[tokio::test]
    async fn test_stream_outlives_request_timeout() {
        let url = paused_stream_server(Duration::from_millis(1500)).await;
        let mut config = crate::config::AuthConfig::default();
        config.timeout_secs = Some(1);
        let http = HttpBackend::new(&config).unwrap();

        let response = http
            .send(http.stream_request(Method::GET, &url))
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        read_events(response, tx).await;

        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Message { event_type, .. } => types.push(event_type),
                StreamEvent::Ended => break,
                StreamEvent::Errored(e) => panic!("stream failed: {:?}", e),
            }
        }
        assert_eq!(types, vec!["progress", "up-to-date"]);
    }

    #[tokio::test]
    async fn test_wait_for_cancels_exactly_once() {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        let mut stream = EventStream {
            url: "http://svc.local/q/events".to_string(),
            state: StreamState::Streaming,
            events: rx,
            abort: Some(task.abort_handle()),
        };

        tx.send(StreamEvent::Message {
            event_type: "progress".to_string(),
            payload: serde_json::json!({}),
        })
        .await
        .unwrap();
        tx.send(StreamEvent::Message {
            event_type: "up-to-date".to_string(),
            payload: serde_json::json!({ "done": true }),
        })
        .await
        .unwrap();

        let payload = stream.wait_for("up-to-date").await.unwrap();
        assert_eq!(payload["done"], true);
        assert!(stream.is_cancelled());
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(!stream.cancel());
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_for_fails_when_stream_ends_first() {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async {});
        let mut stream = EventStream {
            url: "http://svc.local/q/events".to_string(),
            state: StreamState::Streaming,
            events: rx,
            abort: Some(task.abort_handle()),
        };
        tx.send(StreamEvent::Ended).await.unwrap();

        let err = stream.wait_for("up-to-date").await.unwrap_err();
        assert!(matches!(err, AuthError::StreamEnded { ref event, .. } if event == "up-to-date"));
        assert!(stream.is_cancelled());
    }
}
