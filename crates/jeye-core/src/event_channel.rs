//! Event Channel Client: one long-lived server-push subscription.
//!
//! Reconnects with capped exponential backoff on any transport failure. No
//! backlog is replayed after a reconnect; consumers resync through the status
//! query when they see `StreamStatus::Connected`.

use crate::config::{ServerConfig, StreamConfig};
use crate::event_parser::EventParser;
use crate::sse::SseDecoder;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use jeye_proto::AgentEvent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Raw byte chunks from an open stream.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChannelError>>;

/// Errors from the event stream transport.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("event stream at {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("event stream read failed: {0}")]
    Read(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Capability to open the push stream, so the transport can be faked.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<ByteStream, ChannelError>;
}

/// `text/event-stream` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpEventSource {
    pub fn new(server: &ServerConfig) -> Result<Self, ChannelError> {
        // No overall timeout: the response body never ends on its own.
        let client = reqwest::Client::builder()
            .connect_timeout(server.request_timeout())
            .build()
            .map_err(ChannelError::Client)?;
        Ok(Self {
            client,
            url: server.url(&server.stream_path),
            token: server.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self) -> Result<ByteStream, ChannelError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| ChannelError::Connect {
            url: self.url.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ChannelError::Read(e.to_string()))
            })
            .boxed();
        Ok(stream)
    }
}

/// Transient connection indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum StreamStatus {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}

/// What the subscription delivers, in server-send order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Event(AgentEvent),
    Status(StreamStatus),
}

/// Shortest reconnect delay; a zero base would never grow.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Capped exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(MIN_BACKOFF);
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the base delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Applies a server `retry:` hint as the new base delay.
    pub fn set_base(&mut self, base: Duration) {
        self.base = base.clamp(MIN_BACKOFF, self.max);
        self.current = self.base;
    }
}

/// Handle to a running subscription. Dropping it aborts the stream task.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stops the stream task and waits for it, releasing the connection.
    ///
    /// No message is sent after this returns.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Event subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens a subscription on `source`.
///
/// Must be called inside a tokio runtime.
pub fn subscribe(
    source: Arc<dyn EventSource>,
    config: &StreamConfig,
) -> (Subscription, mpsc::Receiver<ChannelMessage>) {
    let (tx, rx) = mpsc::channel(config.buffer.max(1));
    let backoff = Backoff::from_config(config);
    let task = tokio::spawn(run_channel(source, tx, backoff));
    (Subscription { task: Some(task) }, rx)
}

enum PumpEnd {
    /// The stream ended or failed; reconnect.
    Dropped(Option<String>),
    /// Nobody is listening any more.
    ReceiverGone,
}

async fn run_channel(
    source: Arc<dyn EventSource>,
    tx: mpsc::Sender<ChannelMessage>,
    mut backoff: Backoff,
) {
    let mut parser = EventParser::new();

    loop {
        if tx
            .send(ChannelMessage::Status(StreamStatus::Connecting))
            .await
            .is_err()
        {
            break;
        }

        match source.connect().await {
            Ok(stream) => {
                info!("Event stream connected");
                backoff.reset();
                if tx
                    .send(ChannelMessage::Status(StreamStatus::Connected))
                    .await
                    .is_err()
                {
                    break;
                }

                let status = match pump(stream, &tx, &mut parser, &mut backoff).await {
                    PumpEnd::ReceiverGone => break,
                    PumpEnd::Dropped(None) => StreamStatus::Disconnected,
                    PumpEnd::Dropped(Some(reason)) => StreamStatus::Error(reason),
                };
                warn!(status = ?status, "Event stream dropped");
                if tx.send(ChannelMessage::Status(status)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Event stream connect failed");
                if tx
                    .send(ChannelMessage::Status(StreamStatus::Error(e.to_string())))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting event stream");
        tokio::select! {
            () = tx.closed() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!(parsed = parser.parsed_count(), "Event channel task finished");
}

async fn pump(
    mut stream: ByteStream,
    tx: &mpsc::Sender<ChannelMessage>,
    parser: &mut EventParser,
    backoff: &mut Backoff,
) -> PumpEnd {
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            () = tx.closed() => return PumpEnd::ReceiverGone,
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in decoder.push(&bytes) {
                    if let Some(retry) = frame.retry {
                        backoff.set_base(Duration::from_millis(retry));
                    }
                    if let Some(event) = parser.parse(&frame)
                        && tx.send(ChannelMessage::Event(event)).await.is_err()
                    {
                        return PumpEnd::ReceiverGone;
                    }
                }
            }
            Some(Err(e)) => return PumpEnd::Dropped(Some(e.to_string())),
            None => return PumpEnd::Dropped(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use jeye_proto::EventKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Each connect pops one script; an empty queue yields an idle stream.
    struct ScriptedSource {
        scripts: Mutex<VecDeque<Result<Vec<&'static str>, ()>>>,
        connects: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Result<Vec<&'static str>, ()>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self) -> Result<ByteStream, ChannelError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().unwrap().pop_front() {
                Some(Ok(chunks)) => Ok(stream::iter(
                    chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())),
                )
                .boxed()),
                Some(Err(())) => Err(ChannelError::Read("refused".into())),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            buffer: 16,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ChannelMessage>) -> AgentEvent {
        loop {
            match rx.recv().await.expect("channel open") {
                ChannelMessage::Event(event) => return event,
                ChannelMessage::Status(_) => {}
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_hint_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        backoff.set_base(Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_retry_hint_still_waits_and_grows() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        backoff.set_base(Duration::ZERO);
        let first = backoff.next_delay();
        assert_eq!(first, MIN_BACKOFF);
        assert!(backoff.next_delay() > first);

        let mut zero = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(zero.next_delay(), MIN_BACKOFF);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let source = ScriptedSource::new(vec![Ok(vec![
            "event: agent:action\ndata: {\"message\":\"one\"}\n\n",
            "event: trust:kill\ndata: {\"paused\":true}\n\nevent: agent:log\n",
            "data: \"three\"\n\n",
        ])]);
        let (subscription, mut rx) = subscribe(source, &fast_config());

        assert_eq!(next_event(&mut rx).await.kind, EventKind::AgentAction);
        assert_eq!(next_event(&mut rx).await.kind, EventKind::TrustKill);
        assert_eq!(next_event(&mut rx).await.kind, EventKind::AgentLog);

        subscription.close().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_failure_and_drop() {
        let source = ScriptedSource::new(vec![
            Err(()),
            Ok(vec!["event: agent:log\ndata: \"first\"\n\n"]),
            Ok(vec!["event: agent:log\ndata: \"second\"\n\n"]),
        ]);
        let (subscription, mut rx) = subscribe(source.clone(), &fast_config());

        let mut statuses = Vec::new();
        let mut payloads = Vec::new();
        while payloads.len() < 2 {
            match rx.recv().await.unwrap() {
                ChannelMessage::Event(event) => payloads.push(event.payload),
                ChannelMessage::Status(status) => statuses.push(status),
            }
        }

        assert_eq!(payloads, vec![serde_json::json!("first"), serde_json::json!("second")]);
        assert!(statuses.contains(&StreamStatus::Error("event stream read failed: refused".into())));
        assert!(statuses.contains(&StreamStatus::Disconnected));
        assert!(source.connects.load(Ordering::SeqCst) >= 3);

        subscription.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let source = ScriptedSource::new(vec![]);
        let (subscription, mut rx) = subscribe(source, &fast_config());

        assert_eq!(
            rx.recv().await,
            Some(ChannelMessage::Status(StreamStatus::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(ChannelMessage::Status(StreamStatus::Connected))
        );

        subscription.close().await;
        assert_eq!(rx.recv().await, None);
    }
}
