//! STS Client (§4.5): maintains a persistent event-based session with the
//! STS server over a `tokio-tungstenite` WebSocket, implementing the
//! protocol in §6.2. Socket I/O is a suspension point of the cooperative
//! scheduler (§5), not a dedicated producer thread.

pub mod protocol;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::error::StsError;
use crate::types::AudioSegment;

pub use protocol::{BackpressurePayload, ClientEvent, FragmentProcessedPayload, ServerEvent};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// Reconnection policy per §6.2: up to `max_attempts`, initial delay
/// `initial_delay`, exponential backoff to `cap`, ±10% jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = base.min(self.cap.as_secs_f64());
        let jitter = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}

/// Consumer-side callbacks, delivered as parsed `ServerEvent`s on this
/// channel rather than raw trait-object callbacks, avoiding the
/// worker<->callback<->client cyclic references the source used (§9).
pub struct StsClient {
    url: String,
    reconnect: ReconnectPolicy,
    sink: Arc<Mutex<Option<WsSink>>>,
    events_rx: Option<mpsc::Receiver<ServerEvent>>,
    stream_ready: Arc<AtomicBool>,
    session_id: Arc<Mutex<Option<String>>>,
    max_inflight: Arc<AtomicU64>,
    sequence_number: AtomicU64,
    stream_id: String,
}

impl StsClient {
    pub fn new(url: impl Into<String>, stream_id: impl Into<String>, reconnect: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            reconnect,
            sink: Arc::new(Mutex::new(None)),
            events_rx: None,
            stream_ready: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(Mutex::new(None)),
            max_inflight: Arc::new(AtomicU64::new(3)),
            sequence_number: AtomicU64::new(0),
            stream_id: stream_id.into(),
        }
    }

    /// Opens the transport and spawns the event-reader task. Auto-reconnects
    /// with exponential backoff on transport loss; gives up after
    /// `reconnect.max_attempts`.
    pub async fn connect(&mut self) -> Result<(), StsError> {
        let (tx, rx) = mpsc::channel(64);
        self.events_rx = Some(rx);

        let mut last_err = None;
        for attempt in 0..self.reconnect.max_attempts {
            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((stream, _response)) => {
                    let (sink, mut read) = stream.split();
                    *self.sink.lock().await = Some(sink);

                    let stream_ready = self.stream_ready.clone();
                    let session_id = self.session_id.clone();
                    let max_inflight = self.max_inflight.clone();
                    tokio::spawn(async move {
                        while let Some(msg) = read.next().await {
                            let Ok(Message::Text(text)) = msg else { continue };
                            let Ok(event) = serde_json::from_str::<ServerEvent>(&text) else {
                                tracing::warn!(payload = %text, "failed to parse STS server event");
                                continue;
                            };
                            if let ServerEvent::StreamReady { session_id: sid, max_inflight: mi } = &event {
                                *session_id.lock().await = Some(sid.clone());
                                max_inflight.store(*mi as u64, Ordering::SeqCst);
                                stream_ready.store(true, Ordering::SeqCst);
                            }
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    });
                    return Ok(());
                }
                Err(err) => {
                    last_err = Some(err.to_string());
                    tokio::time::sleep(self.reconnect.delay_for_attempt(attempt)).await;
                }
            }
        }
        Err(StsError::ReconnectExhausted(self.reconnect.max_attempts))
            .inspect_err(|_| tracing::error!(error = ?last_err, "STS reconnect attempts exhausted"))
    }

    pub fn events(&mut self) -> &mut mpsc::Receiver<ServerEvent> {
        self.events_rx.as_mut().expect("connect() must be called before events()")
    }

    pub fn is_stream_ready(&self) -> bool {
        self.stream_ready.load(Ordering::SeqCst)
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight.load(Ordering::SeqCst) as usize
    }

    /// Emits `stream:init` and returns once `stream:ready` is observed on
    /// the events channel, or after `timeout` elapses. Resets client-side
    /// sequence numbering to 0 (fresh session, per §4.5).
    pub async fn init_stream(
        &mut self,
        config: crate::config::StsStreamConfig,
        timeout: Duration,
    ) -> Result<(), StsError> {
        self.sequence_number.store(0, Ordering::SeqCst);
        self.stream_ready.store(false, Ordering::SeqCst);

        self.emit(ClientEvent::StreamInit {
            stream_id: self.stream_id.clone(),
            worker_id: format!("worker-{}", self.stream_id),
            config,
        })
        .await?;

        tokio::time::timeout(timeout, async {
            while !self.stream_ready.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| StsError::InitTimeout(timeout))
    }

    /// Emits `fragment:data` with a strictly increasing 0-based sequence
    /// number. Fails precondition checks before touching the transport.
    pub async fn send_fragment(&self, segment: &AudioSegment) -> Result<String, StsError> {
        if self.sink.lock().await.is_none() {
            return Err(StsError::NotConnected);
        }
        if !self.is_stream_ready() {
            return Err(StsError::StreamNotReady);
        }
        let sequence_number = self.sequence_number.fetch_add(1, Ordering::SeqCst);
        let unix_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let payload = protocol::FragmentDataPayload::from_segment(segment, sequence_number, unix_ms);
        let fragment_id = payload.fragment_id.clone();
        self.emit(ClientEvent::FragmentData(payload)).await?;
        Ok(fragment_id)
    }

    /// Best-effort courtesy acknowledgement after `fragment:processed`
    /// (§10.5; Open Question 1 — implemented, never awaited).
    pub async fn ack_fragment(&self, fragment_id: &str, status: &str) {
        let _ = self
            .emit(ClientEvent::FragmentAck {
                fragment_id: fragment_id.to_string(),
                status: status.to_string(),
            })
            .await;
    }

    pub async fn end_stream(&mut self) -> Result<(), StsError> {
        self.emit(ClientEvent::StreamEnd {
            stream_id: self.stream_id.clone(),
        })
        .await?;
        self.stream_ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.stream_ready.store(false, Ordering::SeqCst);
    }

    async fn emit(&self, event: ClientEvent) -> Result<(), StsError> {
        let text = serde_json::to_string(&event)?;
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text))
                .await
                .map_err(|err| StsError::Transport(err.to_string())),
            None => Err(StsError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_respects_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        };
        for attempt in 0..10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay.as_secs_f64() <= 30.0 * 1.1 + 0.01);
        }
    }
}
