// =============================================================================
// Stream Connection — one owned WebSocket subscription with reconnect/backoff
// =============================================================================
//
// Each connection is an explicitly constructed actor: `spawn` starts the
// connect/pump/backoff loop on its own task and hands back a `StreamHandle`.
// Inbound text frames are decoded once at this boundary into typed
// `FeedEvent`s; malformed frames are logged and dropped, never fatal.
//
// Reconnect delay is `min(base * 2^attempts, cap)`. Once the attempt ceiling
// is reached the connection is terminally failed and reports disconnected /
// not reconnecting; a fresh `spawn` is required to retry.
// =============================================================================

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::feed::events::FeedEvent;

// ---------------------------------------------------------------------------
// Configuration & status
// ---------------------------------------------------------------------------

/// Connection parameters for a single stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl StreamConfig {
    /// Build a stream config from the runtime config and a stream URL.
    pub fn from_runtime(cfg: &RuntimeConfig, url: String) -> Self {
        Self {
            url,
            base_reconnect_delay: Duration::from_millis(cfg.base_reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(cfg.max_reconnect_delay_ms),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_interval_secs),
        }
    }
}

/// Snapshot of one stream's connection health, published on every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    /// Epoch millis of the last successful open, if any.
    pub last_connected_at: Option<i64>,
    pub reconnect_attempts: u32,
    /// Time from connect start to transport open, for the last open.
    pub latency_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller-side handle to a spawned connection.
pub struct StreamHandle {
    outbound_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Best-effort send of a text frame. Payloads queued while the transport
    /// is not open are discarded at the next connect attempt.
    pub fn send(&self, payload: impl Into<String>) {
        let _ = self.outbound_tx.send(payload.into());
    }

    /// Cancel any pending reconnect/heartbeat timer, close the transport,
    /// and wait for the actor task to finish. Status is reset to
    /// disconnected with zero attempts.
    pub async fn disconnect(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Connection actor
// ---------------------------------------------------------------------------

/// How one connected session ended.
enum PumpExit {
    /// Caller requested teardown; no reconnect.
    Shutdown,
    /// Transport closed or errored; reconnect if attempts remain.
    Closed,
}

pub struct StreamConnection {
    config: StreamConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: mpsc::UnboundedSender<FeedEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StreamConnection {
    /// Spawn the connection actor. Status changes are published on
    /// `status_tx`; decoded events arrive on the returned receiver.
    pub fn spawn(
        config: StreamConfig,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> (StreamHandle, mpsc::UnboundedReceiver<FeedEvent>) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let conn = Self {
            config,
            status_tx,
            event_tx,
            outbound_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(conn.run());

        let handle = StreamHandle {
            outbound_tx,
            shutdown_tx,
            task,
        };
        (handle, events)
    }

    async fn run(mut self) {
        let mut attempts: u32 = 0;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            // Payloads queued while disconnected are dropped, not replayed.
            while self.outbound_rx.try_recv().is_ok() {}

            self.set_status(|s| {
                s.connected = false;
                s.reconnecting = attempts > 0;
                s.reconnect_attempts = attempts;
            });

            info!(url = %self.config.url, attempts, "connecting to stream");
            let started = Instant::now();

            let mut shutdown_rx = self.shutdown_rx.clone();
            let connect = tokio::select! {
                res = connect_async(&self.config.url) => Some(res),
                _ = shutdown_rx.changed() => None,
            };

            match connect {
                Some(Ok((ws, _response))) => {
                    let latency = started.elapsed().as_millis() as u64;
                    attempts = 0;
                    self.set_status(|s| {
                        s.connected = true;
                        s.reconnecting = false;
                        s.reconnect_attempts = 0;
                        s.last_connected_at = Some(chrono::Utc::now().timestamp_millis());
                        s.latency_ms = Some(latency);
                    });
                    info!(url = %self.config.url, latency_ms = latency, "stream connected");

                    match self.pump(ws).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Closed => {
                            warn!(url = %self.config.url, "stream closed — will reconnect");
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(url = %self.config.url, error = %e, "stream connect failed");
                }
                None => break,
            }

            if attempts >= self.config.max_reconnect_attempts {
                error!(
                    url = %self.config.url,
                    attempts,
                    "reconnect attempts exhausted — connection terminally failed"
                );
                self.set_status(|s| {
                    s.connected = false;
                    s.reconnecting = false;
                    s.reconnect_attempts = attempts;
                });
                return;
            }

            let delay = backoff_delay(
                self.config.base_reconnect_delay,
                self.config.max_reconnect_delay,
                attempts,
            );
            self.set_status(|s| {
                s.connected = false;
                s.reconnecting = true;
                s.reconnect_attempts = attempts;
            });
            debug!(url = %self.config.url, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

            let mut shutdown_rx = self.shutdown_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }
            // The counter advances only once the scheduled delay has fired.
            attempts += 1;
        }

        // Caller-initiated teardown: disconnected, zero attempts.
        self.set_status(|s| *s = ConnectionStatus::default());
        debug!(url = %self.config.url, "stream connection stopped");
    }

    /// Drive one open transport until close, error, or shutdown.
    async fn pump(
        &mut self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> PumpExit {
        let (mut write, mut read) = ws.split();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        // First tick fires immediately; skip it so pings start one interval in.
        heartbeat.tick().await;
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match FeedEvent::decode(&text) {
                            Ok(event) => {
                                // One decoded event per frame, no batching.
                                let _ = self.event_tx.send(event);
                            }
                            Err(e) => {
                                warn!(error = %e, "dropping malformed feed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!(url = %self.config.url, "server closed the stream");
                        return PumpExit::Closed;
                    }
                    // Ping/Pong/Binary frames — tungstenite answers pings
                    // automatically.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(url = %self.config.url, error = %e, "stream read error");
                        return PumpExit::Closed;
                    }
                    None => {
                        warn!(url = %self.config.url, "stream ended");
                        return PumpExit::Closed;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        error!(url = %self.config.url, error = %e, "heartbeat ping failed");
                        return PumpExit::Closed;
                    }
                }
                payload = self.outbound_rx.recv() => {
                    if let Some(payload) = payload {
                        if let Err(e) = write.send(Message::Text(payload)).await {
                            error!(url = %self.config.url, error = %e, "outbound send failed");
                            return PumpExit::Closed;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            }
        }
    }

    fn set_status(&self, mutate: impl FnOnce(&mut ConnectionStatus)) {
        self.status_tx.send_modify(mutate);
    }
}

/// `min(base * 2^attempts, cap)`.
fn backoff_delay(base: Duration, cap: Duration, attempts: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let factor = 1u64.checked_shl(attempts.min(20)).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor).min(cap.as_millis() as u64);
    Duration::from_millis(delay_ms)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = ms(500);
        let cap = ms(30_000);
        assert_eq!(backoff_delay(base, cap, 0), ms(500));
        assert_eq!(backoff_delay(base, cap, 1), ms(1_000));
        assert_eq!(backoff_delay(base, cap, 2), ms(2_000));
        assert_eq!(backoff_delay(base, cap, 5), ms(16_000));
    }

    #[test]
    fn backoff_is_capped() {
        let base = ms(500);
        let cap = ms(30_000);
        assert_eq!(backoff_delay(base, cap, 6), ms(30_000));
        assert_eq!(backoff_delay(base, cap, 30), ms(30_000));
        assert_eq!(backoff_delay(base, cap, 63), ms(30_000));
    }

    #[test]
    fn default_status_is_disconnected() {
        let status = ConnectionStatus::default();
        assert!(!status.connected);
        assert!(!status.reconnecting);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.last_connected_at.is_none());
    }

    fn unreachable_config(max_attempts: u32) -> StreamConfig {
        StreamConfig {
            // Port 9 (discard) — nothing listens there in the test env, so
            // connects fail immediately with refused.
            url: "ws://127.0.0.1:9/ws".to_string(),
            base_reconnect_delay: ms(1),
            max_reconnect_delay: ms(4),
            max_reconnect_attempts: max_attempts,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn exhausted_attempts_end_terminally_failed() {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (handle, _events) = StreamConnection::spawn(unreachable_config(2), status_tx);

        // The actor exits on its own once the ceiling is hit.
        let _ = tokio::time::timeout(Duration::from_secs(10), handle.task)
            .await
            .expect("connection task should finish");

        let status = status_rx.borrow();
        assert!(!status.connected);
        assert!(!status.reconnecting, "terminal failure must not report reconnecting");
        assert_eq!(status.reconnect_attempts, 2);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let mut config = unreachable_config(1000);
        // Long delay so a reconnect timer is pending when we disconnect.
        config.base_reconnect_delay = Duration::from_secs(60);
        config.max_reconnect_delay = Duration::from_secs(60);
        let (handle, _events) = StreamConnection::spawn(config, status_tx);

        // Give the first connect attempt time to fail and schedule a retry.
        tokio::time::sleep(ms(200)).await;

        tokio::time::timeout(Duration::from_secs(5), handle.disconnect())
            .await
            .expect("disconnect should not wait out the backoff timer");

        let status = status_rx.borrow();
        assert!(!status.connected);
        assert!(!status.reconnecting);
        assert_eq!(status.reconnect_attempts, 0);
    }
}
