//! Per-session liveness task.
//!
//! Owns the write half of a live session. The read loop reports inbound
//! activity over an unbounded channel; the heartbeat sends its own ping
//! every interval and cancels the session token as soon as a ping cannot
//! be sent in time or the peer has gone quiet for longer than the
//! liveness window. Server pings are answered by the transport on the
//! next read, so they only count as activity here.
//!
//! While a replay is in flight the read loop is not reading, so silence
//! says nothing about the peer. The silence check is suspended until the
//! read loop reports activity again; pings keep going out.
//!
//! ```text
//!   read loop ──ReadSignal::Activity/Busy──► heartbeat ──ping/close──► writer
//!       ▲                                   │
//!       └────────── session.cancel() ◄──────┘ (on failure)
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RelaySettings;
use crate::ws::WsWriter;

/// Payload carried by our own pings.
const PING_PAYLOAD: &[u8] = b"inspector-relay";

/// Event relayed from the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadSignal {
    /// A frame arrived, or a replay finished and reading resumes.
    Activity,
    /// A replay started; reads pause until the next `Activity`.
    Busy,
}

/// Write side the heartbeat needs.
#[async_trait]
pub(crate) trait PingSink: Send {
    async fn send_ping(&mut self, data: Vec<u8>) -> Result<()>;
    async fn send_close(&mut self) -> Result<()>;
}

#[async_trait]
impl PingSink for WsWriter {
    async fn send_ping(&mut self, data: Vec<u8>) -> Result<()> {
        WsWriter::send_ping(self, data).await
    }

    async fn send_close(&mut self) -> Result<()> {
        WsWriter::send_close(self).await
    }
}

/// Heartbeat timings for one session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeartbeatTimings {
    pub interval: Duration,
    pub deadline: Duration,
    pub liveness_window: Duration,
}

impl From<&RelaySettings> for HeartbeatTimings {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
            deadline: settings.probe_deadline,
            liveness_window: settings.liveness_window(),
        }
    }
}

/// Why the heartbeat task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatExit {
    /// Shutdown fired; a close frame was attempted.
    Shutdown,
    /// The read loop ended the session first.
    Closed,
    /// A ping failed or the peer went silent; the session was cancelled.
    Dead,
}

/// Run the heartbeat for one session until shutdown, session end, or failure.
pub(crate) async fn run<W: PingSink>(
    mut writer: W,
    mut signals: mpsc::UnboundedReceiver<ReadSignal>,
    timings: HeartbeatTimings,
    session: CancellationToken,
    shutdown: CancellationToken,
) -> HeartbeatExit {
    let mut ticker = tokio::time::interval_at(Instant::now() + timings.interval, timings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();
    let mut busy = false;

    let exit = loop {
        let silence_deadline = last_seen + timings.liveness_window;

        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                if timeout(timings.deadline, writer.send_close()).await.is_err() {
                    log::debug!("[Heartbeat] Close frame not sent before deadline");
                }
                return HeartbeatExit::Shutdown;
            }

            () = session.cancelled() => return HeartbeatExit::Closed,

            signal = signals.recv() => match signal {
                Some(ReadSignal::Activity) => {
                    busy = false;
                    last_seen = Instant::now();
                }
                Some(ReadSignal::Busy) => busy = true,
                None => return HeartbeatExit::Closed,
            },

            () = tokio::time::sleep_until(silence_deadline), if !busy => {
                log::warn!(
                    "[Heartbeat] No activity for {:?}, connection considered dead",
                    timings.liveness_window
                );
                break HeartbeatExit::Dead;
            }

            _ = ticker.tick() => {
                match timeout(timings.deadline, writer.send_ping(PING_PAYLOAD.to_vec())).await {
                    Ok(Ok(())) => log::trace!("[Heartbeat] Sent ping"),
                    Ok(Err(e)) => {
                        log::warn!("[Heartbeat] Failed to send ping: {:#}", e);
                        break HeartbeatExit::Dead;
                    }
                    Err(_) => {
                        log::warn!("[Heartbeat] Ping not sent within {:?}", timings.deadline);
                        break HeartbeatExit::Dead;
                    }
                }
            }
        }
    };

    session.cancel();
    exit
}
