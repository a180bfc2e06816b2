//! Event relay: frames in, at most one replay out per frame.
//!
//! The read loop handles one frame at a time, in arrival order, and does
//! not read the next frame until the current replay has finished. A slow
//! local endpoint therefore throttles the whole subscription.

use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::event::InboundEvent;
use crate::forward::{ForwardError, Forwarder};
use crate::heartbeat::ReadSignal;
use crate::ws::{WsMessage, WsReader};

/// What became of one inbound data frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// The frame was not a valid event; skipped.
    DecodeFailed,
    /// The event belonged to another inspector; skipped.
    Discarded,
    /// The replay completed with this status.
    Forwarded(StatusCode),
    /// The replay could not be built or sent; the event is dropped.
    ForwardFailed(ForwardError),
}

/// Why the read loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLoopExit {
    /// Shutdown fired.
    Shutdown,
    /// The session broke; the supervisor should reconnect.
    Disconnected,
}

/// Decodes, filters and replays events for one inspector identity.
#[derive(Debug, Clone)]
pub struct Relay {
    config: Config,
    forwarder: Forwarder,
}

impl Relay {
    /// Create a relay for `config`.
    pub fn new(config: Config, forwarder: Forwarder) -> Self {
        Self { config, forwarder }
    }

    /// The identity this relay filters on.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process one data frame end to end.
    pub async fn handle_frame(&self, payload: &[u8]) -> FrameOutcome {
        let event = match InboundEvent::from_bytes(payload) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("[Relay] Error decoding JSON: {}", e);
                return FrameOutcome::DecodeFailed;
            }
        };
        self.handle_event(event).await
    }

    /// Filter a decoded event and replay it if it is ours.
    pub async fn handle_event(&self, event: InboundEvent) -> FrameOutcome {
        if !event.is_for(&self.config.inspector_id) {
            log::info!("[Relay] Webhook received with different id. Ignoring.");
            return FrameOutcome::Discarded;
        }

        let endpoint = &self.config.local_endpoint;
        log::info!("[Relay] Forwarding webhook to: {}", endpoint);
        match self.forwarder.forward(endpoint, &event).await {
            Ok(status) => {
                log::info!("[Relay] Webhook successfully forwarded. Status: {}", status);
                FrameOutcome::Forwarded(status)
            }
            Err(e) => {
                log::error!("[Relay] Error forwarding webhook: {}", e);
                FrameOutcome::ForwardFailed(e)
            }
        }
    }

    /// Read frames from `reader` until the session ends or shutdown fires.
    ///
    /// Each read races the shutdown token and the session token, so a
    /// pending read never delays shutdown. Every inbound frame counts as
    /// liveness activity; the transport answers pings on the next read.
    /// While a frame is being handled the heartbeat is told reads are
    /// paused, so a slow replay is not mistaken for a dead peer.
    pub(crate) async fn read_loop(
        &self,
        reader: &mut WsReader,
        signals: &mpsc::UnboundedSender<ReadSignal>,
        session: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> ReadLoopExit {
        loop {
            let message = tokio::select! {
                biased;
                () = shutdown.cancelled() => return ReadLoopExit::Shutdown,
                () = session.cancelled() => {
                    log::warn!("[Relay] Session torn down by heartbeat");
                    return ReadLoopExit::Disconnected;
                }
                message = reader.recv() => message,
            };

            let payload = match message {
                Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                Some(Ok(WsMessage::Binary(data))) => data,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    let _ = signals.send(ReadSignal::Activity);
                    continue;
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::info!("[Relay] Connection closed by server ({} {})", code, reason);
                    return ReadLoopExit::Disconnected;
                }
                Some(Err(e)) => {
                    log::warn!("[Relay] Error reading message: {:#}", e);
                    return ReadLoopExit::Disconnected;
                }
                None => {
                    log::info!("[Relay] WebSocket stream ended");
                    return ReadLoopExit::Disconnected;
                }
            };

            let _ = signals.send(ReadSignal::Busy);
            self.handle_frame(&payload).await;
            let _ = signals.send(ReadSignal::Activity);
        }
    }
}
