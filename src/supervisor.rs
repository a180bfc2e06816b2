//! Connection supervisor.
//!
//! Keeps one inspector subscription alive until shutdown: dial, hand the
//! session to the relay, and after any loss wait a fixed delay and dial
//! again. There is no backoff growth and no retry limit.
//!
//! # Architecture
//!
//! ```text
//!   Supervisor::run ──dial──► Dialer ──► (WsWriter, WsReader)
//!         │                                  │          │
//!         │                       heartbeat::run    Relay::read_loop
//!         │                                  └── session token ──┘
//!         ▼
//!   wait RECONNECT_DELAY (or shutdown) ──► dial again
//! ```
//!
//! # Shutdown
//!
//! A single [`CancellationToken`] is observed by the retry wait, the
//! dial, the heartbeat and the read loop. Cancelling it any number of
//! times from any thread unwinds the loop exactly once.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RelaySettings};
use crate::forward::Forwarder;
use crate::heartbeat::{self, HeartbeatTimings};
use crate::relay::{ReadLoopExit, Relay};
use crate::ws::{self, WsReader, WsWriter};

/// Lifecycle of the current connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Dialing the event stream.
    Connecting,
    /// Handshake done; relay and heartbeat running.
    Live,
    /// Session is being torn down.
    Closing,
    /// No session (between attempts, or after shutdown).
    Closed,
}

/// Opens duplex connections to the event stream.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connect to `url` and return the split session halves.
    async fn dial(&self, url: &str) -> Result<(WsWriter, WsReader)>;
}

/// Production dialer over [`ws::connect`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<(WsWriter, WsReader)> {
        ws::connect(url).await
    }
}

/// Owns the reconnect loop for one inspector identity.
pub struct Supervisor<D = WsDialer> {
    relay: Relay,
    settings: RelaySettings,
    dialer: D,
    state_tx: watch::Sender<SessionState>,
}

impl<D> std::fmt::Debug for Supervisor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("ws_url", &self.settings.ws_url)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Supervisor<WsDialer> {
    /// Supervisor that dials the real event stream.
    pub fn new(config: Config, settings: RelaySettings) -> Result<Self> {
        Self::with_dialer(config, settings, WsDialer)
    }
}

impl<D: Dialer> Supervisor<D> {
    /// Supervisor with a custom dialer.
    pub fn with_dialer(config: Config, settings: RelaySettings, dialer: D) -> Result<Self> {
        let forwarder = Forwarder::new(settings.forward_timeout)?;
        let (state_tx, _) = watch::channel(SessionState::Closed);
        Ok(Self {
            relay: Relay::new(config, forwarder),
            settings,
            dialer,
            state_tx,
        })
    }

    /// Subscribe to session state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let url = self.settings.ws_url.as_str();
        let delay = self.settings.reconnect_delay;

        while !shutdown.is_cancelled() {
            self.set_state(SessionState::Connecting);
            log::info!("[Supervisor] Connecting to {}", url);

            let dialed = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                dialed = self.dialer.dial(url) => dialed,
            };

            match dialed {
                Ok((writer, reader)) => {
                    log::info!("[Supervisor] Connected! Listening for events...");
                    if self.run_session(writer, reader, &shutdown).await == ReadLoopExit::Shutdown {
                        break;
                    }
                    log::warn!("[Supervisor] Connection lost, reconnecting in {:?}", delay);
                }
                Err(e) => {
                    log::warn!("[Supervisor] Connection failed: {:#} (retry in {:?})", e, delay);
                }
            }

            self.set_state(SessionState::Closed);
            if !wait_or_shutdown(delay, &shutdown).await {
                break;
            }
        }

        self.set_state(SessionState::Closed);
        log::info!("[Supervisor] Shutdown requested, exiting connection loop");
    }

    async fn run_session(
        &self,
        writer: WsWriter,
        mut reader: WsReader,
        shutdown: &CancellationToken,
    ) -> ReadLoopExit {
        self.set_state(SessionState::Live);

        let session = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let timings = HeartbeatTimings::from(&self.settings);
        let heartbeat = tokio::spawn(heartbeat::run(
            writer,
            signal_rx,
            timings,
            session.clone(),
            shutdown.clone(),
        ));

        let exit = self
            .relay
            .read_loop(&mut reader, &signal_tx, &session, shutdown)
            .await;

        self.set_state(SessionState::Closing);
        session.cancel();
        drop(signal_tx);
        match heartbeat.await {
            Ok(heartbeat_exit) => log::debug!("[Supervisor] Heartbeat ended: {:?}", heartbeat_exit),
            Err(e) => log::error!("[Supervisor] Heartbeat task failed: {}", e),
        }
        exit
    }
}

impl<D: Dialer> Supervisor<D> {
    /// Run the loop on a background task tied to `shutdown`.
    pub fn spawn(self, shutdown: CancellationToken) -> SupervisorHandle {
        let state = self.state();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        SupervisorHandle {
            shutdown,
            state,
            task,
        }
    }
}

/// Sleep for `delay` unless shutdown fires first. Returns `false` on shutdown.
async fn wait_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Control surface for a spawned [`Supervisor`].
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Arm shutdown. Safe to call repeatedly and concurrently.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// A clone of the shutdown token, for arming from elsewhere.
    pub fn trigger(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Session state updates.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Whether the loop has already unwound.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait up to `grace` for the loop to unwind. Returns `true` if it did.
    ///
    /// Does not arm shutdown itself.
    pub async fn wait(self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("[Supervisor] Connection loop panicked: {}", e);
                false
            }
            Err(_) => {
                log::warn!("[Supervisor] Connection loop still running after {:?}", grace);
                false
            }
        }
    }
}
