//! Inspector Relay - local replay of webhook inspector events.
//!
//! Subscribes to the hosted webhook inspector's event stream and, for
//! every event addressed to the configured inspector identity, replays
//! the captured request against a local HTTP endpoint. Useful for
//! receiving real webhooks on a machine with no public ingress.
//!
//! # Architecture
//!
//! - **Supervisor** - Owns the connection lifetime, reconnects after a fixed delay
//! - **Heartbeat** - Per-session liveness probing, tears down dead sessions
//! - **Relay** - Decodes frames, filters by identity, replays one at a time
//! - **Forward** - Builds and sends the replay request
//!
//! # Modules
//!
//! - [`supervisor`] - Reconnect loop and shutdown handle
//! - [`relay`] - Frame handling and the read loop
//! - [`forward`] - Replay request construction
//! - [`config`] - Configuration loading/saving

pub mod config;
pub mod constants;
pub mod event;
pub mod forward;
mod heartbeat;
pub mod relay;
pub mod supervisor;
pub mod ws;

// Re-export commonly used types
pub use config::{Config, RelaySettings};
pub use event::InboundEvent;
pub use forward::{ForwardError, Forwarder};
pub use relay::{FrameOutcome, Relay};
pub use supervisor::{Dialer, SessionState, Supervisor, SupervisorHandle, WsDialer};
