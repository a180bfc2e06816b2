//! Application-wide constants for inspector-relay.
//!
//! This module centralizes all magic numbers and configuration constants
//! so timing behavior can be found in one place. Every duration here is a
//! default; `RelaySettings` can override the connection timings.
//!
//! # Categories
//!
//! - **Connection**: Reconnect and heartbeat timing
//! - **Shutdown**: Process exit grace period
//! - **Defaults**: Remote URL and config file name

use std::time::Duration;

// ============================================================================
// Connection
// ============================================================================

/// Fixed delay between a lost (or failed) connection and the next dial.
///
/// Deliberately constant: the supervisor never backs off further and
/// never gives up short of shutdown.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How often the heartbeat task sends its own ping to the server.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for sending a ping or answering a server ping.
///
/// Also the slack added to [`HEARTBEAT_INTERVAL`] before a silent
/// connection is declared dead.
pub const PROBE_DEADLINE: Duration = Duration::from_secs(10);

// ============================================================================
// Shutdown
// ============================================================================

/// How long the binary waits for the supervisor loop to unwind after
/// shutdown is armed. Best-effort; in-flight replays are not drained.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// Defaults
// ============================================================================

/// Webhook inspector event stream.
pub const DEFAULT_WS_URL: &str = "ws://webhookinspector.com/ws";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "config.json";
