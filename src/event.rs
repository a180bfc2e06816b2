//! Inbound webhook events.
//!
//! One event per frame on the inspector stream. Fields the inspector
//! leaves out fall back to empty values, so a frame without an `id` is
//! decoded but never matches a configured identity.

use std::collections::HashMap;

use serde::Deserialize;

/// A webhook captured by the inspector, as delivered over the stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InboundEvent {
    /// Inspector identity the webhook was captured for.
    pub id: String,
    /// HTTP verb of the captured request. Empty replays as `GET`.
    pub method: String,
    /// Captured request headers, one value per name.
    pub headers: HashMap<String, String>,
    /// Captured query parameters, merged into the replay URL.
    pub query: HashMap<String, String>,
    /// Captured JSON body, re-encoded verbatim on replay.
    pub body: serde_json::Value,
}

impl InboundEvent {
    /// Decode a text frame.
    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Decode a binary frame carrying the same JSON document.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Whether this event belongs to `inspector_id`.
    #[must_use]
    pub fn is_for(&self, inspector_id: &str) -> bool {
        self.id == inspector_id
    }
}
