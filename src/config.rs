//! Configuration loading and persistence.
//!
//! The relay needs two values for its whole lifetime: the inspector
//! identity to filter on and the local endpoint to replay against. They
//! live in a small JSON file next to the binary's working directory and
//! are collected interactively the first time.

use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Identity configuration, immutable once the relay starts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Inspector identity; only events carrying this `id` are replayed.
    pub inspector_id: String,
    /// URL replayed requests are sent to.
    pub local_endpoint: String,
}

impl Config {
    /// Reads the configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Error reading configuration file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Error parsing configuration file {}", path.display()))
    }

    /// Persists the configuration to `path` as indented JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("Error creating configuration")?;
        fs::write(path, data)
            .with_context(|| format!("Error saving configuration file {}", path.display()))
    }

    /// Asks for both values on `output` and reads them from `input`.
    pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Self> {
        let inspector_id = ask(input, output, "Enter WebhookInspectorId: ")?;
        let local_endpoint = ask(
            input,
            output,
            "Enter the local endpoint URL to forward webhooks: ",
        )?;
        Ok(Self {
            inspector_id,
            local_endpoint,
        })
    }

    /// Loads `path` if it exists, otherwise prompts on the terminal and
    /// saves the answers to `path`.
    pub fn load_or_prompt(path: &Path) -> Result<Self> {
        if path.exists() {
            let config = Self::load(path)?;
            println!("Using configured WebhookInspectorId and endpoint:");
            println!("  WebhookInspectorId: {}", config.inspector_id);
            println!("  Local Endpoint: {}", config.local_endpoint);
            return Ok(config);
        }

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let config = Self::prompt(&mut stdin.lock(), &mut stdout)?;
        config.save(path)?;
        println!("Configuration saved in {}", path.display());
        Ok(config)
    }

    /// Applies `INSPECTOR_RELAY_ID` / `INSPECTOR_RELAY_ENDPOINT` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("INSPECTOR_RELAY_ID") {
            self.inspector_id = id;
        }
        if let Some(endpoint) = lookup("INSPECTOR_RELAY_ENDPOINT") {
            self.local_endpoint = endpoint;
        }
    }

    /// Both values must be present before the relay starts. The endpoint
    /// is deliberately not parsed here; a bad URL fails per event.
    pub fn validate(&self) -> Result<()> {
        if self.inspector_id.trim().is_empty() {
            bail!("inspectorId must not be empty");
        }
        if self.local_endpoint.trim().is_empty() {
            bail!("localEndpoint must not be empty");
        }
        Ok(())
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("Error reading from stdin")?;
    Ok(line.trim().to_string())
}

/// Connection and replay timings.
#[derive(Clone, Debug)]
pub struct RelaySettings {
    /// Event stream URL (`ws://` or `wss://`).
    pub ws_url: String,
    /// Fixed wait between a lost connection and the next dial.
    pub reconnect_delay: Duration,
    /// Cadence of proactive pings.
    pub heartbeat_interval: Duration,
    /// Deadline for sending a probe, and liveness slack.
    pub probe_deadline: Duration,
    /// Per-replay timeout. `None` waits on the local endpoint indefinitely.
    pub forward_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            ws_url: constants::DEFAULT_WS_URL.to_string(),
            reconnect_delay: constants::RECONNECT_DELAY,
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            probe_deadline: constants::PROBE_DEADLINE,
            forward_timeout: None,
        }
    }
}

impl RelaySettings {
    /// Overrides the stream URL, accepting `http(s)://` as well.
    #[must_use]
    pub fn with_ws_url(mut self, url: &str) -> Self {
        self.ws_url = crate::ws::http_to_ws_scheme(url);
        self
    }

    /// Applies `INSPECTOR_RELAY_WS_URL` if set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        match std::env::var("INSPECTOR_RELAY_WS_URL") {
            Ok(url) if !url.is_empty() => self.with_ws_url(&url),
            _ => self,
        }
    }

    /// Silence tolerated before a session is declared dead.
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval + self.probe_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            inspector_id: "abc".to_string(),
            local_endpoint: "http://localhost:9000/hook".to_string(),
        }
    }

    #[test]
    fn test_config_uses_camel_case_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["inspectorId"], "abc");
        assert_eq!(json["localEndpoint"], "http://localhost:9000/hook");
    }

    #[test]
    fn test_save_writes_two_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        sample().save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "{\n  \"inspectorId\": \"abc\",\n  \"localEndpoint\": \"http://localhost:9000/hook\"\n}"
        );
    }

    #[test]
    fn test_load_round_trips_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        sample().save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), sample());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Error reading configuration file"));
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{\"inspectorId\": 3}").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Error parsing configuration file"));
    }

    #[test]
    fn test_load_or_prompt_prefers_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        sample().save(&path).unwrap();
        assert_eq!(Config::load_or_prompt(&path).unwrap(), sample());
    }

    #[test]
    fn test_prompt_trims_answers() {
        let mut input = io::Cursor::new("  abc \nhttp://localhost:9000/hook\n");
        let mut output = Vec::new();

        let config = Config::prompt(&mut input, &mut output).unwrap();

        assert_eq!(config, sample());
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("Enter WebhookInspectorId: "));
        assert!(shown.contains("Enter the local endpoint URL to forward webhooks: "));
    }

    #[test]
    fn test_overrides_replace_values() {
        let mut config = sample();
        config.apply_overrides(|key| match key {
            "INSPECTOR_RELAY_ID" => Some("override".to_string()),
            _ => None,
        });
        assert_eq!(config.inspector_id, "override");
        assert_eq!(config.local_endpoint, "http://localhost:9000/hook");
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(sample().validate().is_ok());

        let mut config = sample();
        config.inspector_id = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.local_endpoint.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_malformed_endpoint() {
        let mut config = sample();
        config.local_endpoint = "not a url".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_settings_match_constants() {
        let settings = RelaySettings::default();
        assert_eq!(settings.ws_url, constants::DEFAULT_WS_URL);
        assert_eq!(settings.reconnect_delay, constants::RECONNECT_DELAY);
        assert!(settings.forward_timeout.is_none());
        assert_eq!(
            settings.liveness_window(),
            constants::HEARTBEAT_INTERVAL + constants::PROBE_DEADLINE
        );
    }

    #[test]
    fn test_with_ws_url_converts_http_scheme() {
        let settings = RelaySettings::default().with_ws_url("https://inspector.test/ws");
        assert_eq!(settings.ws_url, "wss://inspector.test/ws");
    }
}
