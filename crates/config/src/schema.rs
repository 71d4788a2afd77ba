//! Config schema types (server, sessions, webhook, bridge, native).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub webhook: WebhookConfig,
    pub bridge: BridgeConfig,
    pub native: NativeConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Storage root for credentials and chat mirrors.
    /// Defaults to `~/.wagate/sessions` when unset.
    pub dir: Option<PathBuf>,
    /// Reconnection attempts allowed per session. Values below 1 are treated as 1.
    pub max_retries: u32,
    /// Delay before a reconnect attempt, in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Pause before every outbound message send, in milliseconds.
    pub send_delay_ms: u64,
    /// How often the chat mirror of a multi-file session is written to disk.
    pub store_flush_interval_secs: u64,
    /// How long `POST /sessions/add` waits for a QR code or a connection.
    pub qr_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_retries: 5,
            reconnect_interval_ms: 5_000,
            send_delay_ms: 1_000,
            store_flush_interval_secs: 10,
            qr_timeout_secs: 60,
        }
    }
}

impl SessionsConfig {
    /// Resolved storage root.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("sessions"))
    }
}

/// Outbound event forwarding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: Option<String>,
}

impl WebhookConfig {
    /// The target URL, only when forwarding is switched on and a URL is set.
    pub fn target(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Protocol sidecar connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket base URL; each session connects to `{url}/sessions/{id}`.
    pub url: String,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3100".into(),
            request_timeout_secs: 30,
        }
    }
}

/// In-process multi-device backend.
///
/// Only honoured by builds with the `native` feature; other builds route
/// every session through the bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Serve multi-file sessions in-process instead of through the bridge.
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_target_requires_enabled_and_url() {
        let mut cfg = WebhookConfig::default();
        assert!(cfg.target().is_none());

        cfg.url = Some("http://sink.local/hook".into());
        assert!(cfg.target().is_none());

        cfg.enabled = true;
        assert_eq!(cfg.target(), Some("http://sink.local/hook"));

        cfg.url = Some("   ".into());
        assert!(cfg.target().is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: WagateConfig = toml::from_str(
            r#"
            [sessions]
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sessions.max_retries, 2);
        assert_eq!(cfg.sessions.send_delay_ms, 1_000);
        assert_eq!(cfg.server.port, 8000);
        assert!(!cfg.webhook.enabled);
        assert!(!cfg.native.enabled);
    }

    #[test]
    fn native_section_parses() {
        let cfg: WagateConfig = toml::from_str("[native]\nenabled = true\n").unwrap();
        assert!(cfg.native.enabled);
    }
}
