use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration, maps to `webswarm.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub swarm: SwarmSettings,
    pub signal: SignalConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ── Swarm ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmSettings {
    /// Hex-encoded 32-byte identity. Random per process when unset.
    pub identity: Option<String>,
    /// Upper bound on peers (connected + connecting) per channel.
    pub max_peers: usize,
    /// Outgoing links the topology tries to keep per channel.
    pub target_outgoing: usize,
    /// Minimum time between two membership refreshes of one channel.
    pub lookup_debounce_ms: u64,
    /// Failed connects tolerated before the candidate list is refreshed.
    pub candidate_attempts: u32,
    /// Repair pass interval while the topology is doing useful work.
    pub repair_interval_secs: u64,
    /// Repair pass interval once a pass finds nothing to do.
    pub relaxed_repair_interval_secs: u64,
    /// How long an outgoing connect waits for the transport to open.
    pub connect_timeout_secs: u64,
    /// Capacity of the swarm event bus.
    pub event_capacity: usize,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            identity: None,
            max_peers: 4,
            target_outgoing: 2,
            lookup_debounce_ms: 500,
            candidate_attempts: 5,
            repair_interval_secs: 10,
            relaxed_repair_interval_secs: 60,
            connect_timeout_secs: 30,
            event_capacity: 1024,
        }
    }
}

impl SwarmSettings {
    pub fn lookup_debounce(&self) -> Duration {
        Duration::from_millis(self.lookup_debounce_ms)
    }

    pub fn repair_interval(&self) -> Duration {
        Duration::from_secs(self.repair_interval_secs)
    }

    pub fn relaxed_repair_interval(&self) -> Duration {
        Duration::from_secs(self.relaxed_repair_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ── Signal ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Signaling endpoints, tried in round-robin order on reconnect.
    pub bootstrap: Vec<String>,
    /// Deadline for `candidates` and `leave` transactions.
    pub transaction_timeout_secs: u64,
    /// Deadline for a connection offer to be answered.
    pub offer_timeout_secs: u64,
    /// First delay before reconnecting; doubles per failure.
    pub reconnect_delay_ms: u64,
    /// Ceiling for the reconnect delay.
    pub max_reconnect_delay_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            bootstrap: vec!["ws://127.0.0.1:4000/ws".into()],
            transaction_timeout_secs: 10,
            offer_timeout_secs: 30,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
        }
    }
}

impl SignalConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/WebSocket listen address of the signaling service.
    pub listen: String,
    /// Enable permissive CORS.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4000".into(),
            cors: true,
        }
    }
}

impl ServerConfig {
    /// Replace the port of `listen`, keeping the host.
    pub fn with_port(&self, port: u16) -> Self {
        let host = self
            .listen
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("0.0.0.0");
        Self {
            listen: format!("{host}:{port}"),
            ..self.clone()
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{tag}: {}: {}", self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({h})")?;
        }
        Ok(())
    }
}

impl SwarmConfig {
    /// Parse the configured identity, if any.
    pub fn identity(&self) -> webswarm_core::Result<Option<webswarm_core::Identity>> {
        self.swarm
            .identity
            .as_deref()
            .map(|s| s.parse::<webswarm_core::Identity>())
            .transpose()
    }

    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Identity ───
        if let Err(e) = self.identity() {
            warnings.push(ConfigWarning {
                field: "swarm.identity".into(),
                message: e.to_string(),
                severity: WarningSeverity::Error,
                hint: Some("Use 64 hex characters, or remove it for a random identity".into()),
            });
        }

        // ── Degree ───
        if self.swarm.max_peers == 0 {
            warnings.push(ConfigWarning {
                field: "swarm.max_peers".into(),
                message: "max_peers is 0, no connection can ever be made".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 4".into()),
            });
        }
        if self.swarm.target_outgoing > self.swarm.max_peers {
            warnings.push(ConfigWarning {
                field: "swarm.target_outgoing".into(),
                message: format!(
                    "target_outgoing {} exceeds max_peers {}",
                    self.swarm.target_outgoing, self.swarm.max_peers
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Outgoing links are capped by max_peers".into()),
            });
        }

        // ── Repair cadence ───
        if self.swarm.repair_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "swarm.repair_interval_secs".into(),
                message: "repair interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        }
        if self.swarm.relaxed_repair_interval_secs < self.swarm.repair_interval_secs {
            warnings.push(ConfigWarning {
                field: "swarm.relaxed_repair_interval_secs".into(),
                message: "relaxed interval is shorter than the base interval".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Typical values are 30-60 seconds".into()),
            });
        }

        // ── Signal ───
        if self.signal.bootstrap.is_empty() {
            warnings.push(ConfigWarning {
                field: "signal.bootstrap".into(),
                message: "no signaling endpoints configured".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set e.g. [\"ws://127.0.0.1:4000/ws\"]".into()),
            });
        }
        for url in &self.signal.bootstrap {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                warnings.push(ConfigWarning {
                    field: "signal.bootstrap".into(),
                    message: format!("'{url}' is not a WebSocket URL"),
                    severity: WarningSeverity::Error,
                    hint: Some("Use a ws:// or wss:// URL".into()),
                });
            }
        }
        if self.signal.transaction_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "signal.transaction_timeout_secs".into(),
                message: "transaction timeout is 0, every call would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        }

        // ── Server listen address ───
        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '0.0.0.0:4000'".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
