use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::SwarmConfig;

/// Loads the webswarm configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<SwarmConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WEBSWARM_CONFIG env > ~/.webswarm/webswarm.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WEBSWARM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".webswarm")
            .join("webswarm.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> webswarm_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            SwarmConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(webswarm_core::WebswarmError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn parse(raw: &str, path: &Path) -> webswarm_core::Result<SwarmConfig> {
        toml::from_str::<SwarmConfig>(raw).map_err(|e| {
            webswarm_core::WebswarmError::Config(format!(
                "failed to parse {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> SwarmConfig {
        self.config.read().clone()
    }

    /// Path the config was (or would have been) loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (WEBSWARM_BOOTSTRAP, WEBSWARM_MAX_PEERS, PORT, ...).
    fn apply_env_overrides(mut config: SwarmConfig) -> SwarmConfig {
        if let Ok(v) = std::env::var("WEBSWARM_BOOTSTRAP") {
            let urls: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !urls.is_empty() {
                config.signal.bootstrap = urls;
            }
        }
        if let Ok(v) = std::env::var("WEBSWARM_MAX_PEERS") {
            if let Ok(max) = v.parse::<usize>() {
                config.swarm.max_peers = max;
            }
        }
        if let Ok(v) = std::env::var("WEBSWARM_TRANSACTION_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.signal.transaction_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("WEBSWARM_IDENTITY") {
            config.swarm.identity = Some(v);
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.server = config.server.with_port(port);
            }
        }
        if let Ok(v) = std::env::var("WEBSWARM_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}
