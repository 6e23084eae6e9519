//! Application configuration management.
//!
//! Configuration is read from a TOML file and layered with environment
//! overrides of the form `AIRLIFT__SECTION__KEY` (for example
//! `AIRLIFT__SESSION__GLOBAL_DEADLINE_SECS=120`). A missing file yields the
//! defaults, which match the timings the acquisition flow was tuned with:
//! - 90 s per session
//! - 10 s peer discovery, 15 s settle, 45 × 1 s connection polls
//! - 10 × 1 s association checks after applying a credential

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::StrategyPolicy;
use crate::types::ExtractionStrategy;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AIRLIFT_CONFIG";

/// Prefix for per-key environment overrides.
pub const ENV_PREFIX: &str = "AIRLIFT";

/// Errors from loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file or environment could not be parsed into [`AirliftConfig`].
    #[error("failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The config file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config could not be rendered as TOML.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} invalid fields", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirliftConfig {
    /// Session deadline and strategy order.
    pub session: SessionConfig,
    /// WiFi Direct negotiation.
    pub p2p: P2pConfig,
    /// Characteristic-write listening.
    pub gatt: GattConfig,
    /// Hotspot capture.
    pub hotspot: HotspotConfig,
    /// Radio-only heuristic.
    pub radio_only: RadioOnlyConfig,
    /// Applying the credential to the station interface.
    pub connector: ConnectorConfig,
    /// External tool invocation.
    pub tools: ToolsConfig,
    /// Credential record location.
    pub storage: StorageConfig,
    /// Bluetooth adapter selection.
    pub bluetooth: BluetoothConfig,
    /// HTTP status API.
    pub server: ServerConfig,
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Overall budget for one session, in seconds.
    pub global_deadline_secs: u64,
    /// Strategies to run, in order.
    pub strategies: Vec<ExtractionStrategy>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            global_deadline_secs: 90,
            strategies: ExtractionStrategy::ALL.to_vec(),
        }
    }
}

impl SessionConfig {
    /// Session deadline.
    #[must_use]
    pub const fn global_deadline(&self) -> Duration {
        Duration::from_secs(self.global_deadline_secs)
    }
}

/// WiFi Direct negotiation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Interface passed to `wpa_cli -i`.
    pub interface: String,
    /// Timeout for the discovery command.
    pub discover_timeout_secs: u64,
    /// Wait after discovery so peer announcements arrive.
    pub settle_secs: u64,
    /// Interval between connection status polls.
    pub poll_interval_secs: u64,
    /// Status polls per peer before giving up on it.
    pub poll_attempts: u32,
    /// Wait after a service-discovery request.
    pub service_discovery_wait_secs: u64,
    /// Service-discovery query sent to the peer.
    pub service_query: String,
    /// Wait after requesting group formation.
    pub group_wait_secs: u64,
    /// Minimum remaining session time to start this strategy.
    pub min_budget_secs: u64,
    /// Attempts when the strategy errors.
    pub max_attempts: u32,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            discover_timeout_secs: 10,
            settle_secs: 15,
            poll_interval_secs: 1,
            poll_attempts: 45,
            service_discovery_wait_secs: 10,
            service_query: "02000001".to_string(),
            group_wait_secs: 15,
            min_budget_secs: 25,
            max_attempts: 1,
        }
    }
}

impl P2pConfig {
    /// Discovery command timeout.
    #[must_use]
    pub const fn discover_timeout(&self) -> Duration {
        Duration::from_secs(self.discover_timeout_secs)
    }

    /// Settle interval after discovery.
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Status poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Wait after a service-discovery request.
    #[must_use]
    pub const fn service_discovery_wait(&self) -> Duration {
        Duration::from_secs(self.service_discovery_wait_secs)
    }

    /// Wait after group formation.
    #[must_use]
    pub const fn group_wait(&self) -> Duration {
        Duration::from_secs(self.group_wait_secs)
    }

    /// Scheduling policy for the negotiation strategy.
    #[must_use]
    pub const fn policy(&self) -> StrategyPolicy {
        StrategyPolicy::new(Duration::from_secs(self.min_budget_secs), self.max_attempts)
    }
}

/// Characteristic-write listening settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    /// How long to wait for the peer to write both characteristics.
    pub listen_secs: u64,
    /// How often to check for written values.
    pub poll_interval_secs: u64,
    /// Local name advertised with the credential service.
    pub local_name: String,
    /// Minimum remaining session time to start this strategy.
    pub min_budget_secs: u64,
    /// Attempts when the strategy errors.
    pub max_attempts: u32,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            listen_secs: 30,
            poll_interval_secs: 2,
            local_name: "airlift".to_string(),
            min_budget_secs: 5,
            max_attempts: 1,
        }
    }
}

impl GattConfig {
    /// Listening window.
    #[must_use]
    pub const fn listen(&self) -> Duration {
        Duration::from_secs(self.listen_secs)
    }

    /// Check interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Scheduling policy for the characteristic-write strategy.
    #[must_use]
    pub const fn policy(&self) -> StrategyPolicy {
        StrategyPolicy::new(Duration::from_secs(self.min_budget_secs), self.max_attempts)
    }
}

/// Hotspot capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    /// Interface the local hotspot runs on.
    pub interface: String,
    /// Address prefix handed out to hotspot clients.
    pub subnet_prefix: String,
    /// How long to watch for a client.
    pub listen_secs: u64,
    /// Neighbour table check interval.
    pub poll_interval_secs: u64,
    /// Minimum remaining session time to start this strategy.
    pub min_budget_secs: u64,
    /// Attempts when the strategy errors.
    pub max_attempts: u32,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            subnet_prefix: "192.168.4.".to_string(),
            listen_secs: 20,
            poll_interval_secs: 2,
            min_budget_secs: 5,
            max_attempts: 1,
        }
    }
}

impl HotspotConfig {
    /// Watch window.
    #[must_use]
    pub const fn listen(&self) -> Duration {
        Duration::from_secs(self.listen_secs)
    }

    /// Check interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Scheduling policy for the hotspot strategy.
    #[must_use]
    pub const fn policy(&self) -> StrategyPolicy {
        StrategyPolicy::new(Duration::from_secs(self.min_budget_secs), self.max_attempts)
    }
}

/// Radio-only heuristic settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioOnlyConfig {
    /// Minimum remaining session time to start this strategy.
    pub min_budget_secs: u64,
    /// Attempts when the strategy errors.
    pub max_attempts: u32,
}

impl Default for RadioOnlyConfig {
    fn default() -> Self {
        Self {
            min_budget_secs: 2,
            max_attempts: 1,
        }
    }
}

impl RadioOnlyConfig {
    /// Scheduling policy for the radio-only strategy.
    #[must_use]
    pub const fn policy(&self) -> StrategyPolicy {
        StrategyPolicy::new(Duration::from_secs(self.min_budget_secs), self.max_attempts)
    }
}

/// Network connector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Station interface to associate.
    pub interface: String,
    /// Supplicant configuration file written on apply.
    pub supplicant_config: PathBuf,
    /// Supplicant control socket directory.
    pub ctrl_interface: String,
    /// Association checks after applying.
    pub verify_attempts: u32,
    /// Interval between association checks.
    pub verify_interval_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            supplicant_config: PathBuf::from("/etc/wpa_supplicant/wpa_supplicant.conf"),
            ctrl_interface: "/var/run/wpa_supplicant".to_string(),
            verify_attempts: 10,
            verify_interval_secs: 1,
        }
    }
}

impl ConnectorConfig {
    /// Association check interval.
    #[must_use]
    pub const fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }
}

/// External tool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Prefix every command with `sudo`.
    pub use_sudo: bool,
    /// Timeout for commands without a more specific bound.
    pub command_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            use_sudo: false,
            command_timeout_secs: 10,
        }
    }
}

impl ToolsConfig {
    /// Default per-command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Credential record location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit record path. Unset means the platform default.
    pub credential_path: Option<PathBuf>,
}

/// Bluetooth adapter selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name (`hci0`). Unset means the default adapter.
    pub adapter: Option<String>,
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether to serve the API at all.
    pub enabled: bool,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AirliftConfig {
    /// Load configuration from the default location plus environment.
    ///
    /// If `AIRLIFT_CONFIG` names a file, that file must exist. Otherwise a
    /// missing default file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, an override has the
    /// wrong type, or the result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                Self::load_from(&path, None)
            }
            None => Self::load_from(&Self::config_path()?, None),
        }
    }

    /// Load from `path` (if it exists) layered with environment overrides.
    ///
    /// `env` replaces the process environment as the override source when
    /// given.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_from(
        path: &Path,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if path.exists() {
            builder = builder.add_source(
                ::config::File::from(path.to_path_buf()).format(::config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::invalid(field, message));
            }
        };

        check(
            self.session.global_deadline_secs > 0,
            "session.global_deadline_secs",
            "must be greater than zero",
        );
        check(
            !self.session.strategies.is_empty(),
            "session.strategies",
            "at least one strategy is required",
        );
        let unique: HashSet<_> = self.session.strategies.iter().collect();
        check(
            unique.len() == self.session.strategies.len(),
            "session.strategies",
            "strategies must not repeat",
        );

        check(!self.p2p.interface.trim().is_empty(), "p2p.interface", "must not be empty");
        check(self.p2p.poll_attempts > 0, "p2p.poll_attempts", "must be greater than zero");
        check(
            self.p2p.poll_interval_secs > 0,
            "p2p.poll_interval_secs",
            "must be greater than zero",
        );
        check(
            self.p2p.discover_timeout_secs > 0,
            "p2p.discover_timeout_secs",
            "must be greater than zero",
        );
        check(
            is_hex_query(&self.p2p.service_query),
            "p2p.service_query",
            "must be an even-length hex string",
        );

        check(
            self.gatt.poll_interval_secs > 0,
            "gatt.poll_interval_secs",
            "must be greater than zero",
        );
        check(
            !self.hotspot.subnet_prefix.is_empty(),
            "hotspot.subnet_prefix",
            "must not be empty",
        );
        check(
            self.hotspot.poll_interval_secs > 0,
            "hotspot.poll_interval_secs",
            "must be greater than zero",
        );

        for (field, attempts) in [
            ("p2p.max_attempts", self.p2p.max_attempts),
            ("gatt.max_attempts", self.gatt.max_attempts),
            ("hotspot.max_attempts", self.hotspot.max_attempts),
            ("radio_only.max_attempts", self.radio_only.max_attempts),
        ] {
            check(attempts > 0, field, "must be at least 1");
        }

        check(
            !self.connector.interface.trim().is_empty(),
            "connector.interface",
            "must not be empty",
        );
        check(
            self.connector.verify_attempts > 0,
            "connector.verify_attempts",
            "must be greater than zero",
        );
        check(
            self.tools.command_timeout_secs > 0,
            "tools.command_timeout_secs",
            "must be greater than zero",
        );
        check(
            self.bluetooth
                .adapter
                .as_deref()
                .map_or(true, |name| !name.trim().is_empty()),
            "bluetooth.adapter",
            "must not be empty when set",
        );
        check(self.server.port > 0, "server.port", "must not be zero");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Strategy policy for `strategy` from its section.
    #[must_use]
    pub const fn policy_for(&self, strategy: ExtractionStrategy) -> StrategyPolicy {
        match strategy {
            ExtractionStrategy::P2pNegotiation => self.p2p.policy(),
            ExtractionStrategy::CharacteristicWrite => self.gatt.policy(),
            ExtractionStrategy::HotspotCapture => self.hotspot.policy(),
            ExtractionStrategy::RadioOnlyHeuristic => self.radio_only.policy(),
        }
    }

    /// The default configuration file path.
    ///
    /// On Raspberry Pi: `/etc/airlift/config.toml`
    /// For development: `~/.config/airlift/config.toml`
    ///
    /// # Errors
    ///
    /// Returns an error off Linux when no home directory is available.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/airlift/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "airlift").ok_or_else(|| {
                ConfigError::invalid("config_path", "cannot determine config directory")
            })?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

fn is_hex_query(query: &str) -> bool {
    !query.is_empty() && query.len() % 2 == 0 && query.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<::config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AirliftConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.global_deadline(), Duration::from_secs(90));
        assert_eq!(config.p2p.poll_attempts, 45);
        assert_eq!(config.connector.verify_attempts, 10);
        assert_eq!(config.session.strategies, ExtractionStrategy::ALL.to_vec());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AirliftConfig::load_from(&dir.path().join("absent.toml"), env(&[])).unwrap();
        assert_eq!(config, AirliftConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nglobal_deadline_secs = 120\n\n[p2p]\nsettle_secs = 5\n",
        )
        .unwrap();

        let config = AirliftConfig::load_from(&path, env(&[])).unwrap();
        assert_eq!(config.session.global_deadline_secs, 120);
        assert_eq!(config.p2p.settle_secs, 5);
        assert_eq!(config.p2p.discover_timeout_secs, 10);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 8080\n").unwrap();

        let config = AirliftConfig::load_from(
            &path,
            env(&[
                ("AIRLIFT__SERVER__PORT", "9090"),
                ("AIRLIFT__TOOLS__USE_SUDO", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(config.tools.use_sudo);
    }

    #[test]
    fn test_strategy_order_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nstrategies = [\"characteristic_write\", \"p2p_negotiation\"]\n",
        )
        .unwrap();

        let config = AirliftConfig::load_from(&path, env(&[])).unwrap();
        assert_eq!(
            config.session.strategies,
            vec![
                ExtractionStrategy::CharacteristicWrite,
                ExtractionStrategy::P2pNegotiation
            ]
        );
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = AirliftConfig::default();
        config.session.global_deadline_secs = 0;
        config.p2p.poll_attempts = 0;
        config.server.port = 0;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_single_error() {
        let mut config = AirliftConfig::default();
        config.p2p.service_query = "0200001".to_string();

        match config.validate() {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "p2p.service_query");
            }
            other => panic!("expected one error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_strategies_rejected() {
        let mut config = AirliftConfig::default();
        config.session.strategies = vec![
            ExtractionStrategy::HotspotCapture,
            ExtractionStrategy::HotspotCapture,
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nglobal_deadline_secs = \"soon\"\n").unwrap();

        assert!(matches!(
            AirliftConfig::load_from(&path, env(&[])),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = AirliftConfig::default();
        config.hotspot.subnet_prefix = "10.42.0.".to_string();
        config.bluetooth.adapter = Some("hci1".to_string());
        config.save_to(&path).unwrap();

        let loaded = AirliftConfig::load_from(&path, env(&[])).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_policy_for_strategy() {
        let config = AirliftConfig::default();
        let policy = config.policy_for(ExtractionStrategy::P2pNegotiation);
        assert_eq!(policy.min_budget, Duration::from_secs(25));
        assert_eq!(policy.max_attempts, 1);
    }
}
