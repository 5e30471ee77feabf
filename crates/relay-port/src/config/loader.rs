//! Configuration loader.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Config file (`relay.toml` in the working directory, or an explicit path)
//! 3. Environment variables (`RELAY_*`)
//!
//! Each layer overrides the previous. Command-line flags are applied by
//! the binary on top of the loaded result.

use super::{ConfigError, TransportConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config file name, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Helper macro for parsing numeric environment variables.
macro_rules! parse_env_num {
    ($lookup:expr, $field:expr, $var:literal) => {
        if let Some(val) = $lookup($var) {
            $field = val
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var($var, "expected unsigned integer"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use relay_port::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_config_file("/etc/relay/relay.toml")
///     .skip_env_vars()
///     .load()?;
/// # Ok::<(), relay_port::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Explicit config file; defaults to [`DEFAULT_CONFIG_FILE`].
    config_path: Option<PathBuf>,

    /// Skip environment variable loading.
    skip_env: bool,

    /// Skip config file loading.
    skip_file: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the config file to read instead of `./relay.toml`.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    #[must_use]
    pub fn skip_config_file(mut self) -> Self {
        self.skip_file = true;
        self
    }

    /// Loads and layers configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file exists but cannot be
    /// parsed, an environment variable is malformed, or the result fails
    /// [`TransportConfig::validate`]. A missing config file is ignored.
    pub fn load(&self) -> Result<TransportConfig, ConfigError> {
        let mut config = TransportConfig::default();

        if !self.skip_file {
            let path = self
                .config_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if let Some(file_config) = Self::load_file(&path)? {
                debug!(path = %path.display(), "Loaded transport config");
                config = file_config;
            }
        }

        if !self.skip_env {
            apply_env(&mut config, |name| std::env::var(name).ok())?;
        }

        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Option<TransportConfig>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::read_file(path, e)),
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| ConfigError::parse_toml(path, e))
    }
}

/// Applies `RELAY_*` overrides using `lookup` to resolve variables.
fn apply_env(
    config: &mut TransportConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    parse_env_num!(lookup, config.max_message_size, "RELAY_MAX_MESSAGE_SIZE");
    parse_env_num!(lookup, config.reassembly_timeout_ms, "RELAY_REASSEMBLY_TIMEOUT_MS");
    parse_env_num!(lookup, config.max_in_flight, "RELAY_MAX_IN_FLIGHT");
    parse_env_num!(lookup, config.max_buffered_bytes, "RELAY_MAX_BUFFERED_BYTES");
    parse_env_num!(lookup, config.call_timeout_ms, "RELAY_CALL_TIMEOUT_MS");
    Ok(())
}
