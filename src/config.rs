use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

/// Environment variable that disables crash diagnostics when set to "disable" or "no".
pub const SHOW_INFO_ENV: &str = "SIGNAL_SHOW_INFO";

/// Environment variable naming the port a gdbserver should listen on after a crash.
pub const GDBSERVER_PORT_ENV: &str = "GDBSERVER_PORT";

/// Where the running system's version string is read from during a crash report.
pub const DEFAULT_VERSION_FILE: &str = "/legato/systems/current/version";

/// Top-level configuration loaded from sigbridge.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct BridgeConfig {
    pub diagnostics: DiagnosticsConfig,
    pub termination: TerminationConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// "disable" or "no" (any case) turns crash diagnostics off.
    pub show_info: String,
    /// Port for a post-mortem gdbserver. `None` or 0 disables it. A value
    /// that is not a port disables it with a warning.
    #[serde(deserialize_with = "lenient_port")]
    pub gdbserver_port: Option<u32>,
    /// File whose contents are reported as the version.
    pub version_file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Install the handler that exits cleanly on SIGTERM.
    pub install_default_handler: bool,
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`BridgeConfig`].
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A gdbserver port that is not a non-negative integer.
    InvalidPort { value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::InvalidPort { value } => {
                write!(f, "incorrect {GDBSERVER_PORT_ENV}={value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidPort { .. } => None,
        }
    }
}

impl BridgeConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply the process environment on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        self.diagnostics = self.diagnostics.with_env_overrides();
        self
    }
}

impl DiagnosticsConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// An unparseable port is discarded with a warning, leaving the gdbserver
    /// disabled.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(SHOW_INFO_ENV) {
            self.show_info = value;
        }
        if let Some(value) = lookup(GDBSERVER_PORT_ENV) {
            self.gdbserver_port = match parse_gdbserver_port(&value) {
                Ok(port) => port,
                Err(e) => {
                    tracing::warn!("{e}. Discarded...");
                    None
                }
            };
        }
        self
    }

    /// Whether crash diagnostics should be installed.
    pub fn enabled(&self) -> bool {
        !is_disable_value(&self.show_info)
    }

    /// The configured gdbserver port, if it designates one.
    pub fn remote_debug_port(&self) -> Option<u32> {
        self.gdbserver_port.filter(|&port| port != 0)
    }
}

/// "disable" and "no", compared case-insensitively.
pub fn is_disable_value(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("disable") || value.eq_ignore_ascii_case("no")
}

/// Parse a gdbserver port. Zero parses as "no port".
pub fn parse_gdbserver_port(value: &str) -> Result<Option<u32>, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(0) => Ok(None),
        Ok(port) => Ok(Some(port)),
        Err(_) => Err(ConfigError::InvalidPort {
            value: value.to_string(),
        }),
    }
}

/// Accept the port as an integer or a string; anything unparseable becomes `None`.
fn lenient_port<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = toml::Value::deserialize(deserializer)?;
    let text = match &value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match parse_gdbserver_port(&text) {
        Ok(port) => Ok(port),
        Err(e) => {
            tracing::warn!("{e}. Discarded...");
            Ok(None)
        }
    }
}

// --- Default implementations ---

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            show_info: "yes".to_string(),
            gdbserver_port: None,
            version_file: PathBuf::from(DEFAULT_VERSION_FILE),
        }
    }
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            install_default_handler: true,
        }
    }
}
