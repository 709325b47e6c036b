use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PwatError, PwatResult};

/// Lowest key-stretch iteration count accepted on read or write
pub const MIN_HASH_ITERATIONS: u32 = 2048;

/// Top-level configuration (loaded from pwat.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PwatConfig {
    pub container: ContainerConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Suffix replacing the database extension for the live container
    pub attachment_suffix: String,
    /// Suffix for timestamped backups of the previous container
    pub backup_suffix: String,
    /// Suffix for the temporary duplicates container
    pub duplicate_suffix: String,
    /// Suffix for the import scratch container
    pub import_suffix: String,
    /// Keep the timestamped backup after a successful install (default: true)
    pub keep_backups: bool,
    /// Application name recorded in the header
    pub application: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            attachment_suffix: ".psatt3".into(),
            backup_suffix: ".psatt3.ibak".into(),
            duplicate_suffix: ".psatt3.dup".into(),
            import_suffix: ".psatt3.imp".into(),
            keep_backups: true,
            application: format!("pwat {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// SHA-256 key-stretch iterations for newly written containers
    pub hash_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            hash_iterations: MIN_HASH_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl PwatConfig {
    /// Parse a TOML file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> PwatResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PwatError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PwatResult<()> {
        if self.crypto.hash_iterations < MIN_HASH_ITERATIONS {
            return Err(PwatError::Config(format!(
                "crypto.hash_iterations must be at least {MIN_HASH_ITERATIONS} (got {})",
                self.crypto.hash_iterations
            )));
        }
        let c = &self.container;
        let suffixes = [
            &c.attachment_suffix,
            &c.backup_suffix,
            &c.duplicate_suffix,
            &c.import_suffix,
        ];
        if suffixes.iter().any(|s| s.is_empty()) {
            return Err(PwatError::Config("container suffixes must not be empty".into()));
        }
        for (i, a) in suffixes.iter().enumerate() {
            if suffixes[i + 1..].contains(a) {
                return Err(PwatError::Config(format!("container suffix {a} is used twice")));
            }
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(PwatError::Config(format!(
                "logging.format must be \"json\" or \"text\" (got {other:?})"
            ))),
        }
    }
}
