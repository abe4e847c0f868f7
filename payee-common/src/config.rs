//! Configuration file discovery, TOML loading and secret resolution
//!
//! Config file priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`~/.config/payee-resolver/config.toml`)
//! 4. System config (`/etc/payee-resolver/config.toml`)
//! 5. Built-in defaults (no file)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directory name used under the platform config directory
pub const APP_DIR_NAME: &str = "payee-resolver";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PAYEE_RESOLVER_CONFIG";

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives (trace, debug, info, warn, error, or full EnvFilter syntax)
    #[serde(default)]
    pub level: Option<String>,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

/// Locate the config file to load, if any
///
/// Returns `Ok(None)` when no source names a file and no default file exists.
/// An explicitly named file (CLI or environment) that does not exist is an error.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return explicit_path(path.to_path_buf(), "command line");
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return explicit_path(PathBuf::from(path), env_var_name);
        }
    }

    // Priority 3: User config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml")) {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // Priority 4: System-wide config
    if cfg!(unix) {
        let system = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system.exists() {
            return Ok(Some(system));
        }
    }

    Ok(None)
}

fn explicit_path(path: PathBuf, source: &str) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!(
            "Config file from {} not found: {}",
            source,
            path.display()
        )))
    }
}

/// Load a TOML config file, falling back to `T::default()` when no path is given
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Validate a secret or key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve a secret from environment then TOML
///
/// **Priority:** ENV → TOML. Warns when the secret is present in both.
pub fn resolve_secret(name: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in both environment ({}) and TOML config. Using environment.",
            name, env_var
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", name);
        return Some(value);
    }

    toml_value.map(|value| {
        info!("{} loaded from TOML config", name);
        value.to_string()
    })
}

/// Standard User-Agent string for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("payee-resolver/{}", env!("CARGO_PKG_VERSION"))
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level; `default_directives` is used when
/// neither is set or valid.
pub fn init_tracing(logging: &LoggingConfig, default_directives: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            logging
                .level
                .as_deref()
                .and_then(|level| EnvFilter::try_new(level).ok())
        })
        .unwrap_or_else(|| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
