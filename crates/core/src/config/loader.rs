use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Prefix for environment overrides, e.g. `METAMORPH_CACHE__TTL_SECS=60`.
pub const ENV_PREFIX: &str = "METAMORPH_";

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "METAMORPH_CONFIG";

/// Short environment aliases for the most common settings.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("METAMORPH_CACHE_DIR", "cache.dir"),
    ("METAMORPH_JOBS", "scheduler.max_concurrency"),
    ("METAMORPH_TIMEOUT", "scheduler.timeout_secs"),
];

/// Default configuration file location (`~/.config/metamorph/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("metamorph").join("config.toml"))
}

/// Load configuration with environment variable overrides.
///
/// An explicit `path` (or `METAMORPH_CONFIG`) must exist. Without one, the
/// default location is read if present and built-in defaults are used
/// otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let explicit = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

    let mut figment = Figment::new();
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.display().to_string()));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(path) = default_config_path().filter(|p| p.exists()) {
                figment = figment.merge(Toml::file(path));
            }
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
    for (var, key) in ENV_ALIASES {
        let key = *key;
        figment = figment.merge(Env::raw().only(&[*var]).map(move |_| key.into()));
    }

    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
