//! TOML-based configuration system for mergeway.
//!
//! The GitHub token is never written into the file itself: `token_env` names
//! an environment variable that is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// GitHub API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Fan-out and size limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Environment variable holding the fallback access token. Requests may
    /// carry their own token instead.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_user_agent() -> String {
    "mergeway/0.1".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Bounds on remote fan-out and rendered size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Changed files examined per comparison; the rest are truncated.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Content fetches in flight at once.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Files merging into more hunks than this are flagged as oversized.
    #[serde(default = "default_max_hunks_per_file")]
    pub max_hunks_per_file: usize,

    /// Idle merge sessions are dropped after this many seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_max_files() -> usize {
    300
}
fn default_max_concurrent_fetches() -> usize {
    8
}
fn default_max_hunks_per_file() -> usize {
    1000
}
fn default_session_ttl_secs() -> u64 {
    3600
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_hunks_per_file: default_max_hunks_per_file(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the token environment variable.
    ///
    /// A missing variable only logs a warning: every request may still bring
    /// its own token.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.api_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.api_url".into(),
                detail: "GitHub API URL must not be empty".into(),
            });
        }
        if self.github.token_env.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.token_env".into(),
                detail: "token environment variable name must not be empty".into(),
            });
        }
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "server.listen".into(),
                detail: format!("'{}' is not a socket address", self.server.listen),
            });
        }
        let limits = [
            ("limits.max_files", self.limits.max_files as u64, 10_000),
            (
                "limits.max_concurrent_fetches",
                self.limits.max_concurrent_fetches as u64,
                256,
            ),
            (
                "limits.max_hunks_per_file",
                self.limits.max_hunks_per_file as u64,
                1_000_000,
            ),
            // One week.
            ("limits.session_ttl_secs", self.limits.session_ttl_secs, 604_800),
        ];
        for (field, value, max) in limits {
            if value == 0 || value > max {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: format!("must be between 1 and {}, got {}", max, value),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
