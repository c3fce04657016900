use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Lifetime of a session from creation, in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Inactivity window after which the sweeper evicts a live session, in seconds
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Delay between the last disconnect and in-memory teardown, in seconds
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Interval of the expiry sweeper, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of concurrent attachments per session
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,

    /// Prefix of every key written to the session store
    #[serde(default = "default_store_key_prefix")]
    pub store_key_prefix: String,

    /// HS256 secret for participant tokens. Without it participants self-declare their id.
    pub participant_token_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make sessions unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("SESSION_TTL_SECS", self.session_ttl_secs),
            ("IDLE_TTL_SECS", self.idle_ttl_secs),
            ("GRACE_PERIOD_SECS", self.grace_period_secs),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if self.max_participants == 0 {
            return Err(ConfigError::Invalid("MAX_PARTICIPANTS must be greater than zero".to_string()));
        }
        if self.store_key_prefix.is_empty() || self.store_key_prefix.contains(':') {
            return Err(ConfigError::Invalid("STORE_KEY_PREFIX must be non-empty and contain no ':'".to_string()));
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            session_ttl_secs: default_session_ttl_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
            grace_period_secs: default_grace_period_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_participants: default_max_participants(),
            store_key_prefix: default_store_key_prefix(),
            participant_token_secret: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_session_ttl_secs() -> u64 {
    1200
}

fn default_idle_ttl_secs() -> u64 {
    1200
}

fn default_grace_period_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_participants() -> usize {
    16
}

fn default_store_key_prefix() -> String {
    "colabri".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_ttl(), Duration::from_secs(1200));
        assert_eq!(config.grace_period(), Duration::from_secs(30));
        assert_eq!(config.server_address(), "0.0.0.0:3000");
        assert!(config.is_development());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = Config {
            grace_period_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            max_participants: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn prefix_with_separator_is_rejected() {
        let config = Config {
            store_key_prefix: "a:b".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn only_dev_environments_count_as_development() {
        let config = Config {
            environment: "Development".to_string(),
            ..Config::default()
        };
        assert!(config.is_development());

        let config = Config {
            environment: "prod".to_string(),
            ..Config::default()
        };
        assert!(!config.is_development());
        assert_eq!(config.log_level, "info");
    }
}
