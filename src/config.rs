use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::env::is_production;

/// Longest session a login may mint.
pub const MAX_SESSION_LIFETIME: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

/// Server-side knobs. Every field has a default so a bare environment boots.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub session_lifetime: Duration,
    pub session_sweep_interval: Duration,
    pub bcrypt_cost: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: usize,
    pub heartbeat_interval: Duration,
    pub channel_capacity: usize,
    pub persistence_timeout: Duration,
    pub expose_error_details: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://course_progress.db?mode=rwc".to_string(),
            session_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            session_sweep_interval: Duration::from_secs(60 * 60),
            bcrypt_cost: 12,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 10,
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 64,
            persistence_timeout: Duration::from_millis(5000),
            expose_error_details: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            database_url: dotenvy::var("DATABASE_URL").unwrap_or(defaults.database_url),
            session_lifetime: Duration::from_secs(read_var(
                "SESSION_LIFETIME_SECS",
                defaults.session_lifetime.as_secs(),
            )?),
            session_sweep_interval: Duration::from_secs(read_var(
                "SESSION_SWEEP_INTERVAL_SECS",
                defaults.session_sweep_interval.as_secs(),
            )?),
            bcrypt_cost: read_var("BCRYPT_COST", defaults.bcrypt_cost)?,
            rate_limit_window: Duration::from_secs(read_var(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )?),
            rate_limit_max_requests: read_var(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            heartbeat_interval: Duration::from_secs(read_var(
                "SSE_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            channel_capacity: read_var("SSE_CHANNEL_CAPACITY", defaults.channel_capacity)?,
            persistence_timeout: Duration::from_millis(read_var(
                "PERSISTENCE_TIMEOUT_MS",
                defaults.persistence_timeout.as_millis() as u64,
            )?),
            expose_error_details: read_var("EXPOSE_ERROR_DETAILS", !is_production())?,
        };

        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let durations = [
            ("SESSION_LIFETIME_SECS", self.session_lifetime),
            ("SESSION_SWEEP_INTERVAL_SECS", self.session_sweep_interval),
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window),
            ("SSE_HEARTBEAT_SECS", self.heartbeat_interval),
            ("PERSISTENCE_TIMEOUT_MS", self.persistence_timeout),
        ];

        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Zero { name });
            }
        }

        if self.session_lifetime > MAX_SESSION_LIFETIME {
            return Err(ConfigError::InvalidValue {
                name: "SESSION_LIFETIME_SECS",
                value: self.session_lifetime.as_secs().to_string(),
            });
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero {
                name: "SSE_CHANNEL_CAPACITY",
            });
        }

        // bcrypt rejects anything outside 4..=31
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "BCRYPT_COST",
                value: self.bcrypt_cost.to_string(),
            });
        }

        Ok(())
    }
}

fn read_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match dotenvy::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}
