//! Environment-driven settings and tracing init.
//!
//! Grounded verbatim on `core_config`'s `Environment`/`FromEnv`/
//! `env_or_default`/`env_required` and `core_config::tracing::init_tracing`
//! (pretty in dev, JSON in prod), renamed onto this crate's settings type.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// `APP_ENV`-derived deployment environment; governs log format only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_duration_secs(key: &str, default_secs: f64) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<f64>()
            .map(Duration::from_secs_f64)
            .map_err(|e| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            }),
        Err(_) => Ok(Duration::from_secs_f64(default_secs)),
    }
}

/// Runtime settings read once at process start.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub nats_url: String,
    pub jobs_fetch_timeout: Duration,
    pub jobs_scheduler_fetch_timeout: Duration,
    pub streams_fetch_timeout: Duration,
    pub health_port: u16,
    pub shutdown_timeout: Duration,
}

impl WorkerSettings {
    /// Reads `NATS_URL`, `COSMO_JOBS_FETCH_TIMEOUT`, `COSMO_JOBS_SCHEDULER_FETCH_TIMEOUT`,
    /// `COSMO_STREAMS_FETCH_TIMEOUT`, `COSMO_HEALTH_PORT`, `COSMO_SHUTDOWN_TIMEOUT`.
    /// A malformed (present-but-unparseable) value is fatal; a missing one
    /// falls back to its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            nats_url: env_or_default("NATS_URL", "nats://localhost:4222"),
            jobs_fetch_timeout: env_duration_secs("COSMO_JOBS_FETCH_TIMEOUT", 0.1)?,
            jobs_scheduler_fetch_timeout: env_duration_secs(
                "COSMO_JOBS_SCHEDULER_FETCH_TIMEOUT",
                5.0,
            )?,
            streams_fetch_timeout: env_duration_secs("COSMO_STREAMS_FETCH_TIMEOUT", 0.1)?,
            health_port: env_or_default("COSMO_HEALTH_PORT", "8080")
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::ParseError {
                    key: "COSMO_HEALTH_PORT".to_string(),
                    details: e.to_string(),
                })?,
            shutdown_timeout: env_duration_secs("COSMO_SHUTDOWN_TIMEOUT", 25.0)?,
        })
    }
}

/// Pretty-printed, module-path-visible logs in dev; JSON, target-hidden
/// logs in prod. Infallible: a second call is a no-op.
pub fn init_tracing(environment: Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info,tower_http=info")
        } else {
            EnvFilter::new("debug,tower_http=debug")
        }
    });

    let result = if is_production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init()
    };

    match result {
        Ok(()) => info!(?environment, "tracing initialized"),
        Err(_) => debug!("tracing already initialized, skipping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn environment_production_is_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
    }

    #[test]
    fn unknown_app_env_defaults_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn settings_fall_back_to_defaults_when_unset() {
        temp_env::with_vars_unset(
            [
                "NATS_URL",
                "COSMO_JOBS_FETCH_TIMEOUT",
                "COSMO_JOBS_SCHEDULER_FETCH_TIMEOUT",
                "COSMO_STREAMS_FETCH_TIMEOUT",
                "COSMO_HEALTH_PORT",
                "COSMO_SHUTDOWN_TIMEOUT",
            ],
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert_eq!(settings.nats_url, "nats://localhost:4222");
                assert_eq!(settings.jobs_fetch_timeout, Duration::from_secs_f64(0.1));
                assert_eq!(settings.jobs_scheduler_fetch_timeout, Duration::from_secs(5));
                assert_eq!(settings.health_port, 8080);
            },
        );
    }

    #[test]
    fn malformed_timeout_is_a_config_error() {
        temp_env::with_var("COSMO_JOBS_FETCH_TIMEOUT", Some("not-a-number"), || {
            assert!(matches!(
                WorkerSettings::from_env(),
                Err(ConfigError::ParseError { .. })
            ));
        });
    }
}
