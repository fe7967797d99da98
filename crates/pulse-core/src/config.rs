use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can drive it from a `HashMap`
/// and the CLI can supply a placeholder database URL in in-memory mode.
///
/// # Errors
///
/// Returns `ConfigError` if required values are missing or invalid.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| parse_var::<u32>(var, &or_default(var, default));
    let parse_u64 = |var: &str, default: &str| parse_var::<u64>(var, &or_default(var, default));
    let parse_usize =
        |var: &str, default: &str| parse_var::<usize>(var, &or_default(var, default));

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("PULSE_ENV", "development"));
    let log_level = or_default("PULSE_LOG_LEVEL", "info");
    let sources_path = PathBuf::from(or_default("PULSE_SOURCES_PATH", "./config/sources.yaml"));

    let db_max_connections = parse_u32("PULSE_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("PULSE_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("PULSE_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let classifier_url = or_default("PULSE_CLASSIFIER_URL", "https://api.deepseek.com")
        .trim_end_matches('/')
        .to_string();
    let classifier_model = or_default("PULSE_CLASSIFIER_MODEL", "deepseek-chat");
    let classifier_api_key = lookup("PULSE_CLASSIFIER_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    let classifier_timeout_secs = parse_u64("PULSE_CLASSIFIER_TIMEOUT_SECS", "60")?;

    let classify_concurrency = parse_usize("PULSE_CLASSIFY_CONCURRENCY", "60")?;
    if classify_concurrency == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "PULSE_CLASSIFY_CONCURRENCY".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let source_timeout_secs = parse_u64("PULSE_SOURCE_TIMEOUT_SECS", "1800")?;
    let default_target_count = parse_u32("PULSE_DEFAULT_TARGET_COUNT", "10")?;

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        sources_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        classifier_url,
        classifier_model,
        classifier_api_key,
        classifier_timeout_secs,
        classify_concurrency,
        source_timeout_secs,
        default_target_count,
    })
}

fn parse_var<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
