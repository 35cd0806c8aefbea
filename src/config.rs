//! Environment configuration with sensible defaults.
//!
//! Recognized variables:
//! `HDRP_PRINCIPAL_ADDR`, `HDRP_RESEARCHER_ADDR`, `HDRP_CRITIC_ADDR`,
//! `HDRP_SYNTHESIZER_ADDR`, `HDRP_DB_PATH`, `MAX_WORKERS`,
//! `RESEARCHER_RATE_LIMIT`, `CRITIC_RATE_LIMIT`, `SYNTHESIZER_RATE_LIMIT`,
//! `LOCK_PROVIDER`, `LOCK_TIMEOUT`, `NODE_EXECUTION_TIMEOUT`.
//!
//! Durations accept plain seconds (`"45"`) or an `s`/`m`/`h` suffix
//! (`"30s"`, `"5m"`).

use std::time::Duration;

use crate::limits::LockProvider;

/// Resolved runtime settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub principal_addr: String,
    pub researcher_addr: String,
    pub critic_addr: String,
    pub synthesizer_addr: String,
    pub db_path: String,
    pub max_workers: usize,
    pub researcher_rate_limit: usize,
    pub critic_rate_limit: usize,
    pub synthesizer_rate_limit: usize,
    pub lock_provider: LockProvider,
    pub lock_timeout: Duration,
    pub node_execution_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            principal_addr: "http://127.0.0.1:50051".to_string(),
            researcher_addr: "http://127.0.0.1:50052".to_string(),
            critic_addr: "http://127.0.0.1:50053".to_string(),
            synthesizer_addr: "http://127.0.0.1:50054".to_string(),
            db_path: "./data/orchestrator.db".to_string(),
            max_workers: 10,
            researcher_rate_limit: 5,
            critic_rate_limit: 3,
            synthesizer_rate_limit: 2,
            lock_provider: LockProvider::None,
            lock_timeout: Duration::from_secs(30),
            node_execution_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            principal_addr: env_string("HDRP_PRINCIPAL_ADDR", defaults.principal_addr),
            researcher_addr: env_string("HDRP_RESEARCHER_ADDR", defaults.researcher_addr),
            critic_addr: env_string("HDRP_CRITIC_ADDR", defaults.critic_addr),
            synthesizer_addr: env_string("HDRP_SYNTHESIZER_ADDR", defaults.synthesizer_addr),
            db_path: env_string("HDRP_DB_PATH", defaults.db_path),
            max_workers: env_usize("MAX_WORKERS", defaults.max_workers),
            researcher_rate_limit: env_usize("RESEARCHER_RATE_LIMIT", defaults.researcher_rate_limit),
            critic_rate_limit: env_usize("CRITIC_RATE_LIMIT", defaults.critic_rate_limit),
            synthesizer_rate_limit: env_usize(
                "SYNTHESIZER_RATE_LIMIT",
                defaults.synthesizer_rate_limit,
            ),
            lock_provider: std::env::var("LOCK_PROVIDER")
                .map(|s| LockProvider::parse(&s))
                .unwrap_or(defaults.lock_provider),
            lock_timeout: env_duration("LOCK_TIMEOUT", defaults.lock_timeout),
            node_execution_timeout: env_duration(
                "NODE_EXECUTION_TIMEOUT",
                defaults.node_execution_timeout,
            ),
        }
    }

    /// `(node_type, capacity)` pairs for the rate limiter manager.
    #[must_use]
    pub fn rate_limits(&self) -> Vec<(String, usize)> {
        vec![
            ("researcher".to_string(), self.researcher_rate_limit),
            ("critic".to_string(), self.critic_rate_limit),
            ("synthesizer".to_string(), self.synthesizer_rate_limit),
        ]
    }
}

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Parse `"45"`, `"30s"`, `"5m"`, or `"1h"`.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let (number, unit) = value.split_at(value.len().checked_sub(1)?);
    let number: u64 = number.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn defaults_are_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.max_workers, 10);
        assert_eq!(settings.researcher_rate_limit, 5);
        assert_eq!(settings.critic_rate_limit, 3);
        assert_eq!(settings.synthesizer_rate_limit, 2);
        assert_eq!(settings.node_execution_timeout, Duration::from_secs(300));
    }
}
