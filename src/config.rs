use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// Continuous-watch samples with a worse reported accuracy (meters) are
    /// rejected. Initial fixes bypass the filter entirely.
    pub watch_accuracy_max_m: f64,
    /// How often the driver-side send timer pushes the latest known fix.
    pub send_interval: Duration,
    /// Minimum gap between routing-provider calls per delivery.
    pub route_throttle: Duration,
    /// How often a subscriber's view is healed with an authoritative snapshot.
    pub reconcile_interval: Duration,
    /// Base URL of the external routing provider; empty selects the offline
    /// straight-line fallback.
    pub routing_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            watch_accuracy_max_m: parse_or_default("WATCH_ACCURACY_MAX_M", 2.0)?,
            send_interval: Duration::from_secs(parse_or_default("SEND_INTERVAL_SECS", 6)?),
            route_throttle: Duration::from_secs(parse_or_default("ROUTE_THROTTLE_SECS", 5)?),
            reconcile_interval: Duration::from_secs(parse_or_default(
                "RECONCILE_INTERVAL_SECS",
                12,
            )?),
            routing_base_url: env::var("ROUTING_BASE_URL").unwrap_or_default(),
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::time::Duration;

    use super::Config;

    const KEYS: &[&str] = &[
        "HTTP_PORT",
        "LOG_LEVEL",
        "EVENT_BUFFER_SIZE",
        "WATCH_ACCURACY_MAX_M",
        "SEND_INTERVAL_SECS",
        "ROUTE_THROTTLE_SECS",
        "RECONCILE_INTERVAL_SECS",
        "ROUTING_BASE_URL",
    ];

    // The environment is process-global, so everything touching it lives in
    // one test function instead of racing across the parallel test runner.
    #[test]
    fn from_env_defaults_overrides_and_rejects_garbage() {
        unsafe {
            for key in KEYS {
                env::remove_var(key);
            }
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.event_buffer_size, 1024);
        assert_eq!(config.watch_accuracy_max_m, 2.0);
        assert_eq!(config.send_interval, Duration::from_secs(6));
        assert_eq!(config.route_throttle, Duration::from_secs(5));
        assert_eq!(config.reconcile_interval, Duration::from_secs(12));
        assert!(config.routing_base_url.is_empty());

        unsafe {
            env::set_var("HTTP_PORT", "8080");
            env::set_var("WATCH_ACCURACY_MAX_M", "3.5");
            env::set_var("ROUTING_BASE_URL", "http://osrm.internal:5000");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.watch_accuracy_max_m, 3.5);
        assert_eq!(config.routing_base_url, "http://osrm.internal:5000");

        unsafe {
            env::set_var("SEND_INTERVAL_SECS", "often");
        }
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("SEND_INTERVAL_SECS"));

        unsafe {
            for key in KEYS {
                env::remove_var(key);
            }
        }
    }
}
