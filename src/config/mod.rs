use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Optional JSON file of class records loaded into the in-memory store
    pub class_seed_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    /// How long a room must sit empty past scheduled end before it is reclaimed
    pub idle_grace: Duration,
    /// Empty-room window after the host left before the class is ended early
    pub host_absent_grace: Duration,
    pub finalize_retry_interval: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    /// How early before scheduled start a participant may join and wait
    pub pre_join_grace: Duration,
    pub presence_threshold: f64,
    pub chat_log_capacity: usize,
    pub max_participants: usize,
    /// How long a closed room keeps rejecting joins before it is reaped
    pub closed_room_retention: Duration,
    /// Events buffered per connection before it is dropped as stalled
    pub outbound_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            class_seed_file: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            idle_grace: Duration::from_secs(300),
            host_absent_grace: Duration::from_secs(300),
            finalize_retry_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(300),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pre_join_grace: Duration::from_secs(600),
            presence_threshold: 0.8,
            chat_log_capacity: 200,
            max_participants: 100,
            closed_room_retention: Duration::from_secs(120),
            outbound_queue_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let scheduler_defaults = SchedulerConfig::default();
        let session_defaults = SessionConfig::default();

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 8080),
                class_seed_file: env::var("CLASS_SEED_FILE").ok().filter(|v| !v.is_empty()),
            },
            scheduler: SchedulerConfig {
                sweep_interval: env_secs("SWEEP_INTERVAL_SECS", scheduler_defaults.sweep_interval),
                idle_grace: env_secs("IDLE_GRACE_SECS", scheduler_defaults.idle_grace),
                host_absent_grace: env_secs(
                    "HOST_ABSENT_GRACE_SECS",
                    scheduler_defaults.host_absent_grace,
                ),
                finalize_retry_interval: env_secs(
                    "FINALIZE_RETRY_SECS",
                    scheduler_defaults.finalize_retry_interval,
                ),
                heartbeat_interval: env_secs(
                    "HEARTBEAT_INTERVAL_SECS",
                    scheduler_defaults.heartbeat_interval,
                ),
            },
            session: SessionConfig {
                pre_join_grace: env_secs("PRE_JOIN_GRACE_SECS", session_defaults.pre_join_grace),
                presence_threshold: env_or(
                    "PRESENCE_THRESHOLD",
                    session_defaults.presence_threshold,
                ),
                chat_log_capacity: env_or("CHAT_LOG_CAPACITY", session_defaults.chat_log_capacity),
                max_participants: env_or("MAX_PARTICIPANTS", session_defaults.max_participants),
                closed_room_retention: env_secs(
                    "CLOSED_ROOM_RETENTION_SECS",
                    session_defaults.closed_room_retention,
                ),
                outbound_queue_capacity: env_or(
                    "OUTBOUND_QUEUE_CAPACITY",
                    session_defaults.outbound_queue_capacity,
                ),
            },
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.session.presence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(SessionError::InvalidConfiguration(format!(
                "PRESENCE_THRESHOLD must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.session.chat_log_capacity == 0 {
            return Err(SessionError::InvalidConfiguration(
                "CHAT_LOG_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.session.max_participants == 0 {
            return Err(SessionError::InvalidConfiguration(
                "MAX_PARTICIPANTS must be at least 1".to_string(),
            ));
        }
        // tokio::sync::mpsc::channel panics on zero
        if self.session.outbound_queue_capacity == 0 {
            return Err(SessionError::InvalidConfiguration(
                "OUTBOUND_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        // Each of these drives a periodic job
        let periods = [
            ("SWEEP_INTERVAL_SECS", self.scheduler.sweep_interval),
            ("FINALIZE_RETRY_SECS", self.scheduler.finalize_retry_interval),
            ("HEARTBEAT_INTERVAL_SECS", self.scheduler.heartbeat_interval),
            ("CLOSED_ROOM_RETENTION_SECS", self.session.closed_room_retention),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(SessionError::InvalidConfiguration(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

fn env_or<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
                class_seed_file: None,
            },
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn test_parse_localhost() {
        let addr = config_with_host("localhost", 8080).bind_address();
        assert_eq!(addr, ([127, 0, 0, 1], 8080));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let addr = config_with_host("192.168.1.1", 3000).bind_address();
        assert_eq!(addr, ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_empty_host() {
        let addr = config_with_host("", 8080).bind_address();
        assert_eq!(addr, ([0, 0, 0, 0], 8080));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let addr = config_with_host("invalid-hostname", 9000).bind_address();
        assert_eq!(addr, ([0, 0, 0, 0], 9000));
    }

    #[test]
    fn test_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.presence_threshold, 0.8);
        assert_eq!(session.chat_log_capacity, 200);
        assert_eq!(SchedulerConfig::default().sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = config_with_host("localhost", 8080);
        assert!(config.validate().is_ok());

        config.session.presence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfiguration(_))
        ));

        config.session.presence_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_job_periods() {
        let mut config = config_with_host("localhost", 8080);
        config.session.closed_room_retention = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfiguration(msg)) if msg.contains("CLOSED_ROOM_RETENTION_SECS")
        ));

        let mut config = config_with_host("localhost", 8080);
        config.scheduler.finalize_retry_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = config_with_host("localhost", 8080);
        config.scheduler.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = config_with_host("localhost", 8080);
        config.scheduler.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = config_with_host("localhost", 8080);
        config.session.chat_log_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = config_with_host("localhost", 8080);
        config.session.outbound_queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfiguration(msg)) if msg.contains("OUTBOUND_QUEUE_CAPACITY")
        ));
    }
}
