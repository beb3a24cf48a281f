use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const MIN_EVENT_QUEUE_SIZE: usize = 1 << 12;
const MIN_SEGMENT_QUEUE_SIZE: usize = 1 << 6;
const MIN_SEGMENT_SIZE: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max-flows must be positive")]
    MaxFlowsZero,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Interface name, trace file path, or "-" for stdin.
    pub input: String,
    /// Max bytes recorded per flow direction before packets are dropped.
    pub cutoff: u64,
    /// Flow table size triggering random eviction.
    pub max_flows: usize,
    /// Flow inactivity timeout, in capture time.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Inactivity sweep period, in capture time.
    #[serde(with = "humantime_serde")]
    pub expire_interval: Duration,
    /// Replay pace divisor; zero or negative disables pacing.
    pub pseudo_realtime: i64,
    pub max_events_per_chunk: usize,
    pub max_segment_size: usize,
    pub event_queue_size: usize,
    pub segment_queue_size: usize,
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
    /// Empty means logging to stderr.
    pub log_file: String,
    #[serde(with = "LevelDef")]
    pub log_level: log::Level,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input: "".into(),
            cutoff: u64::MAX,
            max_flows: 1 << 20,
            max_age: Duration::from_secs(300),
            expire_interval: Duration::from_secs(10),
            pseudo_realtime: 0,
            max_events_per_chunk: 8192,
            max_segment_size: 128 << 20,
            event_queue_size: 1 << 16,
            segment_queue_size: 1 << 8,
            stats_interval: Duration::from_secs(10),
            log_file: "".into(),
            log_level: log::Level::Info,
        }
    }
}

impl Config {
    pub fn load_from_file<T: AsRef<Path>>(path: T) -> Result<Config, io::Error> {
        let contents = fs::read_to_string(path)?;
        let mut c: Config = serde_yaml::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        c.adjust();
        if let Err(e) = c.validate() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()));
        }
        Ok(c)
    }

    // Clamps out-of-range values instead of failing on them.
    fn adjust(&mut self) {
        if self.event_queue_size < MIN_EVENT_QUEUE_SIZE {
            self.event_queue_size = MIN_EVENT_QUEUE_SIZE;
        }
        if self.segment_queue_size < MIN_SEGMENT_QUEUE_SIZE {
            self.segment_queue_size = MIN_SEGMENT_QUEUE_SIZE;
        }
        if self.max_segment_size < MIN_SEGMENT_SIZE {
            self.max_segment_size = MIN_SEGMENT_SIZE;
        }
        if self.max_events_per_chunk == 0 {
            self.max_events_per_chunk = 1;
        }
        if self.expire_interval < Duration::from_secs(1) {
            self.expire_interval = Duration::from_secs(1);
        }
        if self.max_age < Duration::from_secs(1) {
            self.max_age = Duration::from_secs(1);
        }
        if self.pseudo_realtime < 0 {
            self.pseudo_realtime = 0;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flows == 0 {
            return Err(ConfigError::MaxFlowsZero);
        }
        if self.cutoff == 0 {
            return Err(ConfigError::Invalid("cutoff must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(remote = "log::Level", rename_all = "kebab-case")]
enum LevelDef {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_yaml_file() {
        let c = Config::load_from_file("config/flowcap.yaml").expect("failed loading config file");
        assert_eq!(c.input, "-");
        assert_eq!(c.max_age, Duration::from_secs(300));
        assert_eq!(c.pseudo_realtime, 0);
        assert_eq!(c.log_level, log::Level::Info);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let c: Config = serde_yaml::from_str("input: eth0").unwrap();
        assert_eq!(c.input, "eth0");
        assert_eq!(c.cutoff, u64::MAX);
        assert_eq!(c.max_flows, 1 << 20);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut c: Config = serde_yaml::from_str(
            "event-queue-size: 1\nmax-segment-size: 5\nexpire-interval: 1ms\npseudo-realtime: -4",
        )
        .unwrap();
        c.adjust();
        assert_eq!(c.event_queue_size, MIN_EVENT_QUEUE_SIZE);
        assert_eq!(c.max_segment_size, MIN_SEGMENT_SIZE);
        assert_eq!(c.expire_interval, Duration::from_secs(1));
        assert_eq!(c.pseudo_realtime, 0);
    }

    #[test]
    fn zero_max_flows_is_rejected() {
        let c: Config = serde_yaml::from_str("max-flows: 0").unwrap();
        assert!(c.validate().is_err());
    }
}
