//! Worker configuration

use crate::error::{Result, WorkerError};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Worker configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue API base URL
    pub queue_api_url: String,

    /// Worker authentication token
    pub worker_token: String,

    /// Unique worker identifier
    pub worker_id: String,

    /// Worker class as registered with the queue
    pub worker_type: String,

    /// Timeout for queue API calls
    pub api_timeout: Duration,

    /// Runway API key
    pub runway_api_key: String,

    /// Overall deadline for one generation job
    pub generation_timeout: Duration,

    /// Lease requested when claiming a task
    pub lease_duration: Duration,

    /// Delay between lease extensions while a task is in flight
    pub heartbeat_interval: Duration,

    /// Extension requested by each heartbeat
    pub heartbeat_extend: Duration,

    /// Poll interval with no recent activity
    pub poll_interval_slow: Duration,

    /// Poll interval inside the fast-poll window
    pub poll_interval_fast: Duration,

    /// How long after a processed task polling stays fast
    pub fast_poll_window: Duration,

    /// Model hint used when an item carries none
    pub default_model: String,

    /// Clip duration when an item has no frame count, in seconds
    pub default_duration: f64,

    /// Output aspect ratio
    pub default_ratio: String,

    /// Directory for temp artifacts
    pub temp_dir: PathBuf,

    /// Remove temp artifacts after each task; disable to keep them for
    /// post-mortem inspection
    pub auto_cleanup: bool,

    /// healthchecks.io-style liveness ping URL (pinger disabled when unset)
    pub healthcheck_ping_url: Option<String>,

    /// Interval between liveness pings
    pub liveness_interval: Duration,

    /// Webhook notified when the public IP changes (watcher disabled when
    /// unset)
    pub ip_webhook_url: Option<String>,

    /// Interval between public IP checks
    pub ip_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_api_url: String::new(),
            worker_token: String::new(),
            worker_id: "i2v-worker-001".to_string(),
            worker_type: "runway".to_string(),
            api_timeout: Duration::from_secs(30),
            runway_api_key: String::new(),
            generation_timeout: Duration::from_secs(600), // 10 minutes
            lease_duration: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(120),
            heartbeat_extend: Duration::from_secs(300),
            poll_interval_slow: Duration::from_secs(60),
            poll_interval_fast: Duration::from_secs(5),
            fast_poll_window: Duration::from_secs(1800),
            default_model: "gen4_turbo".to_string(),
            default_duration: 5.0,
            default_ratio: "1280:720".to_string(),
            temp_dir: PathBuf::from("./tmp"),
            auto_cleanup: true,
            healthcheck_ping_url: None,
            liveness_interval: Duration::from_secs(60),
            ip_webhook_url: None,
            ip_check_interval: Duration::from_secs(3600),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Load configuration from the environment, failing fast with a
    /// field-level error for anything missing or unparsable.
    pub fn from_env() -> Result<Self> {
        let queue_api_url = required("QUEUE_API_URL")?;
        Url::parse(&queue_api_url)
            .map_err(|e| WorkerError::Config(format!("QUEUE_API_URL is not a valid URL: {e}")))?;

        let defaults = WorkerConfig::default();
        Ok(Self {
            queue_api_url,
            worker_token: required("WORKER_TOKEN")?,
            worker_id: optional("WORKER_ID").unwrap_or(defaults.worker_id),
            worker_type: optional("WORKER_TYPE").unwrap_or(defaults.worker_type),
            api_timeout: secs_var("API_TIMEOUT_SECS", defaults.api_timeout)?,
            runway_api_key: required("RUNWAY_API_KEY")?,
            generation_timeout: secs_var("RUNWAY_TIMEOUT_SECS", defaults.generation_timeout)?,
            lease_duration: secs_var("LEASE_DURATION_SECS", defaults.lease_duration)?,
            heartbeat_interval: secs_var("HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval)?,
            heartbeat_extend: secs_var("HEARTBEAT_EXTEND_SECS", defaults.heartbeat_extend)?,
            poll_interval_slow: secs_var("POLL_INTERVAL_SLOW_SECS", defaults.poll_interval_slow)?,
            poll_interval_fast: secs_var("POLL_INTERVAL_FAST_SECS", defaults.poll_interval_fast)?,
            fast_poll_window: secs_var("FAST_POLL_WINDOW_SECS", defaults.fast_poll_window)?,
            default_model: optional("RUNWAY_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            default_duration: f64_var("RUNWAY_DEFAULT_DURATION", defaults.default_duration)?,
            default_ratio: optional("RUNWAY_DEFAULT_RATIO").unwrap_or(defaults.default_ratio),
            temp_dir: optional("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            auto_cleanup: bool_var("AUTO_CLEANUP_TEMP", defaults.auto_cleanup)?,
            healthcheck_ping_url: optional("HEALTHCHECK_PING_URL"),
            liveness_interval: secs_var("HEALTHCHECK_INTERVAL_SECS", defaults.liveness_interval)?,
            ip_webhook_url: optional("IP_WEBHOOK_URL"),
            ip_check_interval: secs_var("IP_CHECK_INTERVAL_SECS", defaults.ip_check_interval)?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(WorkerError::Config(format!("{name} is not set"))),
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parse_secs(name, optional(name), default)
}

fn f64_var(name: &str, default: f64) -> Result<f64> {
    parse_f64(name, optional(name), default)
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    parse_bool(name, optional(name), default)
}

fn parse_secs(name: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| WorkerError::Config(format!("{name} must be a whole number of seconds"))),
        None => Ok(default),
    }
}

fn parse_f64(name: &str, value: Option<String>, default: f64) -> Result<f64> {
    match value {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| WorkerError::Config(format!("{name} must be a number"))),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(_) => Err(WorkerError::Config(format!("{name} must be true or false"))),
        None => Ok(default),
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn queue_api_url(mut self, url: &str) -> Self {
        self.config.queue_api_url = url.to_string();
        self
    }

    pub fn worker_id(mut self, id: &str) -> Self {
        self.config.worker_id = id.to_string();
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn poll_intervals(mut self, slow: Duration, fast: Duration) -> Self {
        self.config.poll_interval_slow = slow;
        self.config.poll_interval_fast = fast;
        self
    }

    pub fn fast_poll_window(mut self, window: Duration) -> Self {
        self.config.fast_poll_window = window;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    pub fn default_duration(mut self, secs: f64) -> Self {
        self.config.default_duration = secs;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn auto_cleanup(mut self, enabled: bool) -> Self {
        self.config.auto_cleanup = enabled;
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = WorkerConfig::builder()
            .worker_id("test-worker")
            .poll_intervals(Duration::from_secs(30), Duration::from_secs(2))
            .auto_cleanup(false)
            .build();

        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.poll_interval_slow, Duration::from_secs(30));
        assert_eq!(config.poll_interval_fast, Duration::from_secs(2));
        assert!(!config.auto_cleanup);
        // Untouched fields keep their defaults.
        assert_eq!(config.heartbeat_interval, Duration::from_secs(120));
        assert_eq!(config.default_ratio, "1280:720");
    }

    #[test]
    fn parse_secs_rejects_garbage() {
        let err = parse_secs("LEASE_DURATION_SECS", Some("soon".into()), Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("LEASE_DURATION_SECS"));

        let ok = parse_secs("LEASE_DURATION_SECS", Some("90".into()), Duration::ZERO).unwrap();
        assert_eq!(ok, Duration::from_secs(90));

        let fallback = parse_secs("LEASE_DURATION_SECS", None, Duration::from_secs(7)).unwrap();
        assert_eq!(fallback, Duration::from_secs(7));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("AUTO_CLEANUP_TEMP", Some("yes".into()), false).unwrap());
        assert!(!parse_bool("AUTO_CLEANUP_TEMP", Some("0".into()), true).unwrap());
        assert!(parse_bool("AUTO_CLEANUP_TEMP", None, true).unwrap());
        assert!(parse_bool("AUTO_CLEANUP_TEMP", Some("maybe".into()), true).is_err());
    }
}
