use crate::core::{CanvasError, Result};
use std::env;
use std::time::Duration;

/// Session configuration
///
/// Defaults match the admin UI: a 10 second quiet period before auto-save
/// and a countdown that ticks once per second.
#[derive(Debug, Clone)]
pub struct CanvasConfig {
    /// Base URL of the remote collaborator, without a trailing slash
    pub base_url: String,

    /// Per-request timeout for the HTTP client
    pub request_timeout: Duration,

    /// Quiet period after the last edit before the auto-save flush fires
    pub auto_save_delay: Duration,

    /// Countdown tick interval (display only)
    pub countdown_tick: Duration,

    /// Buffered notifications per subscriber before old ones are dropped
    pub notification_capacity: usize,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout: Duration::from_secs(30),
            auto_save_delay: Duration::from_secs(10),
            countdown_tick: Duration::from_secs(1),
            notification_capacity: 64,
        }
    }
}

impl CanvasConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a base URL, rejecting anything that is not http(s)
    pub fn from_url(url: &str) -> Result<Self> {
        Self::new().base_url(url)
    }

    /// Build from `CANVAS_API_URL`, `CANVAS_REQUEST_TIMEOUT_SECS` and
    /// `CANVAS_AUTO_SAVE_SECS`, falling back to defaults for unset variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(url) = env::var("CANVAS_API_URL") {
            config = config.base_url(&url)?;
        }

        if let Ok(raw) = env::var("CANVAS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_secs(
                "CANVAS_REQUEST_TIMEOUT_SECS",
                &raw,
            )?);
        }

        if let Ok(raw) = env::var("CANVAS_AUTO_SAVE_SECS") {
            let secs = parse_secs("CANVAS_AUTO_SAVE_SECS", &raw)?;
            if secs == 0 {
                return Err(CanvasError::Config(
                    "CANVAS_AUTO_SAVE_SECS must be at least 1".to_string(),
                ));
            }
            config.auto_save_delay = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Set the base URL
    pub fn base_url(mut self, url: &str) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(CanvasError::Config(format!(
                "base URL must start with http:// or https://, got '{url}'"
            )));
        }
        self.base_url = trimmed.to_string();
        Ok(self)
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the auto-save quiet period
    pub fn auto_save_delay(mut self, delay: Duration) -> Self {
        self.auto_save_delay = delay;
        self
    }

    /// Set the countdown tick
    pub fn countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = tick;
        self
    }

    /// Set the notification buffer size
    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }

    /// Number of countdown ticks in one quiet period, as shown to the user
    pub fn countdown_start(&self) -> u32 {
        let tick = self.countdown_tick.as_millis().max(1);
        let ticks = self.auto_save_delay.as_millis().div_ceil(tick);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| CanvasError::Config(format!("{name} must be a whole number of seconds")))
}
