/// Service configuration
///
/// Every knob has a default suitable for local development; deployments
/// override via environment variables or the builder methods.
use std::path::PathBuf;
use std::time::Duration;

/// Tunable parameters for the hub, read once at startup.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address for viewer WebSocket connections
    pub bind_addr: String,
    /// Upstream streaming endpoint
    pub upstream_url: String,
    /// Upstream REST endpoint for minute-bar history
    pub history_url: String,
    /// File holding the upstream access token, re-read per connection attempt
    pub credentials_path: PathBuf,
    /// Maximum distinct symbols tracked at once
    pub max_symbols: usize,
    /// Per-symbol tick buffer bound
    pub tick_capacity: usize,
    /// Per-symbol bar buffer bound
    pub bar_capacity: usize,
    /// Age past which cached ticks/bars are swept
    pub retention: Duration,
    /// Interval between retention sweeps
    pub sweep_interval: Duration,
    /// Backfill calls allowed per rolling second
    pub max_calls_per_second: usize,
    /// Single grace wait when the rate budget is exhausted
    pub rate_wait: Duration,
    /// Suppression window after a failed backfill
    pub failure_cooldown: Duration,
    /// Minimum gap between chart updates per symbol
    pub chart_throttle: Duration,
    /// Interval between heartbeat broadcasts
    pub heartbeat_interval: Duration,
    /// Delay before re-dialing the upstream after a drop
    pub reconnect_delay: Duration,
    /// Interval between credential file checks
    pub credential_poll: Duration,
    /// Session open, "HH:MM" in the market timezone
    pub session_open: String,
    /// Session close, "HH:MM" in the market timezone
    pub session_close: String,
    /// Market timezone as a fixed offset from UTC, in minutes
    pub utc_offset_minutes: i32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            upstream_url: "ws://127.0.0.1:9500/stream".to_string(),
            history_url: "http://127.0.0.1:9500/api/history".to_string(),
            credentials_path: PathBuf::from("access_token.txt"),
            max_symbols: 50,
            tick_capacity: 10_000,
            bar_capacity: 1_000,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            max_calls_per_second: 2,
            rate_wait: Duration::from_millis(500),
            failure_cooldown: Duration::from_secs(300),
            chart_throttle: Duration::from_millis(200),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            credential_poll: Duration::from_secs(5),
            session_open: "09:15".to_string(),
            session_close: "15:30".to_string(),
            utc_offset_minutes: 330,
        }
    }
}

impl HubConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("TICKHUB_WS_ADDR").unwrap_or_else(|_| defaults.bind_addr.clone()),
            upstream_url: std::env::var("TICKHUB_UPSTREAM_URL")
                .unwrap_or_else(|_| defaults.upstream_url.clone()),
            history_url: std::env::var("TICKHUB_HISTORY_URL")
                .unwrap_or_else(|_| defaults.history_url.clone()),
            credentials_path: std::env::var("TICKHUB_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| defaults.credentials_path.clone()),
            max_symbols: std::env::var("TICKHUB_MAX_SYMBOLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_symbols),
            tick_capacity: std::env::var("TICKHUB_TICK_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.tick_capacity),
            bar_capacity: std::env::var("TICKHUB_BAR_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bar_capacity),
            retention: std::env::var("TICKHUB_RETENTION_HOURS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .unwrap_or(defaults.retention),
            max_calls_per_second: std::env::var("TICKHUB_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_calls_per_second),
            failure_cooldown: std::env::var("TICKHUB_COOLDOWN_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.failure_cooldown),
            ..defaults
        }
    }

    /// Set the tracked-symbol cap
    pub fn with_max_symbols(mut self, max: usize) -> Self {
        self.max_symbols = max;
        self
    }

    /// Set per-symbol buffer bounds
    pub fn with_capacities(mut self, ticks: usize, bars: usize) -> Self {
        self.tick_capacity = ticks;
        self.bar_capacity = bars;
        self
    }

    /// Set the retention window
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the backfill rate budget
    pub fn with_rate_limit(mut self, calls_per_second: usize) -> Self {
        self.max_calls_per_second = calls_per_second;
        self
    }

    /// Set the failure cooldown window
    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = cooldown;
        self
    }

    /// Set the chart update throttle
    pub fn with_chart_throttle(mut self, throttle: Duration) -> Self {
        self.chart_throttle = throttle;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the upstream reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}
