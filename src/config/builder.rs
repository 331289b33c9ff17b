//! Fluent builder for [`EngineConfig`] with production defaults.

use std::path::PathBuf;
use std::time::Duration;

use super::EngineConfig;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(16 * 60);
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 35;
const DEFAULT_SETTLE_DELAY_MS: u64 = 1_500;
const DEFAULT_NAV_DELAY_MIN_MS: u64 = 2_500;
const DEFAULT_NAV_DELAY_MAX_MS: u64 = 6_000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MIN_SECS: f64 = 5.0;
const DEFAULT_RETRY_BACKOFF_MAX_SECS: f64 = 10.0;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct EngineConfigBuilder {
    chrome_executable: Option<PathBuf>,
    headless: bool,
    database_path: Option<PathBuf>,
    poll_interval: Duration,
    max_poll_interval: Duration,
    max_consecutive_failures: u32,
    navigation_timeout_secs: u64,
    settle_delay_ms: u64,
    nav_delay_min_ms: u64,
    nav_delay_max_ms: u64,
    retry_max_attempts: u32,
    retry_backoff_min_secs: f64,
    retry_backoff_max_secs: f64,
    fallback_dir: Option<PathBuf>,
    notify_url: Option<String>,
    shutdown_grace: Duration,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            database_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            navigation_timeout_secs: DEFAULT_NAVIGATION_TIMEOUT_SECS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            nav_delay_min_ms: DEFAULT_NAV_DELAY_MIN_MS,
            nav_delay_max_ms: DEFAULT_NAV_DELAY_MAX_MS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff_min_secs: DEFAULT_RETRY_BACKOFF_MIN_SECS,
            retry_backoff_max_secs: DEFAULT_RETRY_BACKOFF_MAX_SECS,
            fallback_dir: None,
            notify_url: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn chrome_executable(mut self, path: PathBuf) -> Self {
        self.chrome_executable = Some(path);
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.database_path = Some(path);
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n.max(1);
        self
    }

    #[must_use]
    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.navigation_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn nav_delay_bounds_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.nav_delay_min_ms = min_ms;
        self.nav_delay_max_ms = max_ms.max(min_ms + 1);
        self
    }

    #[must_use]
    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn retry_backoff_secs(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.retry_backoff_min_secs = min_secs;
        self.retry_backoff_max_secs = max_secs.max(min_secs);
        self
    }

    #[must_use]
    pub fn fallback_dir(mut self, dir: PathBuf) -> Self {
        self.fallback_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn notify_url(mut self, url: String) -> Self {
        self.notify_url = Some(url);
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn build(self) -> EngineConfig {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("rateshopper");

        EngineConfig {
            chrome_executable: self.chrome_executable,
            headless: self.headless,
            database_path: self
                .database_path
                .unwrap_or_else(|| data_dir.join("rateshopper.sqlite")),
            poll_interval: self.poll_interval,
            max_poll_interval: self.max_poll_interval.max(self.poll_interval),
            max_consecutive_failures: self.max_consecutive_failures,
            navigation_timeout_secs: self.navigation_timeout_secs,
            settle_delay_ms: self.settle_delay_ms,
            nav_delay_min_ms: self.nav_delay_min_ms,
            nav_delay_max_ms: self.nav_delay_max_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_backoff_min_secs: self.retry_backoff_min_secs,
            retry_backoff_max_secs: self.retry_backoff_max_secs,
            fallback_dir: self.fallback_dir.unwrap_or_else(|| data_dir.join("fallback")),
            notify_url: self.notify_url,
            shutdown_grace: self.shutdown_grace,
        }
    }
}
