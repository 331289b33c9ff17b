//! Engine configuration
//!
//! All settings are optional with defaults matching production behavior; each
//! has a `RATESHOPPER_*` environment override so deployments can tune the
//! engine without a config file.

mod builder;

pub use builder::EngineConfigBuilder;

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the extraction engine.
///
/// Construct via [`EngineConfig::builder`] or [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit Chrome/Chromium binary; when `None` the launcher probes the
    /// usual install locations and falls back to `which`.
    pub(crate) chrome_executable: Option<PathBuf>,
    pub(crate) headless: bool,
    /// SQLite database location for jobs and observations.
    pub(crate) database_path: PathBuf,
    /// Base supervisor polling interval.
    pub(crate) poll_interval: Duration,
    /// Ceiling the polling interval degrades to under sustained failure.
    pub(crate) max_poll_interval: Duration,
    /// Consecutive failed polling cycles before the interval doubles.
    pub(crate) max_consecutive_failures: u32,
    /// Hard outer timeout for each navigation.
    pub(crate) navigation_timeout_secs: u64,
    /// Settle delay after DOM-ready before extraction.
    pub(crate) settle_delay_ms: u64,
    /// Randomized inter-navigation delay bounds (human-like cadence).
    pub(crate) nav_delay_min_ms: u64,
    pub(crate) nav_delay_max_ms: u64,
    /// Bounded retry policy around each navigation.
    pub(crate) retry_max_attempts: u32,
    pub(crate) retry_backoff_min_secs: f64,
    pub(crate) retry_backoff_max_secs: f64,
    /// Directory for the local-file price fallback.
    pub(crate) fallback_dir: PathBuf,
    /// Completion/failure notification endpoint; `None` disables callbacks.
    pub(crate) notify_url: Option<String>,
    /// Grace window for cooperative shutdown before the browser is killed.
    pub(crate) shutdown_grace: Duration,
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Build a config from `RATESHOPPER_*` environment variables, using the
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut b = Self::builder();

        if let Ok(path) = std::env::var("RATESHOPPER_CHROME") {
            b = b.chrome_executable(PathBuf::from(path));
        }
        if let Some(headless) = env_bool("RATESHOPPER_HEADLESS") {
            b = b.headless(headless);
        }
        if let Ok(path) = std::env::var("RATESHOPPER_DATABASE") {
            b = b.database_path(PathBuf::from(path));
        }
        if let Some(secs) = env_u64("RATESHOPPER_POLL_INTERVAL_SECS") {
            b = b.poll_interval(Duration::from_secs(secs));
        }
        if let Some(n) = env_u64("RATESHOPPER_MAX_CONSECUTIVE_FAILURES") {
            b = b.max_consecutive_failures(n as u32);
        }
        if let Some(secs) = env_u64("RATESHOPPER_NAVIGATION_TIMEOUT_SECS") {
            b = b.navigation_timeout_secs(secs);
        }
        if let Some(n) = env_u64("RATESHOPPER_RETRY_MAX_ATTEMPTS") {
            b = b.retry_max_attempts(n as u32);
        }
        if let Ok(dir) = std::env::var("RATESHOPPER_FALLBACK_DIR") {
            b = b.fallback_dir(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("RATESHOPPER_NOTIFY_URL") {
            if !url.is_empty() {
                b = b.notify_url(url);
            }
        }

        b.build()
    }

    #[must_use]
    pub fn chrome_executable(&self) -> Option<&PathBuf> {
        self.chrome_executable.as_ref()
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn database_path(&self) -> &PathBuf {
        &self.database_path
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn max_poll_interval(&self) -> Duration {
        self.max_poll_interval
    }

    #[must_use]
    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    #[must_use]
    pub fn navigation_timeout_secs(&self) -> u64 {
        self.navigation_timeout_secs
    }

    #[must_use]
    pub fn settle_delay_ms(&self) -> u64 {
        self.settle_delay_ms
    }

    #[must_use]
    pub fn nav_delay_bounds_ms(&self) -> (u64, u64) {
        (self.nav_delay_min_ms, self.nav_delay_max_ms)
    }

    #[must_use]
    pub fn retry_max_attempts(&self) -> u32 {
        self.retry_max_attempts
    }

    #[must_use]
    pub fn retry_backoff_secs(&self) -> (f64, f64) {
        (self.retry_backoff_min_secs, self.retry_backoff_max_secs)
    }

    #[must_use]
    pub fn fallback_dir(&self) -> &PathBuf {
        &self.fallback_dir
    }

    #[must_use]
    pub fn notify_url(&self) -> Option<&str> {
        self.notify_url.as_deref()
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
