//! Error taxonomy for the extraction engine
//!
//! Failures are split into retryable conditions (transient navigation
//! problems, blocked pages, missing embedded data) and fatal ones
//! (cancellation, browser death, persistence loss). The retry layer and the
//! job runner both branch on `is_retryable`.

use thiserror::Error;

/// Errors produced while extracting prices from a target listing.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Navigation did not complete within the configured timeout.
    #[error("navigation timeout after {timeout_secs}s: {url}")]
    NavigationTimeout { url: String, timeout_secs: u64 },

    /// Navigation failed outright (DNS, connection reset, CDP error).
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The page rendered an anti-bot or error interstitial instead of results.
    #[error("blocked or error page detected: {0}")]
    BlockedPage(String),

    /// The page loaded but the expected embedded data / DOM structure was absent.
    #[error("expected page data missing: {0}")]
    MissingData(String),

    /// An operator requested cancellation; shut down cooperatively.
    #[error("extraction cancelled")]
    Cancelled,

    /// The browser process died or reached an irrecoverable state.
    #[error("browser session fatal: {0}")]
    SessionFatal(String),

    /// Both the primary store and the local fallback failed.
    #[error("persistence unavailable: {0}")]
    Persistence(String),
}

impl ExtractError {
    /// Whether the retry layer should attempt this operation again.
    ///
    /// Cancellation, browser death and persistence loss are never retried
    /// locally; they escalate to the job level.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout { .. }
                | Self::Navigation(_)
                | Self::BlockedPage(_)
                | Self::MissingData(_)
        )
    }
}

/// Rejected state-machine transitions on a search job.
///
/// The message is the operator-facing reason ("cannot pause a non-running
/// job"), surfaced unchanged through the control API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot start a job in status {0}, expected PENDING")]
    NotPending(String),

    #[error("cannot pause a non-running job (status: {0})")]
    PauseNotRunning(String),

    #[error("cannot resume a job that is not paused (status: {0})")]
    ResumeNotPaused(String),

    #[error("cannot cancel a job that already finished (status: {0})")]
    CancelFinished(String),

    #[error("cannot retry a job that has not failed (status: {0})")]
    RetryNotFailed(String),

    #[error("progress updates are only valid while running (status: {0})")]
    ProgressNotRunning(String),

    #[error("job row disappeared from storage during update (id: {0})")]
    RowVanished(i64),
}

/// Errors returned by the supervisor control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("search {0} not found")]
    NotFound(i64),

    #[error("search {0} has no active extraction session")]
    NotActive(i64),

    #[error("target {target_id} already has an active extraction (search {active_search_id})")]
    TargetBusy { target_id: i64, active_search_id: i64 },

    #[error("search {id} is {status}, not dispatchable")]
    NotDispatchable { id: i64, status: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage error: {0}")]
    Storage(String),
}
