//! Domain model: search jobs, scraped targets, price observations and the
//! checkpoint payload persisted on pause.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a search job.
///
/// Created `Pending` by the external scheduler; mutated only by the
/// extraction engine while active. `Completed`, `Failed` and `Cancelled` are
/// terminal (retrying a failed job re-enters `Pending` rather than
/// resurrecting the run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SearchStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown search status: {other}")),
        }
    }
}

/// Which platform a target listing lives on. Selects the `PlatformAdapter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformKind {
    Booking,
    Artaxnet,
}

impl PlatformKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Artaxnet => "artaxnet",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "booking" => Ok(Self::Booking),
            "artaxnet" => Ok(Self::Artaxnet),
            other => Err(format!("unknown platform kind: {other}")),
        }
    }
}

/// A competitor listing being priced. Owned by the surrounding catalog
/// system; read-only to the engine for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    /// Base listing URL; the adapter appends date/occupancy parameters.
    pub search_url: String,
    pub platform: PlatformKind,
    /// Longest stay length probed before declaring a date unavailable.
    pub max_bundle_size: u32,
    /// Offers below this occupancy are ignored.
    pub min_capacity: u32,
}

/// A search job aggregate: one date range against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Search {
    pub id: i64,
    pub target_id: i64,
    pub range_start: NaiveDate,
    /// Inclusive end of the requested range.
    pub range_end: NaiveDate,
    pub status: SearchStatus,
    pub total_dates: u32,
    pub processed_dates: u32,
    pub total_prices_found: u32,
    /// Only set while `status == Paused`.
    pub last_processed_date: Option<NaiveDate>,
    pub checkpoint: Option<Checkpoint>,
    pub paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_log: Option<String>,
}

impl Search {
    /// Build a fresh pending job over an inclusive date range.
    #[must_use]
    pub fn new(id: i64, target_id: i64, range_start: NaiveDate, range_end: NaiveDate) -> Self {
        let total_dates = (range_end - range_start).num_days().max(0) as u32 + 1;
        Self {
            id,
            target_id,
            range_start,
            range_end,
            status: SearchStatus::Pending,
            total_dates,
            processed_dates: 0,
            total_prices_found: 0,
            last_processed_date: None,
            checkpoint: None,
            paused_at: None,
            pause_reason: None,
            started_at: None,
            completed_at: None,
            error_log: None,
        }
    }

    /// The first unprocessed date, honoring a checkpoint when present.
    #[must_use]
    pub fn resume_date(&self) -> NaiveDate {
        match self.checkpoint.as_ref() {
            Some(cp) => cp.last_processed_date + chrono::Duration::days(1),
            None => self.range_start,
        }
    }
}

/// Concrete checkpoint payload captured at pause time.
///
/// Resume logic only needs `last_processed_date`; the counters make the
/// persisted blob self-describing and the `version` field leaves room to
/// evolve the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub last_processed_date: NaiveDate,
    pub processed_dates: u32,
    pub prices_found: u32,
}

impl Checkpoint {
    pub const CURRENT_VERSION: u32 = 1;
}

/// One (date, price) fact produced for a target within a search job.
///
/// Exactly one observation exists per `(search_id, date)`: a resolved bundle
/// of N nights emits N observations sharing the same per-night price and
/// `bundle_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub target_id: i64,
    pub search_id: i64,
    pub date: NaiveDate,
    /// Per-night price: `total_price / bundle_size` for bundles.
    pub price: f64,
    pub currency: String,
    pub room_label: String,
    pub is_bundle: bool,
    pub bundle_size: u32,
    /// Smallest stay length for which an offer was found.
    pub minimum_nights_detected: u32,
    /// True when the detected minimum may be incidental sell-out rather than
    /// a stated minimum-stay policy; page data alone cannot distinguish the
    /// two, so the ambiguity is recorded instead of resolved.
    pub availability_inferred: bool,
    pub scraped_at: DateTime<Utc>,
}
