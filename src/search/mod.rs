//! Search-job state machine.
//!
//! `CheckpointedSearch` owns the lifecycle of one search row: every
//! transition validates the current status, mutates the aggregate, and
//! persists the full row before returning. Illegal transitions are rejected
//! with the reason the control API surfaces verbatim.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::error::{ControlError, TransitionError};
use crate::model::{Checkpoint, Search, SearchStatus};
use crate::store::SearchStore;

pub mod runner;

pub struct CheckpointedSearch {
    search: Search,
    store: Arc<dyn SearchStore>,
}

impl CheckpointedSearch {
    #[must_use]
    pub fn new(search: Search, store: Arc<dyn SearchStore>) -> Self {
        Self { search, store }
    }

    /// Load an existing row from storage.
    pub async fn load(id: i64, store: Arc<dyn SearchStore>) -> Result<Self, ControlError> {
        let search = store
            .get_search(id)
            .await
            .map_err(|e| ControlError::Storage(e.to_string()))?
            .ok_or(ControlError::NotFound(id))?;
        Ok(Self { search, store })
    }

    #[must_use]
    pub fn search(&self) -> &Search {
        &self.search
    }

    /// PENDING -> RUNNING.
    pub async fn start(&mut self) -> Result<(), ControlError> {
        if self.search.status != SearchStatus::Pending {
            return Err(TransitionError::NotPending(self.search.status.to_string()).into());
        }
        self.search.status = SearchStatus::Running;
        self.search.started_at = Some(Utc::now());
        self.persist().await?;
        info!(search = self.search.id, "search started");
        Ok(())
    }

    /// PAUSED -> RUNNING. The checkpoint survives so the runner picks up at
    /// `resume_date()`; `started_at` is reset to the resume instant.
    /// `last_processed_date` only annotates PAUSED rows, so it is cleared
    /// along with the other pause fields.
    pub async fn resume(&mut self) -> Result<(), ControlError> {
        if self.search.status != SearchStatus::Paused {
            return Err(TransitionError::ResumeNotPaused(self.search.status.to_string()).into());
        }
        self.search.status = SearchStatus::Running;
        self.search.started_at = Some(Utc::now());
        self.search.paused_at = None;
        self.search.pause_reason = None;
        self.search.last_processed_date = None;
        self.persist().await?;
        info!(
            search = self.search.id,
            resume_date = %self.search.resume_date(),
            "search resumed"
        );
        Ok(())
    }

    /// Persist progress counters mid-run.
    ///
    /// Counters only move forward; a stale update (smaller counts than what
    /// the row already carries) is applied as a no-op on the in-memory side
    /// but still rejected if the row vanished from storage.
    pub async fn update_progress(
        &mut self,
        processed_dates: u32,
        prices_found: u32,
    ) -> Result<(), ControlError> {
        if self.search.status != SearchStatus::Running {
            return Err(TransitionError::ProgressNotRunning(self.search.status.to_string()).into());
        }
        self.search.processed_dates = self
            .search
            .processed_dates
            .max(processed_dates)
            .min(self.search.total_dates);
        self.search.total_prices_found = self.search.total_prices_found.max(prices_found);
        self.persist().await
    }

    /// RUNNING -> PAUSED, capturing a checkpoint from the current counters.
    pub async fn pause(&mut self, reason: &str) -> Result<(), ControlError> {
        if self.search.status != SearchStatus::Running {
            return Err(TransitionError::PauseNotRunning(self.search.status.to_string()).into());
        }

        let last_processed_date = if self.search.processed_dates > 0 {
            Some(
                self.search.range_start
                    + Duration::days(i64::from(self.search.processed_dates) - 1),
            )
        } else {
            None
        };

        self.search.status = SearchStatus::Paused;
        self.search.last_processed_date = last_processed_date;
        self.search.checkpoint = last_processed_date.map(|date| Checkpoint {
            version: Checkpoint::CURRENT_VERSION,
            last_processed_date: date,
            processed_dates: self.search.processed_dates,
            prices_found: self.search.total_prices_found,
        });
        self.search.paused_at = Some(Utc::now());
        self.search.pause_reason = Some(reason.to_string());
        self.persist().await?;
        info!(
            search = self.search.id,
            processed = self.search.processed_dates,
            reason = reason,
            "search paused"
        );
        Ok(())
    }

    /// Any non-finished status -> CANCELLED.
    pub async fn cancel(&mut self, reason: &str) -> Result<(), ControlError> {
        if matches!(
            self.search.status,
            SearchStatus::Completed | SearchStatus::Failed | SearchStatus::Cancelled
        ) {
            return Err(TransitionError::CancelFinished(self.search.status.to_string()).into());
        }
        self.search.status = SearchStatus::Cancelled;
        self.search.completed_at = Some(Utc::now());
        self.search.error_log = Some(reason.to_string());
        self.search.checkpoint = None;
        self.search.last_processed_date = None;
        self.persist().await?;
        warn!(search = self.search.id, reason = reason, "search cancelled");
        Ok(())
    }

    /// FAILED -> PENDING: a clean re-run, not a resurrection of the old one.
    pub async fn retry(&mut self) -> Result<(), ControlError> {
        if self.search.status != SearchStatus::Failed {
            return Err(TransitionError::RetryNotFailed(self.search.status.to_string()).into());
        }
        self.search.status = SearchStatus::Pending;
        self.search.processed_dates = 0;
        self.search.total_prices_found = 0;
        self.search.last_processed_date = None;
        self.search.checkpoint = None;
        self.search.paused_at = None;
        self.search.pause_reason = None;
        self.search.started_at = None;
        self.search.completed_at = None;
        self.search.error_log = None;
        self.persist().await?;
        info!(search = self.search.id, "failed search reset to pending");
        Ok(())
    }

    /// RUNNING -> FAILED with the terminal error recorded.
    pub async fn fail(&mut self, error: &str) -> Result<(), ControlError> {
        self.search.status = SearchStatus::Failed;
        self.search.completed_at = Some(Utc::now());
        self.search.error_log = Some(error.to_string());
        self.persist().await?;
        warn!(search = self.search.id, error = error, "search failed");
        Ok(())
    }

    /// RUNNING -> COMPLETED.
    pub async fn complete(&mut self) -> Result<(), ControlError> {
        self.search.status = SearchStatus::Completed;
        self.search.processed_dates = self.search.total_dates;
        self.search.completed_at = Some(Utc::now());
        self.search.checkpoint = None;
        self.search.last_processed_date = None;
        self.persist().await?;
        info!(
            search = self.search.id,
            prices = self.search.total_prices_found,
            "search completed"
        );
        Ok(())
    }

    async fn persist(&self) -> Result<(), ControlError> {
        let affected = self
            .store
            .update_search(&self.search)
            .await
            .map_err(|e| ControlError::Storage(e.to_string()))?;
        if affected == 0 {
            return Err(TransitionError::RowVanished(self.search.id).into());
        }
        Ok(())
    }
}
