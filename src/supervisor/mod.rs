//! Job supervision: the poll loop, the active-job registry, and operator
//! controls.
//!
//! At most one extraction runs per target at any time. The registry maps
//! `target_id` to the live job's control channel and task handle; a second
//! search against a busy target stays pending until the first finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::browser::{BrowserSession, LiveOfferSource};
use crate::config::EngineConfig;
use crate::error::ControlError;
use crate::model::{SearchStatus, Target};
use crate::platform::adapter_for;
use crate::probe::OfferSource;
use crate::retry::RetryController;
use crate::search::runner::{Control, JobRunner};
use crate::search::CheckpointedSearch;
use crate::sink::ResultSink;
use crate::store::{PriceStore, SearchStore};

/// Creates the offer source a job runs against.
///
/// Production launches a browser per job; tests substitute scripted sources.
#[async_trait]
pub trait OfferSourceFactory: Send + Sync {
    async fn create_source(&self, target: &Target) -> anyhow::Result<Arc<dyn OfferSource>>;
}

/// Launches one Chrome process per job and binds it to the target's
/// platform adapter.
pub struct BrowserSourceFactory {
    config: Arc<EngineConfig>,
}

impl BrowserSourceFactory {
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl OfferSourceFactory for BrowserSourceFactory {
    async fn create_source(&self, target: &Target) -> anyhow::Result<Arc<dyn OfferSource>> {
        let session = BrowserSession::launch(&self.config).await?;
        let adapter = adapter_for(target.platform);
        Ok(Arc::new(LiveOfferSource::new(session, adapter, target)))
    }
}

struct ActiveJob {
    search_id: i64,
    control: watch::Sender<Control>,
    handle: JoinHandle<()>,
}

pub struct ExtractionSupervisor {
    config: Arc<EngineConfig>,
    searches: Arc<dyn SearchStore>,
    factory: Arc<dyn OfferSourceFactory>,
    sink: Arc<ResultSink>,
    registry: Arc<DashMap<i64, ActiveJob>>,
}

impl ExtractionSupervisor {
    pub fn new(
        config: Arc<EngineConfig>,
        searches: Arc<dyn SearchStore>,
        prices: Arc<dyn PriceStore>,
        factory: Arc<dyn OfferSourceFactory>,
    ) -> Self {
        let sink = Arc::new(ResultSink::new(
            prices,
            config.fallback_dir().to_path_buf(),
            config.notify_url().map(str::to_string),
        ));
        Self {
            config,
            searches,
            factory,
            sink,
            registry: Arc::new(DashMap::new()),
        }
    }

    /// Poll for pending work until `shutdown` flips, then stop everything.
    ///
    /// The poll interval doubles after a run of consecutive failing cycles
    /// and snaps back to the base interval on the first healthy one, so a
    /// broken store or dead Chrome install does not produce a tight error
    /// loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let base = self.config.poll_interval();
        let max = self.config.max_poll_interval();
        let threshold = self.config.max_consecutive_failures();
        let mut interval = base;
        let mut consecutive_failures: u32 = 0;

        info!(poll_secs = interval.as_secs(), "supervisor started");
        loop {
            match self.poll_cycle().await {
                Ok(spawned) => {
                    if spawned > 0 {
                        info!(spawned, "poll cycle dispatched jobs");
                    }
                    consecutive_failures = 0;
                    interval = base;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        consecutive_failures,
                        "poll cycle failed: {e}"
                    );
                    if consecutive_failures >= threshold {
                        interval = throttled_interval(interval, max);
                        consecutive_failures = 0;
                        warn!(
                            poll_secs = interval.as_secs(),
                            "throttling poll loop after repeated failures"
                        );
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping supervisor");
                    break;
                }
            }
        }

        self.emergency_stop().await;
    }

    /// One pass: sweep orphaned rows, then dispatch every pending search
    /// whose target is idle.
    pub async fn poll_cycle(&self) -> anyhow::Result<usize> {
        self.sweep_stale_jobs().await?;

        let pending = self.searches.searches_with_status(SearchStatus::Pending).await?;
        let mut spawned = 0;
        for search in pending {
            match self.spawn_search(search.id).await {
                Ok(()) => spawned += 1,
                Err(ControlError::TargetBusy { target_id, .. }) => {
                    info!(
                        search = search.id,
                        target = target_id,
                        "target busy, search stays pending"
                    );
                }
                Err(e) => {
                    warn!(search = search.id, "failed to dispatch search: {e}");
                }
            }
        }
        Ok(spawned)
    }

    /// Dispatch one pending or paused search onto its own task.
    pub async fn spawn_search(&self, search_id: i64) -> Result<(), ControlError> {
        let job = CheckpointedSearch::load(search_id, self.searches.clone()).await?;
        let status = job.search().status;
        if !matches!(status, SearchStatus::Pending | SearchStatus::Paused) {
            return Err(ControlError::NotDispatchable {
                id: search_id,
                status: status.to_string(),
            });
        }

        let target_id = job.search().target_id;
        let target = self
            .searches
            .get_target(target_id)
            .await
            .map_err(|e| ControlError::Storage(e.to_string()))?
            .ok_or(ControlError::Storage(format!(
                "target {target_id} not found for search {search_id}"
            )))?;

        if let Some(active) = self.registry.get(&target_id) {
            return Err(ControlError::TargetBusy {
                target_id,
                active_search_id: active.search_id,
            });
        }

        let source = self
            .factory
            .create_source(&target)
            .await
            .map_err(|e| ControlError::Storage(format!("failed to create offer source: {e}")))?;

        let (control_tx, control_rx) = watch::channel(Control::Run);
        let retry = {
            let (min, max) = self.config.retry_backoff_secs();
            RetryController::new(self.config.retry_max_attempts(), min, max)
        };
        let runner = JobRunner::new(
            job,
            target.clone(),
            source,
            self.sink.clone(),
            retry,
            control_rx,
        );

        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            match runner.run().await {
                Ok(final_status) => {
                    info!(search = search_id, status = %final_status, "job finished");
                }
                Err(e) => {
                    error!(search = search_id, "job aborted: {e}");
                }
            }
            registry.remove_if(&target_id, |_, job| job.search_id == search_id);
        });

        self.registry.insert(
            target_id,
            ActiveJob {
                search_id,
                control: control_tx,
                handle,
            },
        );
        info!(search = search_id, target = target_id, "job dispatched");
        Ok(())
    }

    /// Signal a running job to pause after the date in flight.
    pub fn pause_search(&self, search_id: i64) -> Result<(), ControlError> {
        self.signal(search_id, Control::Pause)
    }

    /// Cancel a search: a live job gets the signal, an inactive pending or
    /// paused row is transitioned directly.
    pub async fn cancel_search(&self, search_id: i64) -> Result<(), ControlError> {
        if self.signal(search_id, Control::Cancel).is_ok() {
            return Ok(());
        }
        let mut job = CheckpointedSearch::load(search_id, self.searches.clone()).await?;
        job.cancel("operator request").await
    }

    /// Re-dispatch a paused search.
    pub async fn resume_search(&self, search_id: i64) -> Result<(), ControlError> {
        let job = CheckpointedSearch::load(search_id, self.searches.clone()).await?;
        if job.search().status != SearchStatus::Paused {
            return Err(crate::error::TransitionError::ResumeNotPaused(
                job.search().status.to_string(),
            )
            .into());
        }
        self.spawn_search(search_id).await
    }

    /// Reset a failed search to pending; the next poll cycle picks it up.
    pub async fn retry_search(&self, search_id: i64) -> Result<(), ControlError> {
        let mut job = CheckpointedSearch::load(search_id, self.searches.clone()).await?;
        job.retry().await
    }

    fn signal(&self, search_id: i64, signal: Control) -> Result<(), ControlError> {
        let entry = self
            .registry
            .iter()
            .find(|entry| entry.search_id == search_id)
            .ok_or(ControlError::NotActive(search_id))?;
        entry
            .control
            .send(signal)
            .map_err(|_| ControlError::NotActive(search_id))
    }

    /// Number of live jobs.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.registry.len()
    }

    /// Mark RUNNING rows with no live job as cancelled.
    ///
    /// These are leftovers from a crash or hard kill; their checkpoints were
    /// never written, so they cannot be resumed safely.
    async fn sweep_stale_jobs(&self) -> anyhow::Result<()> {
        let running = self.searches.searches_with_status(SearchStatus::Running).await?;
        for search in running {
            let live = self
                .registry
                .get(&search.target_id)
                .map(|job| job.search_id == search.id)
                .unwrap_or(false);
            if !live {
                warn!(search = search.id, "sweeping stale running row");
                let mut job = CheckpointedSearch::new(search, self.searches.clone());
                if let Err(e) = job.cancel("stale job swept at startup").await {
                    warn!("failed to sweep stale job: {e}");
                }
            }
        }
        Ok(())
    }

    /// Cancel every live job, give them a grace window to checkpoint, then
    /// abort whatever is left.
    pub async fn emergency_stop(&self) {
        let active: Vec<i64> = self.registry.iter().map(|e| *e.key()).collect();
        if active.is_empty() {
            return;
        }
        info!(jobs = active.len(), "emergency stop: signalling all jobs");

        for entry in self.registry.iter() {
            let _ = entry.control.send(Control::Cancel);
        }

        let grace = self.config.shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace;
        while !self.registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for target_id in active {
            if let Some((_, job)) = self.registry.remove(&target_id) {
                warn!(
                    search = job.search_id,
                    "job did not stop within grace window, aborting"
                );
                job.handle.abort();
                match CheckpointedSearch::load(job.search_id, self.searches.clone()).await {
                    Ok(mut cs) if !cs.search().status.is_terminal() => {
                        if let Err(e) = cs.cancel("aborted during shutdown").await {
                            warn!("failed to mark aborted job: {e}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("failed to load job during shutdown: {e}"),
                }
            }
        }
        info!("emergency stop complete");
    }
}

/// Double the interval, capped at `max`.
fn throttled_interval(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
