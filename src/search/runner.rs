//! The per-job extraction loop.
//!
//! One runner walks one search's date range in order, probing each date
//! through the bundle prober, recording observations through the sink, and
//! persisting progress after every date so a pause or crash costs at most
//! the date in flight. Control signals are checked between dates; a probe
//! in progress is allowed to finish.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{ControlError, ExtractError};
use crate::model::{PriceObservation, SearchStatus, Target};
use crate::probe::{covered_dates, BundleProber, OfferSource, ProbeOutcome};
use crate::retry::RetryController;
use crate::search::CheckpointedSearch;
use crate::sink::ResultSink;

/// Operator signal delivered to a running job through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Cancel,
}

pub struct JobRunner {
    job: CheckpointedSearch,
    target: Target,
    source: Arc<dyn OfferSource>,
    sink: Arc<ResultSink>,
    retry: RetryController,
    control: watch::Receiver<Control>,
}

impl JobRunner {
    pub fn new(
        job: CheckpointedSearch,
        target: Target,
        source: Arc<dyn OfferSource>,
        sink: Arc<ResultSink>,
        retry: RetryController,
        control: watch::Receiver<Control>,
    ) -> Self {
        Self {
            job,
            target,
            source,
            sink,
            retry,
            control,
        }
    }

    /// Drive the job to a terminal or paused state and return that status.
    ///
    /// The browser source is closed on every exit path.
    pub async fn run(mut self) -> Result<SearchStatus, ControlError> {
        let outcome = self.run_inner().await;
        self.source.close().await;
        outcome
    }

    async fn run_inner(&mut self) -> Result<SearchStatus, ControlError> {
        match self.job.search().status {
            SearchStatus::Pending => self.job.start().await?,
            SearchStatus::Paused => self.job.resume().await?,
            other => {
                return Err(ControlError::NotDispatchable {
                    id: self.job.search().id,
                    status: other.to_string(),
                })
            }
        }

        let range_start = self.job.search().range_start;
        let range_end = self.job.search().range_end;
        let mut date = self.job.search().resume_date();
        let mut prices_found = self.job.search().total_prices_found;
        let started = Instant::now();
        let mut dates_this_run: u32 = 0;
        let mut next_progress_log: u32 = 5;

        while date <= range_end {
            let signal = *self.control.borrow();
            match signal {
                Control::Run => {}
                Control::Pause => {
                    self.job.pause("operator request").await?;
                    return Ok(SearchStatus::Paused);
                }
                Control::Cancel => {
                    self.job.cancel("operator request").await?;
                    return Ok(SearchStatus::Cancelled);
                }
            }

            let prober = BundleProber::new(self.source.as_ref(), &self.retry, &self.target);
            let advance = match prober.probe(date).await {
                Ok(ProbeOutcome::Found(hit)) => {
                    let covered = covered_dates(date, hit.bundle_size, range_end);
                    for night in &covered {
                        let obs = PriceObservation {
                            target_id: self.target.id,
                            search_id: self.job.search().id,
                            date: *night,
                            price: hit.per_night_price,
                            currency: hit.currency.clone(),
                            room_label: hit.room_label.clone(),
                            is_bundle: hit.bundle_size > 1,
                            bundle_size: hit.bundle_size,
                            minimum_nights_detected: hit.bundle_size,
                            availability_inferred: hit.bundle_size > 1,
                            scraped_at: chrono::Utc::now(),
                        };
                        match self.sink.record(&obs).await {
                            Ok(()) => prices_found += 1,
                            Err(e) => return self.abort(e).await,
                        }
                    }
                    covered.len() as i64
                }
                Ok(ProbeOutcome::NoOffer) => 1,
                Err(e) => return self.abort(e).await,
            };

            date += Duration::days(advance.max(1));
            dates_this_run += advance.max(1) as u32;
            let processed = (date - range_start).num_days().max(0) as u32;
            self.job.update_progress(processed, prices_found).await?;

            if progress_log_due(dates_this_run, &mut next_progress_log) {
                let remaining = (range_end - date).num_days().max(0) as u32 + 1;
                let per_date = started.elapsed() / dates_this_run.max(1);
                info!(
                    search = self.job.search().id,
                    target = %self.target.name,
                    processed,
                    total = self.job.search().total_dates,
                    eta_secs = (per_date * remaining).as_secs(),
                    "extraction progress"
                );
            }
        }

        self.job.complete().await?;
        self.sink.notify_completion(self.job.search(), &self.target);
        Ok(SearchStatus::Completed)
    }

    /// Map a fatal probe error to the matching terminal transition.
    async fn abort(&mut self, err: ExtractError) -> Result<SearchStatus, ControlError> {
        match err {
            ExtractError::Cancelled => {
                warn!(search = self.job.search().id, "extraction cancelled mid-probe");
                self.job.cancel("cancelled during extraction").await?;
                Ok(SearchStatus::Cancelled)
            }
            other => {
                error!(
                    search = self.job.search().id,
                    target = %self.target.name,
                    "extraction failed: {other}"
                );
                self.job.fail(&other.to_string()).await?;
                self.sink.notify_completion(self.job.search(), &self.target);
                Ok(SearchStatus::Failed)
            }
        }
    }
}

/// Progress-log cadence: fires every five processed dates. Bundles can jump
/// the counter past a multiple of five, so the gate is a moving threshold
/// rather than an exact modulo.
fn progress_log_due(dates_this_run: u32, next_log_at: &mut u32) -> bool {
    if dates_this_run >= *next_log_at {
        *next_log_at = dates_this_run + 5;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlatformKind, Search};
    use crate::platform::RoomOffer;
    use crate::store::{MemoryStore, PriceStore, SearchStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date literal")
    }

    fn target() -> Target {
        Target {
            id: 7,
            name: "Hotel Mirante".into(),
            search_url: "https://example.com/hotel".into(),
            platform: PlatformKind::Booking,
            max_bundle_size: 3,
            min_capacity: 2,
        }
    }

    fn offer(total: f64) -> RoomOffer {
        RoomOffer {
            capacity: 2,
            total_price: total,
            currency: "EUR".into(),
            room_label: "Standard".into(),
        }
    }

    /// Scripted source; optionally flips the control channel after a number
    /// of fetches to simulate an operator acting mid-run.
    struct ScriptedSource {
        offers: HashMap<(NaiveDate, i64), Vec<RoomOffer>>,
        fetches: Mutex<u32>,
        flip: Option<(u32, watch::Sender<Control>, Control)>,
    }

    impl ScriptedSource {
        fn new(offers: HashMap<(NaiveDate, i64), Vec<RoomOffer>>) -> Self {
            Self {
                offers,
                fetches: Mutex::new(0),
                flip: None,
            }
        }

        fn with_flip(mut self, after: u32, tx: watch::Sender<Control>, signal: Control) -> Self {
            self.flip = Some((after, tx, signal));
            self
        }
    }

    #[async_trait]
    impl OfferSource for ScriptedSource {
        async fn fetch_offers(
            &self,
            checkin: NaiveDate,
            checkout: NaiveDate,
        ) -> Result<Vec<RoomOffer>, ExtractError> {
            let count = {
                let mut fetches = self.fetches.lock();
                *fetches += 1;
                *fetches
            };
            if let Some((after, tx, signal)) = &self.flip {
                if count == *after {
                    let _ = tx.send(*signal);
                }
            }
            let nights = (checkout - checkin).num_days();
            Ok(self
                .offers
                .get(&(checkin, nights))
                .cloned()
                .unwrap_or_default())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        search_id: i64,
        control_tx: watch::Sender<Control>,
        control_rx: watch::Receiver<Control>,
    }

    async fn harness(range_start: &str, range_end: &str) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let search = Search::new(0, target().id, d(range_start), d(range_end));
        let search_id = store.insert_search(&search).await.expect("insert");
        let (control_tx, control_rx) = watch::channel(Control::Run);
        Harness {
            store,
            search_id,
            control_tx,
            control_rx,
        }
    }

    async fn runner_for(h: &Harness, source: ScriptedSource) -> JobRunner {
        let job = CheckpointedSearch::load(h.search_id, h.store.clone())
            .await
            .expect("load");
        let sink = Arc::new(ResultSink::new(
            h.store.clone(),
            std::env::temp_dir().join("rateshopper-test-fallback"),
            None,
        ));
        JobRunner::new(
            job,
            target(),
            Arc::new(source),
            sink,
            RetryController::new(2, 0.0, 0.001),
            h.control_rx.clone(),
        )
    }

    #[test]
    fn progress_log_cadence_survives_bundle_jumps() {
        let mut next = 5;
        // Single-night advances hit the threshold exactly.
        assert!(!progress_log_due(4, &mut next));
        assert!(progress_log_due(5, &mut next));
        assert!(!progress_log_due(8, &mut next));
        // A 3-night bundle jumps 8 -> 11, straight past the 10 threshold.
        assert!(progress_log_due(11, &mut next));
        assert_eq!(next, 16);
    }

    #[tokio::test]
    async fn five_single_night_dates_complete_cleanly() {
        let h = harness("2025-09-01", "2025-09-05").await;
        let mut offers = HashMap::new();
        for day in 1..=5 {
            let date = d(&format!("2025-09-{day:02}"));
            offers.insert((date, 1), vec![offer(200.0)]);
        }

        let status = runner_for(&h, ScriptedSource::new(offers))
            .await
            .run()
            .await
            .expect("run");
        assert_eq!(status, SearchStatus::Completed);

        let prices = h.store.prices_for_search(h.search_id).await.expect("prices");
        assert_eq!(prices.len(), 5);
        assert!(prices.iter().all(|p| p.price == 200.0 && !p.is_bundle));

        let search = h.store.get_search(h.search_id).await.expect("get").expect("row");
        assert_eq!(search.status, SearchStatus::Completed);
        assert_eq!(search.processed_dates, 5);
        assert_eq!(search.total_prices_found, 5);
    }

    #[tokio::test]
    async fn three_night_bundle_fans_out_per_night_price() {
        let h = harness("2025-09-11", "2025-09-13").await;
        let mut offers = HashMap::new();
        // Nothing for 1 or 2 nights on the 11th; a 450.00 package for 3.
        offers.insert((d("2025-09-11"), 3), vec![offer(450.0)]);

        let status = runner_for(&h, ScriptedSource::new(offers))
            .await
            .run()
            .await
            .expect("run");
        assert_eq!(status, SearchStatus::Completed);

        let prices = h.store.prices_for_search(h.search_id).await.expect("prices");
        assert_eq!(prices.len(), 3);
        for (i, expected) in ["2025-09-11", "2025-09-12", "2025-09-13"].iter().enumerate() {
            assert_eq!(prices[i].date, d(expected));
            assert_eq!(prices[i].price, 150.0);
            assert!(prices[i].is_bundle);
            assert_eq!(prices[i].minimum_nights_detected, 3);
            assert!(prices[i].availability_inferred);
        }
    }

    #[tokio::test]
    async fn bundle_truncates_at_range_end() {
        let h = harness("2025-09-11", "2025-09-12").await;
        let mut offers = HashMap::new();
        // 3-night minimum but the range ends on the 12th.
        offers.insert((d("2025-09-11"), 3), vec![offer(450.0)]);

        let status = runner_for(&h, ScriptedSource::new(offers))
            .await
            .run()
            .await
            .expect("run");
        assert_eq!(status, SearchStatus::Completed);

        let prices = h.store.prices_for_search(h.search_id).await.expect("prices");
        assert_eq!(prices.len(), 2);
        assert_eq!(prices.last().map(|p| p.date), Some(d("2025-09-12")));
    }

    #[tokio::test]
    async fn unavailable_dates_are_skipped_without_observations() {
        let h = harness("2025-09-01", "2025-09-03").await;
        let mut offers = HashMap::new();
        offers.insert((d("2025-09-01"), 1), vec![offer(120.0)]);
        // 2025-09-02 has nothing at any stay length.
        offers.insert((d("2025-09-03"), 1), vec![offer(140.0)]);

        let status = runner_for(&h, ScriptedSource::new(offers))
            .await
            .run()
            .await
            .expect("run");
        assert_eq!(status, SearchStatus::Completed);

        let prices = h.store.prices_for_search(h.search_id).await.expect("prices");
        assert_eq!(prices.len(), 2);

        let search = h.store.get_search(h.search_id).await.expect("get").expect("row");
        assert_eq!(search.processed_dates, 3);
        assert_eq!(search.total_prices_found, 2);
    }

    #[tokio::test]
    async fn pause_then_resume_yields_the_full_date_set_once() {
        let h = harness("2025-09-01", "2025-09-06").await;
        let mut offers = HashMap::new();
        for day in 1..=6 {
            let date = d(&format!("2025-09-{day:02}"));
            offers.insert((date, 1), vec![offer(100.0 + f64::from(day))]);
        }

        // Operator pauses after the third fetch; the in-flight date finishes.
        let source = ScriptedSource::new(offers.clone()).with_flip(
            3,
            h.control_tx.clone(),
            Control::Pause,
        );
        let status = runner_for(&h, source).await.run().await.expect("run");
        assert_eq!(status, SearchStatus::Paused);

        let paused = h.store.get_search(h.search_id).await.expect("get").expect("row");
        assert_eq!(paused.status, SearchStatus::Paused);
        assert_eq!(paused.processed_dates, 3);
        assert_eq!(paused.resume_date(), d("2025-09-04"));

        // Resume and finish.
        h.control_tx.send(Control::Run).expect("signal");
        let status = runner_for(&h, ScriptedSource::new(offers))
            .await
            .run()
            .await
            .expect("resume run");
        assert_eq!(status, SearchStatus::Completed);

        let prices = h.store.prices_for_search(h.search_id).await.expect("prices");
        assert_eq!(prices.len(), 6);
        let dates: Vec<NaiveDate> = prices.iter().map(|p| p.date).collect();
        let expected: Vec<NaiveDate> = (1..=6).map(|day| d(&format!("2025-09-{day:02}"))).collect();
        assert_eq!(dates, expected);
    }

    #[tokio::test]
    async fn cancel_signal_stops_the_run_and_keeps_partial_results() {
        let h = harness("2025-09-01", "2025-09-06").await;
        let mut offers = HashMap::new();
        for day in 1..=6 {
            let date = d(&format!("2025-09-{day:02}"));
            offers.insert((date, 1), vec![offer(100.0)]);
        }

        let source = ScriptedSource::new(offers).with_flip(
            2,
            h.control_tx.clone(),
            Control::Cancel,
        );
        let status = runner_for(&h, source).await.run().await.expect("run");
        assert_eq!(status, SearchStatus::Cancelled);

        let search = h.store.get_search(h.search_id).await.expect("get").expect("row");
        assert_eq!(search.status, SearchStatus::Cancelled);
        let prices = h.store.prices_for_search(h.search_id).await.expect("prices");
        assert_eq!(prices.len(), 2);
    }
}
