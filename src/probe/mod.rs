//! Bundle-probing algorithm
//!
//! A platform that enforces a minimum length of stay silently returns no
//! inventory for shorter requests. For each target date the prober therefore
//! tests stay lengths ascending from one night: the first length with a valid
//! offer is the detected minimum, and its cheapest total fans out as the same
//! per-night price across every covered date. Probing shortest-to-longest
//! finds that minimum exactly once per date.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::model::Target;
use crate::platform::RoomOffer;
use crate::retry::RetryController;

/// Source of room offers for a stay window.
///
/// Production binds a browser session plus platform adapter behind this seam;
/// tests drive the prober with a scripted mock.
#[async_trait]
pub trait OfferSource: Send + Sync {
    async fn fetch_offers(
        &self,
        checkin: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Vec<RoomOffer>, ExtractError>;

    /// Release any resources held by the source (browser process, profile
    /// directory). Default is a no-op for trivial sources.
    async fn close(&self) {}
}

/// Result of probing one date.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// An offer was found at the given stay length.
    Found(ProbeHit),
    /// No stay length up to the target's maximum produced a valid offer.
    NoOffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeHit {
    /// The shortest stay length that produced an offer — the detected
    /// minimum nights for this date.
    pub bundle_size: u32,
    pub total_price: f64,
    /// `total_price / bundle_size`.
    pub per_night_price: f64,
    pub currency: String,
    pub room_label: String,
}

/// Probes one date at a time against a single target.
pub struct BundleProber<'a> {
    source: &'a dyn OfferSource,
    retry: &'a RetryController,
    target: &'a Target,
}

impl<'a> BundleProber<'a> {
    #[must_use]
    pub fn new(source: &'a dyn OfferSource, retry: &'a RetryController, target: &'a Target) -> Self {
        Self {
            source,
            retry,
            target,
        }
    }

    /// Find the cheapest offer for `date`, testing stay lengths 1 through the
    /// target's `max_bundle_size`.
    ///
    /// A bundle may extend past the requested range end; the caller truncates
    /// the fan-out instead of the probe being capped, so a date near the end
    /// of the range still resolves through a longer package.
    pub async fn probe(&self, date: NaiveDate) -> Result<ProbeOutcome, ExtractError> {
        for bundle_size in 1..=self.target.max_bundle_size.max(1) {
            let checkout = date + Duration::days(i64::from(bundle_size));

            let fetched = self
                .retry
                .with_retry("fetch_offers", || {
                    self.source.fetch_offers(date, checkout)
                })
                .await;

            let offers = match fetched {
                Ok(offers) => offers,
                Err(err) if err.is_retryable() => {
                    // Retries exhausted for this stay length only; the next
                    // length may still resolve the date.
                    warn!(
                        target = self.target.id,
                        %date,
                        bundle_size,
                        error = %err,
                        "abandoning stay length after exhausted retries"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            let best = offers
                .into_iter()
                .filter(|o| o.capacity >= self.target.min_capacity)
                .min_by(|a, b| {
                    a.total_price
                        .partial_cmp(&b.total_price)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });

            match best {
                Some(offer) => {
                    let per_night = offer.total_price / f64::from(bundle_size);
                    info!(
                        target = self.target.id,
                        %date,
                        bundle_size,
                        per_night,
                        currency = %offer.currency,
                        "offer found"
                    );
                    return Ok(ProbeOutcome::Found(ProbeHit {
                        bundle_size,
                        total_price: offer.total_price,
                        per_night_price: per_night,
                        currency: offer.currency,
                        room_label: offer.room_label,
                    }));
                }
                None => {
                    // No valid inventory at this length: either a minimum-stay
                    // rule or a plain sell-out. Try the next length.
                    debug!(
                        target = self.target.id,
                        %date,
                        bundle_size,
                        "no valid offers at this stay length"
                    );
                }
            }
        }

        info!(
            target = self.target.id,
            %date,
            max_bundle_size = self.target.max_bundle_size,
            "no offer at any probed stay length"
        );
        Ok(ProbeOutcome::NoOffer)
    }
}

/// Dates covered by a hit starting at `date`, truncated at the inclusive
/// range end; trailing dates past the range are dropped, never fabricated.
#[must_use]
pub fn covered_dates(date: NaiveDate, bundle_size: u32, range_end: NaiveDate) -> Vec<NaiveDate> {
    (0..i64::from(bundle_size))
        .map(|offset| date + Duration::days(offset))
        .take_while(|d| *d <= range_end)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlatformKind;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date literal")
    }

    fn target(max_bundle_size: u32) -> Target {
        Target {
            id: 9,
            name: "Pousada Teste".into(),
            search_url: "https://example.com/hotel".into(),
            platform: PlatformKind::Booking,
            max_bundle_size,
            min_capacity: 2,
        }
    }

    fn offer(capacity: u32, total: f64) -> RoomOffer {
        RoomOffer {
            capacity,
            total_price: total,
            currency: "EUR".into(),
            room_label: "Standard".into(),
        }
    }

    /// Offers keyed by (checkin, nights); unknown keys return empty.
    struct ScriptedSource {
        offers: HashMap<(NaiveDate, i64), Vec<RoomOffer>>,
        failures_before_success: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(offers: HashMap<(NaiveDate, i64), Vec<RoomOffer>>) -> Self {
            Self {
                offers,
                failures_before_success: Mutex::new(0),
            }
        }

        fn failing_first(offers: HashMap<(NaiveDate, i64), Vec<RoomOffer>>, n: u32) -> Self {
            Self {
                offers,
                failures_before_success: Mutex::new(n),
            }
        }
    }

    #[async_trait]
    impl OfferSource for ScriptedSource {
        async fn fetch_offers(
            &self,
            checkin: NaiveDate,
            checkout: NaiveDate,
        ) -> Result<Vec<RoomOffer>, ExtractError> {
            {
                let mut remaining = self.failures_before_success.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExtractError::Navigation("scripted failure".into()));
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

    fn retry() -> RetryController {
        RetryController::new(3, 0.0, 0.001)
    }

    #[tokio::test]
    async fn single_night_offer_resolves_immediately() {
        let date = d("2025-09-11");
        let mut offers = HashMap::new();
        offers.insert((date, 1), vec![offer(2, 200.0)]);
        let source = ScriptedSource::new(offers);
        let t = target(3);
        let r = retry();

        let outcome = BundleProber::new(&source, &r, &t)
            .probe(date)
            .await
            .expect("probe ok");
        match outcome {
            ProbeOutcome::Found(hit) => {
                assert_eq!(hit.bundle_size, 1);
                assert_eq!(hit.per_night_price, 200.0);
            }
            ProbeOutcome::NoOffer => panic!("expected a hit"),
        }
    }

    #[tokio::test]
    async fn minimum_stay_detected_at_three_nights() {
        // Nothing for 1 or 2 nights, a 450.00 offer for 3: the classic
        // minimum-stay property.
        let date = d("2025-09-11");
        let mut offers = HashMap::new();
        offers.insert((date, 3), vec![offer(2, 450.0)]);
        let source = ScriptedSource::new(offers);
        let t = target(3);
        let r = retry();

        let outcome = BundleProber::new(&source, &r, &t)
            .probe(date)
            .await
            .expect("probe ok");
        match outcome {
            ProbeOutcome::Found(hit) => {
                assert_eq!(hit.bundle_size, 3);
                assert_eq!(hit.per_night_price, 150.0);
                assert_eq!(hit.total_price, 450.0);
            }
            ProbeOutcome::NoOffer => panic!("expected a 3-night hit"),
        }
    }

    #[tokio::test]
    async fn cheapest_offer_wins_and_capacity_filters() {
        let date = d("2025-09-11");
        let mut offers = HashMap::new();
        offers.insert(
            (date, 1),
            vec![
                offer(1, 80.0),  // below min capacity, ignored
                offer(2, 140.0), // cheapest valid
                offer(4, 260.0),
            ],
        );
        let source = ScriptedSource::new(offers);
        let t = target(3);
        let r = retry();

        let outcome = BundleProber::new(&source, &r, &t)
            .probe(date)
            .await
            .expect("probe ok");
        match outcome {
            ProbeOutcome::Found(hit) => assert_eq!(hit.per_night_price, 140.0),
            ProbeOutcome::NoOffer => panic!("expected a hit"),
        }
    }

    #[tokio::test]
    async fn exhausting_all_sizes_reports_no_offer() {
        let source = ScriptedSource::new(HashMap::new());
        let t = target(3);
        let r = retry();

        let outcome = BundleProber::new(&source, &r, &t)
            .probe(d("2025-09-11"))
            .await
            .expect("probe ok");
        assert_eq!(outcome, ProbeOutcome::NoOffer);
    }

    #[tokio::test]
    async fn transient_failures_are_transparent() {
        // Two navigation failures, then the scripted offer appears; the date
        // still resolves on the same stay length.
        let date = d("2025-09-11");
        let mut offers = HashMap::new();
        offers.insert((date, 1), vec![offer(2, 200.0)]);
        let source = ScriptedSource::failing_first(offers, 2);
        let t = target(3);
        let r = retry();

        let outcome = BundleProber::new(&source, &r, &t)
            .probe(date)
            .await
            .expect("probe ok");
        match outcome {
            ProbeOutcome::Found(hit) => {
                assert_eq!(hit.bundle_size, 1);
                assert_eq!(hit.per_night_price, 200.0);
            }
            ProbeOutcome::NoOffer => panic!("expected retries to be transparent"),
        }
    }

    #[tokio::test]
    async fn cancellation_propagates_immediately() {
        struct CancelledSource;

        #[async_trait]
        impl OfferSource for CancelledSource {
            async fn fetch_offers(
                &self,
                _checkin: NaiveDate,
                _checkout: NaiveDate,
            ) -> Result<Vec<RoomOffer>, ExtractError> {
                Err(ExtractError::Cancelled)
            }
        }

        let t = target(5);
        let r = retry();
        let err = BundleProber::new(&CancelledSource, &r, &t)
            .probe(d("2025-09-11"))
            .await
            .expect_err("cancel propagates");
        assert!(matches!(err, ExtractError::Cancelled));
    }

    #[test]
    fn covered_dates_truncate_at_range_end() {
        let covered = covered_dates(d("2025-09-29"), 3, d("2025-09-30"));
        assert_eq!(covered, vec![d("2025-09-29"), d("2025-09-30")]);

        let full = covered_dates(d("2025-09-11"), 3, d("2025-09-30"));
        assert_eq!(full.len(), 3);
    }
}
