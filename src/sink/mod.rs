//! Result delivery: primary store, file fallback, completion notification.
//!
//! A price that was scraped must never be lost to a storage hiccup. Writes
//! go to the primary store first; on failure the observation is appended to
//! a per-search fallback file an operator can replay later. Only when both
//! paths fail does the error escalate.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::ExtractError;
use crate::model::{PriceObservation, Search, Target};
use crate::store::PriceStore;

pub struct ResultSink {
    prices: Arc<dyn PriceStore>,
    fallback_dir: PathBuf,
    notify_url: Option<String>,
    http: reqwest::Client,
}

impl ResultSink {
    #[must_use]
    pub fn new(prices: Arc<dyn PriceStore>, fallback_dir: PathBuf, notify_url: Option<String>) -> Self {
        Self {
            prices,
            fallback_dir,
            notify_url,
            http: reqwest::Client::new(),
        }
    }

    /// Persist one observation, falling back to the local file on store
    /// failure. Duplicate `(search_id, date)` inserts are silently ignored.
    pub async fn record(&self, obs: &PriceObservation) -> Result<(), ExtractError> {
        match self.prices.save_price(obs).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(
                    search = obs.search_id,
                    date = %obs.date,
                    "duplicate observation ignored"
                );
                Ok(())
            }
            Err(store_err) => {
                warn!(
                    search = obs.search_id,
                    date = %obs.date,
                    error = %store_err,
                    "primary store rejected observation, writing fallback"
                );
                self.write_fallback(obs).map_err(|fallback_err| {
                    ExtractError::Persistence(format!(
                        "store failed ({store_err}) and fallback failed ({fallback_err})"
                    ))
                })
            }
        }
    }

    /// Append one `date;next_date;price;tag` line to the per-search
    /// fallback file.
    fn write_fallback(&self, obs: &PriceObservation) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.fallback_dir)?;
        let path = self
            .fallback_dir
            .join(format!("fallback_prices_{}.csv", obs.search_id));

        let next_date = obs.date + ChronoDuration::days(1);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(
            file,
            "{};{};{:.2};{}",
            obs.date.format("%Y-%m-%d"),
            next_date.format("%Y-%m-%d"),
            obs.price,
            obs.room_label
        )?;
        info!(
            search = obs.search_id,
            path = %path.display(),
            "observation written to fallback file"
        );
        Ok(())
    }

    /// Ping the configured webhook that a search finished.
    ///
    /// Fire-and-forget: the request runs on its own task and a delivery
    /// failure is logged, never surfaced to the job.
    pub fn notify_completion(&self, search: &Search, target: &Target) {
        let Some(url) = self.notify_url.clone() else {
            return;
        };
        let payload = json!({
            "search_id": search.id,
            "target_id": target.id,
            "target_name": target.name,
            "status": search.status.as_str(),
            "range_start": search.range_start.format("%Y-%m-%d").to_string(),
            "range_end": search.range_end.format("%Y-%m-%d").to_string(),
            "processed_dates": search.processed_dates,
            "total_prices_found": search.total_prices_found,
        });
        let http = self.http.clone();
        let search_id = search.id;
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .json(&payload)
                .timeout(Duration::from_secs(10))
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(search = search_id, "completion notification delivered");
                }
                Ok(resp) => {
                    warn!(
                        search = search_id,
                        status = %resp.status(),
                        "completion notification rejected"
                    );
                }
                Err(e) => {
                    error!(search = search_id, "completion notification failed: {e}");
                }
            }
        });
    }
}
