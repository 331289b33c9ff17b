//! Browser session lifecycle and page fetching.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chrono::NaiveDate;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::stealth;
use crate::config::EngineConfig;
use crate::error::ExtractError;
use crate::model::Target;
use crate::platform::{PlatformAdapter, RoomOffer};
use crate::probe::OfferSource;

/// Phrases that mark an interstitial or block page instead of results.
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "access denied",
    "unusual traffic",
    "are you a human",
    "pardon our interruption",
];

/// One launched Chrome process serving one extraction job.
///
/// Every fetch opens a fresh page, applies the stealth setup, and closes the
/// page afterwards, so consecutive probes do not share page state.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
    navigation_timeout: Duration,
    settle_delay: Duration,
    nav_delay_bounds_ms: (u64, u64),
}

impl BrowserSession {
    pub async fn launch(config: &EngineConfig) -> anyhow::Result<Self> {
        let (browser, handler_task, user_data_dir) = super::launch_browser(config).await?;
        Ok(Self {
            browser,
            handler_task,
            user_data_dir,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs()),
            settle_delay: Duration::from_millis(config.settle_delay_ms()),
            nav_delay_bounds_ms: config.nav_delay_bounds_ms(),
        })
    }

    /// Navigate to `url` and return the rendered HTML.
    ///
    /// Sleeps a randomized delay before navigating so consecutive requests
    /// do not fire at machine-regular intervals.
    pub async fn fetch_html(&self, url: &Url) -> Result<String, ExtractError> {
        let (delay_min, delay_max) = self.nav_delay_bounds_ms;
        let jitter = rand::rng().random_range(delay_min..=delay_max.max(delay_min));
        debug!(url = %url, jitter_ms = jitter, "navigating after delay");
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ExtractError::Navigation(format!("failed to open page: {e}")))?;

        let result = self.fetch_on_page(&page, url).await;

        if let Err(e) = page.close().await {
            warn!(url = %url, "failed to close page: {e}");
        }

        result
    }

    async fn fetch_on_page(&self, page: &chromiumoxide::Page, url: &Url) -> Result<String, ExtractError> {
        stealth::prepare_page(page)
            .await
            .map_err(|e| ExtractError::Navigation(format!("stealth setup failed: {e}")))?;

        let timeout_secs = self.navigation_timeout.as_secs();

        tokio::time::timeout(self.navigation_timeout, page.goto(url.as_str()))
            .await
            .map_err(|_| ExtractError::NavigationTimeout {
                url: url.to_string(),
                timeout_secs,
            })?
            .map_err(|e| ExtractError::Navigation(format!("goto failed: {e}")))?;

        tokio::time::timeout(self.navigation_timeout, page.wait_for_navigation())
            .await
            .map_err(|_| ExtractError::NavigationTimeout {
                url: url.to_string(),
                timeout_secs,
            })?
            .map_err(|e| ExtractError::Navigation(format!("navigation failed: {e}")))?;

        // Result grids on these platforms hydrate after the load event.
        tokio::time::sleep(self.settle_delay).await;

        let html = page
            .content()
            .await
            .map_err(|e| ExtractError::Navigation(format!("failed to read page content: {e}")))?;

        if is_blocked_page(&html) {
            return Err(ExtractError::BlockedPage(format!(
                "interstitial detected at {url}"
            )));
        }

        Ok(html)
    }

    /// Shut down Chrome and remove the session's profile directory.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            warn!("browser wait failed: {e}");
        }
        self.handler_task.abort();

        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            warn!(
                dir = %self.user_data_dir.display(),
                "failed to remove user data directory: {e}"
            );
        }
        info!("browser session closed");
    }
}

/// Heuristic block detection over a rendered page.
///
/// Short pages are the signal: a full results page easily exceeds the
/// threshold even when a marker word appears in unrelated copy.
fn is_blocked_page(html: &str) -> bool {
    if html.len() > 50_000 {
        return false;
    }
    let lowered = html.to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Binds a live browser session and a platform adapter into an offer source
/// for the prober.
pub struct LiveOfferSource {
    session: Mutex<Option<BrowserSession>>,
    adapter: Arc<dyn PlatformAdapter>,
    search_url: String,
    target_name: String,
}

impl LiveOfferSource {
    pub fn new(session: BrowserSession, adapter: Arc<dyn PlatformAdapter>, target: &Target) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            adapter,
            search_url: target.search_url.clone(),
            target_name: target.name.clone(),
        }
    }
}

#[async_trait]
impl OfferSource for LiveOfferSource {
    async fn fetch_offers(
        &self,
        checkin: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Vec<RoomOffer>, ExtractError> {
        let url = self
            .adapter
            .build_search_url(&self.search_url, checkin, checkout)?;

        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(ExtractError::SessionFatal(
            "browser session already closed".to_string(),
        ))?;

        let html = session.fetch_html(&url).await?;
        drop(guard);

        let offers = self.adapter.extract_offers(&html)?;
        debug!(
            target = %self.target_name,
            %checkin,
            %checkout,
            offers = offers.len(),
            "extracted offers"
        );
        Ok(offers)
    }

    async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}
