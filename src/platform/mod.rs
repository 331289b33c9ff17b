//! Platform adapters
//!
//! One adapter per target platform, polymorphic over URL construction and
//! room-offer extraction. Extraction runs over the rendered HTML snapshot so
//! adapters never touch the browser, retries or date arithmetic; they stay
//! testable against fixed page fixtures.

pub mod artaxnet;
pub mod booking;

pub use artaxnet::ArtaxnetAdapter;
pub use booking::BookingAdapter;

use chrono::NaiveDate;
use std::sync::Arc;
use url::Url;

use crate::error::ExtractError;
use crate::model::PlatformKind;

/// A single room offer mined from a results page.
///
/// `total_price` covers the whole requested stay; per-night division is the
/// prober's job.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomOffer {
    /// Maximum occupancy the room sleeps.
    pub capacity: u32,
    pub total_price: f64,
    pub currency: String,
    pub room_label: String,
}

/// Per-platform capability: build a dated search URL and extract room offers
/// from the rendered page.
pub trait PlatformAdapter: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Append the platform's date/occupancy query conventions to the target's
    /// base listing URL.
    fn build_search_url(
        &self,
        base_url: &str,
        checkin: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Url, ExtractError>;

    /// Mine room offers out of the rendered HTML.
    ///
    /// An empty vec is not an error: it is how the platform signals that no
    /// inventory exists for this stay length (possibly a minimum-stay rule).
    fn extract_offers(&self, html: &str) -> Result<Vec<RoomOffer>, ExtractError>;
}

/// Adapter registry keyed by platform kind.
#[must_use]
pub fn adapter_for(kind: PlatformKind) -> Arc<dyn PlatformAdapter> {
    match kind {
        PlatformKind::Booking => Arc::new(BookingAdapter::new()),
        PlatformKind::Artaxnet => Arc::new(ArtaxnetAdapter::new()),
    }
}

/// Parse a price token in either decimal convention.
///
/// Accepts `"1,234.56"`, `"1.234,56"`, `"450"`, `"450.00"`, `"450,00"` and
/// tolerates currency symbols and surrounding whitespace.
pub(crate) fn parse_price_token(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        // Both separators present: the rightmost one is the decimal point.
        (Some(d), Some(c)) if d > c => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        // Comma only: decimal if it looks like cents, thousands otherwise.
        (None, Some(c)) => {
            if cleaned.len() - c - 1 == 3 && cleaned.len() > 4 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        // Dot only: same heuristic.
        (Some(d), None) => {
            if cleaned.len() - d - 1 == 3 && cleaned.len() > 4 {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|p| *p > 0.0)
}

/// Locate a JSON array embedded after `marker` in a script body.
///
/// Regex cannot balance nested brackets, so this scans with a depth counter
/// (string-literal aware) from the first `[` following the marker.
pub(crate) fn extract_json_array(html: &str, marker: &str) -> Option<serde_json::Value> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let open = rest.find('[')?;
    let bytes = rest[open..].as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &rest[open..=open + i];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull offers out of JSON-LD `<script type="application/ld+json">` blocks.
///
/// Shared fallback for platforms that annotate listings with schema.org
/// `Offer`/`AggregateOffer` structures.
pub(crate) fn extract_jsonld_offers(html: &str) -> Vec<RoomOffer> {
    use scraper::{Html, Selector};

    let doc = Html::parse_document(html);
    let selector = match Selector::parse(r#"script[type="application/ld+json"]"#) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut offers = Vec::new();
    for script in doc.select(&selector) {
        let body: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) else {
            continue;
        };
        collect_jsonld_offers(&value, &mut offers);
    }
    offers
}

fn collect_jsonld_offers(value: &serde_json::Value, out: &mut Vec<RoomOffer>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_jsonld_offers(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            let is_offer = map
                .get("@type")
                .and_then(|t| t.as_str())
                .is_some_and(|t| t == "Offer" || t == "AggregateOffer");

            if is_offer {
                let price = map
                    .get("price")
                    .or_else(|| map.get("lowPrice"))
                    .and_then(json_number);
                if let Some(total_price) = price.filter(|p| *p > 0.0) {
                    let currency = map
                        .get("priceCurrency")
                        .and_then(|c| c.as_str())
                        .unwrap_or("EUR")
                        .to_string();
                    let room_label = map
                        .get("name")
                        .or_else(|| map.get("itemOffered").and_then(|i| i.get("name")))
                        .and_then(|n| n.as_str())
                        .unwrap_or("Offer")
                        .to_string();
                    let capacity = map
                        .get("itemOffered")
                        .and_then(|i| i.get("occupancy"))
                        .and_then(|o| o.get("value"))
                        .and_then(json_number)
                        .map(|v| v as u32)
                        .unwrap_or(2);
                    out.push(RoomOffer {
                        capacity,
                        total_price,
                        currency,
                        room_label,
                    });
                }
            }

            for nested in map.values() {
                collect_jsonld_offers(nested, out);
            }
        }
        _ => {}
    }
}

/// Read a JSON value as a number, accepting both numeric and string forms.
pub(crate) fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_price_token(s),
        _ => None,
    }
}
