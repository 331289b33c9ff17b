//! Booking.com adapter
//!
//! URL conventions: `checkin`/`checkout` ISO dates plus occupancy params.
//! Extraction strategies in descending priority:
//! 1. the `b_rooms_available_and_soldout` page-global embedded by the room
//!    table script,
//! 2. JSON-LD offer annotations,
//! 3. room-table DOM selectors,
//! 4. bare price-pattern text mining.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{
    extract_json_array, extract_jsonld_offers, json_number, parse_price_token, PlatformAdapter,
    RoomOffer,
};
use crate::error::ExtractError;
use crate::model::PlatformKind;

const EMBEDDED_ROOMS_MARKER: &str = "b_rooms_available_and_soldout";

static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // currency marker followed by an amount, e.g. "€ 450", "R$ 1.234,56", "US$120.00"
    Regex::new(r"(?:€|\$|£|R\$|US\$|BRL|EUR|USD)\s?([\d.,]+\d)").expect("static price pattern")
});

#[derive(Debug, Default)]
pub struct BookingAdapter;

impl BookingAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Strategy 1: room inventory embedded as a script-global JSON array.
    fn offers_from_embedded(&self, html: &str) -> Option<Vec<RoomOffer>> {
        let rooms = extract_json_array(html, EMBEDDED_ROOMS_MARKER)?;
        let rooms = rooms.as_array()?;

        let mut offers = Vec::new();
        for room in rooms {
            let room_label = room
                .get("b_name")
                .and_then(|n| n.as_str())
                .unwrap_or("Room")
                .to_string();
            let room_capacity = room
                .get("b_max_persons")
                .and_then(json_number)
                .map(|v| v as u32);

            let Some(blocks) = room.get("b_blocks").and_then(|b| b.as_array()) else {
                continue;
            };
            for block in blocks {
                let Some(total_price) = block
                    .get("b_raw_price")
                    .or_else(|| block.get("b_price"))
                    .and_then(json_number)
                else {
                    continue;
                };
                if total_price <= 0.0 {
                    continue;
                }
                let capacity = block
                    .get("b_max_persons")
                    .and_then(json_number)
                    .map(|v| v as u32)
                    .or(room_capacity)
                    .unwrap_or(2);
                let currency = block
                    .get("b_currency")
                    .and_then(|c| c.as_str())
                    .unwrap_or("EUR")
                    .to_string();
                offers.push(RoomOffer {
                    capacity,
                    total_price,
                    currency,
                    room_label: room_label.clone(),
                });
            }
        }

        if offers.is_empty() {
            None
        } else {
            Some(offers)
        }
    }

    /// Strategy 3: scrape the availability room table.
    fn offers_from_dom(&self, html: &str) -> Vec<RoomOffer> {
        let doc = Html::parse_document(html);

        let row_sel = Selector::parse("tr.hprt-table-row, [data-testid='property-room-row']")
            .expect("static selector");
        let price_sel = Selector::parse(
            ".hprt-price-price, .prco-valign-middle-helper, [data-testid='price-and-discounted-price']",
        )
        .expect("static selector");
        let label_sel = Selector::parse(".hprt-roomtype-icon-link, [data-testid='room-name']")
            .expect("static selector");
        let occupancy_sel =
            Selector::parse(".hprt-occupancy-occupancy-info, [data-occupancy]").expect("static selector");

        let mut offers = Vec::new();
        for row in doc.select(&row_sel) {
            let price_text = row
                .select(&price_sel)
                .next()
                .map(|el| el.text().collect::<String>());
            let Some(total_price) = price_text.as_deref().and_then(parse_price_token) else {
                continue;
            };

            let room_label = row
                .select(&label_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Room".to_string());

            let capacity = row
                .select(&occupancy_sel)
                .next()
                .and_then(|el| {
                    el.value()
                        .attr("data-occupancy")
                        .and_then(|v| v.parse::<u32>().ok())
                        .or_else(|| {
                            // fallback: count occupant glyphs in the cell text, e.g. "x 2"
                            let text = el.text().collect::<String>();
                            text.chars()
                                .filter(|c| c.is_ascii_digit())
                                .collect::<String>()
                                .parse::<u32>()
                                .ok()
                        })
                })
                .unwrap_or(2);

            let currency = price_text
                .as_deref()
                .map(detect_currency)
                .unwrap_or_else(|| "EUR".to_string());

            offers.push(RoomOffer {
                capacity,
                total_price,
                currency,
                room_label,
            });
        }
        offers
    }

    /// Strategy 4: last-resort price mining over visible text.
    fn offers_from_text(&self, html: &str) -> Vec<RoomOffer> {
        PRICE_PATTERN
            .captures_iter(html)
            .filter_map(|cap| {
                let total_price = parse_price_token(cap.get(1)?.as_str())?;
                Some(RoomOffer {
                    capacity: 2,
                    total_price,
                    currency: detect_currency(cap.get(0)?.as_str()),
                    room_label: "Unlabeled offer".to_string(),
                })
            })
            .collect()
    }
}

impl PlatformAdapter for BookingAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Booking
    }

    fn build_search_url(
        &self,
        base_url: &str,
        checkin: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Url, ExtractError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| ExtractError::Navigation(format!("invalid target URL {base_url}: {e}")))?;

        url.query_pairs_mut()
            .append_pair("checkin", &checkin.format("%Y-%m-%d").to_string())
            .append_pair("checkout", &checkout.format("%Y-%m-%d").to_string())
            .append_pair("group_adults", "2")
            .append_pair("group_children", "0")
            .append_pair("no_rooms", "1");

        Ok(url)
    }

    fn extract_offers(&self, html: &str) -> Result<Vec<RoomOffer>, ExtractError> {
        if let Some(offers) = self.offers_from_embedded(html) {
            debug!(count = offers.len(), "booking: offers from embedded room data");
            return Ok(offers);
        }

        let jsonld = extract_jsonld_offers(html);
        if !jsonld.is_empty() {
            debug!(count = jsonld.len(), "booking: offers from JSON-LD");
            return Ok(jsonld);
        }

        let dom = self.offers_from_dom(html);
        if !dom.is_empty() {
            debug!(count = dom.len(), "booking: offers from room table DOM");
            return Ok(dom);
        }

        // "Sold out" / min-stay pages legitimately carry no room table at all;
        // only pages lacking the availability shell entirely count as missing data.
        if !html.contains("hprt") && !html.contains("hotel") && !html.contains("property") {
            return Err(ExtractError::MissingData(
                "page has no recognizable availability structure".to_string(),
            ));
        }

        Ok(self.offers_from_text(html))
    }
}

fn detect_currency(token: &str) -> String {
    if token.contains("R$") || token.contains("BRL") {
        "BRL".to_string()
    } else if token.contains('€') || token.contains("EUR") {
        "EUR".to_string()
    } else if token.contains('£') {
        "GBP".to_string()
    } else if token.contains('$') || token.contains("USD") {
        "USD".to_string()
    } else {
        "EUR".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date literal")
    }

    #[test]
    fn search_url_carries_date_and_occupancy_params() {
        let adapter = BookingAdapter::new();
        let url = adapter
            .build_search_url(
                "https://www.booking.com/hotel/br/pousada-mar.html",
                d("2025-09-11"),
                d("2025-09-12"),
            )
            .expect("url builds");

        let query = url.query().expect("query present");
        assert!(query.contains("checkin=2025-09-11"));
        assert!(query.contains("checkout=2025-09-12"));
        assert!(query.contains("group_adults=2"));
        assert!(query.contains("no_rooms=1"));
    }

    #[test]
    fn embedded_room_data_wins_over_other_strategies() {
        let html = r#"
            <html><body><script>
            b_rooms_available_and_soldout: [
                {"b_name":"Standard Double","b_max_persons":2,"b_blocks":[
                    {"b_raw_price":"450.00","b_currency":"EUR"},
                    {"b_raw_price":"520.00","b_currency":"EUR","b_max_persons":3}
                ]},
                {"b_name":"Single","b_max_persons":1,"b_blocks":[{"b_raw_price":"200.00","b_currency":"EUR"}]}
            ],
            </script><div class="hprt-price-price">€ 999</div></body></html>
        "#;
        let offers = BookingAdapter::new().extract_offers(html).expect("extracts");
        assert_eq!(offers.len(), 3);
        assert_eq!(offers[0].total_price, 450.0);
        assert_eq!(offers[0].capacity, 2);
        assert_eq!(offers[1].capacity, 3);
        assert_eq!(offers[2].capacity, 1);
    }

    #[test]
    fn dom_rows_parsed_when_embedded_data_absent() {
        let html = r#"
            <html><body><table>
            <tr class="hprt-table-row">
                <td><a class="hprt-roomtype-icon-link"> Deluxe Suite </a></td>
                <td><span class="hprt-occupancy-occupancy-info" data-occupancy="4"></span></td>
                <td><div class="hprt-price-price">€ 1.250,50</div></td>
            </tr>
            </table></body></html>
        "#;
        let offers = BookingAdapter::new().extract_offers(html).expect("extracts");
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].room_label, "Deluxe Suite");
        assert_eq!(offers[0].capacity, 4);
        assert_eq!(offers[0].total_price, 1250.50);
    }

    #[test]
    fn sold_out_page_yields_empty_not_error() {
        let html = r#"<html><body><div class="hprt-no-rooms">This hotel has no availability</div></body></html>"#;
        let offers = BookingAdapter::new().extract_offers(html).expect("extracts");
        assert!(offers.is_empty());
    }

    #[test]
    fn unrecognizable_page_is_missing_data() {
        let err = BookingAdapter::new()
            .extract_offers("<html><body>nothing here</body></html>")
            .expect_err("should fail");
        assert!(matches!(err, ExtractError::MissingData(_)));
    }
}
