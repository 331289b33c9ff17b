//! Artaxnet booking-engine adapter
//!
//! Artaxnet-hosted hotel sites share one reservation widget: dates travel as
//! `checkin`/`checkout`/`adultos` query parameters and availability renders
//! into `.quarto` room cards. Pages annotate offers with JSON-LD when the
//! property enables it, so the strategy order is JSON-LD, then room-card DOM,
//! then BRL price mining.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{extract_jsonld_offers, parse_price_token, PlatformAdapter, RoomOffer};
use crate::error::ExtractError;
use crate::model::PlatformKind;

static BRL_PRICE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"R\$\s?([\d.,]+\d)").expect("static price pattern"));

#[derive(Debug, Default)]
pub struct ArtaxnetAdapter;

impl ArtaxnetAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn offers_from_dom(&self, html: &str) -> Vec<RoomOffer> {
        let doc = Html::parse_document(html);

        let card_sel =
            Selector::parse(".quarto, .room-card, .acomodacao").expect("static selector");
        let price_sel = Selector::parse(".valor-total, .room-price, .preco").expect("static selector");
        let label_sel =
            Selector::parse(".quarto-nome, .room-name, h3").expect("static selector");
        let capacity_sel =
            Selector::parse("[data-capacidade], .capacidade").expect("static selector");

        let mut offers = Vec::new();
        for card in doc.select(&card_sel) {
            let Some(total_price) = card
                .select(&price_sel)
                .next()
                .map(|el| el.text().collect::<String>())
                .as_deref()
                .and_then(parse_price_token)
            else {
                continue;
            };

            let room_label = card
                .select(&label_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Quarto".to_string());

            let capacity = card
                .select(&capacity_sel)
                .next()
                .and_then(|el| {
                    el.value()
                        .attr("data-capacidade")
                        .map(str::to_string)
                        .or_else(|| Some(el.text().collect::<String>()))
                })
                .and_then(|text| {
                    text.chars()
                        .filter(|c| c.is_ascii_digit())
                        .collect::<String>()
                        .parse::<u32>()
                        .ok()
                })
                .unwrap_or(2);

            offers.push(RoomOffer {
                capacity,
                total_price,
                currency: "BRL".to_string(),
                room_label,
            });
        }
        offers
    }

    fn offers_from_text(&self, html: &str) -> Vec<RoomOffer> {
        BRL_PRICE_PATTERN
            .captures_iter(html)
            .filter_map(|cap| {
                let total_price = parse_price_token(cap.get(1)?.as_str())?;
                Some(RoomOffer {
                    capacity: 2,
                    total_price,
                    currency: "BRL".to_string(),
                    room_label: "Unlabeled offer".to_string(),
                })
            })
            .collect()
    }
}

impl PlatformAdapter for ArtaxnetAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Artaxnet
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
            .append_pair("adultos", "2");

        Ok(url)
    }

    fn extract_offers(&self, html: &str) -> Result<Vec<RoomOffer>, ExtractError> {
        let jsonld = extract_jsonld_offers(html);
        if !jsonld.is_empty() {
            debug!(count = jsonld.len(), "artaxnet: offers from JSON-LD");
            return Ok(jsonld);
        }

        let dom = self.offers_from_dom(html);
        if !dom.is_empty() {
            debug!(count = dom.len(), "artaxnet: offers from room cards");
            return Ok(dom);
        }

        Ok(self.offers_from_text(html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date literal")
    }

    #[test]
    fn search_url_uses_portuguese_occupancy_param() {
        let adapter = ArtaxnetAdapter::new();
        let url = adapter
            .build_search_url("https://pousadasol.artaxnet.com/", d("2025-12-20"), d("2025-12-23"))
            .expect("url builds");
        let query = url.query().expect("query present");
        assert!(query.contains("checkin=2025-12-20"));
        assert!(query.contains("checkout=2025-12-23"));
        assert!(query.contains("adultos=2"));
    }

    #[test]
    fn room_cards_parsed_with_brl_comma_decimals() {
        let html = r#"
            <html><body>
            <div class="quarto">
                <h3 class="quarto-nome">Chalé Master</h3>
                <span class="capacidade">3 pessoas</span>
                <div class="valor-total">R$ 1.850,00</div>
            </div>
            <div class="quarto">
                <h3 class="quarto-nome">Standard</h3>
                <span class="capacidade">2 pessoas</span>
                <div class="valor-total">R$ 640,90</div>
            </div>
            </body></html>
        "#;
        let offers = ArtaxnetAdapter::new().extract_offers(html).expect("extracts");
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].total_price, 1850.0);
        assert_eq!(offers[0].capacity, 3);
        assert_eq!(offers[1].total_price, 640.90);
        assert_eq!(offers[1].currency, "BRL");
    }

    #[test]
    fn jsonld_preferred_over_dom() {
        let html = r#"
            <html><head><script type="application/ld+json">
            {"@type":"AggregateOffer","lowPrice":299.0,"priceCurrency":"BRL","name":"Melhor tarifa"}
            </script></head>
            <body><div class="quarto"><div class="valor-total">R$ 999,00</div></div></body></html>
        "#;
        let offers = ArtaxnetAdapter::new().extract_offers(html).expect("extracts");
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].total_price, 299.0);
    }

    #[test]
    fn empty_page_yields_no_offers() {
        let offers = ArtaxnetAdapter::new()
            .extract_offers("<html><body><p>Sem disponibilidade</p></body></html>")
            .expect("extracts");
        assert!(offers.is_empty());
    }
}
