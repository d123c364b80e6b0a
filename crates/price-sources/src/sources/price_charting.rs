//! PriceCharting price source.
//!
//! Searches `/products` for the card, then reads `/product/{id}/prices`.
//! PriceCharting reports loose/CIB/new prices rather than a market price;
//! the market price is normalized as the mean of the reported tiers, with
//! low/high as their min/max.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry};
use crate::client::{AuthScheme, ClientConfig, ResilientClient};
use crate::errors::SourceError;
use crate::models::{parse_price, CardQuery, PriceQuote};
use crate::sources::PriceSource;

const DEFAULT_BASE_URL: &str = "https://www.pricecharting.com/api";

/// Service key for the rate limiter and circuit breaker.
pub const SERVICE: &str = "pricecharting";

/// PriceCharting data source. Primary source in the default chain.
pub struct PriceChartingSource {
    client: ResilientClient,
}

impl PriceChartingSource {
    /// Default client configuration for PriceCharting.
    pub fn config(api_key: impl Into<String>) -> ClientConfig {
        ClientConfig::new(
            SERVICE,
            DEFAULT_BASE_URL,
            AuthScheme::ApiKeyHeader {
                header: "X-API-Key".to_string(),
                key: api_key.into(),
            },
        )
    }

    /// Build the source, registering its breaker in the shared registry.
    pub fn new(config: ClientConfig, registry: &CircuitBreakerRegistry) -> Self {
        Self {
            client: ResilientClient::new(config, registry),
        }
    }

    fn no_usable_price(&self) -> SourceError {
        SourceError::NoUsablePrice {
            service: SERVICE.to_string(),
        }
    }
}

#[async_trait]
impl PriceSource for PriceChartingSource {
    fn id(&self) -> &'static str {
        SERVICE
    }

    fn priority(&self) -> u8 {
        1
    }

    async fn fetch_price(&self, card: &CardQuery) -> Result<PriceQuote, SourceError> {
        let search = self
            .client
            .get_json(
                "/products",
                &[
                    ("q", card.search_text()),
                    ("console", card.game.pricecharting_console().to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let product_id = search["products"]
            .as_array()
            .and_then(|products| products.first())
            .and_then(|product| id_text(&product["id"]))
            .ok_or_else(|| self.no_usable_price())?;

        debug!(product_id = %product_id, card = %card.name, "PriceCharting product resolved");

        let prices = self
            .client
            .get_json(&format!("/product/{product_id}/prices"), &[])
            .await?;

        quote_from_prices(&prices).ok_or_else(|| self.no_usable_price())
    }

    fn health(&self) -> BreakerSnapshot {
        self.client.health_snapshot()
    }
}

/// Product ids arrive as either numbers or strings.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalize a PriceCharting prices payload.
///
/// Market price is the mean of the usable loose/CIB/new tiers; absence of
/// every tier means the payload is unusable.
fn quote_from_prices(data: &Value) -> Option<PriceQuote> {
    let tiers: Vec<Decimal> = ["loose-price", "cib-price", "new-price"]
        .iter()
        .filter_map(|field| parse_price(&data[*field]))
        .collect();

    if tiers.is_empty() {
        return None;
    }

    let market = tiers.iter().sum::<Decimal>() / Decimal::from(tiers.len());
    Some(PriceQuote {
        market_price: market,
        low_price: tiers.iter().min().copied(),
        high_price: tiers.iter().max().copied(),
        mid_price: Some(market),
        currency: "USD".to_string(),
        source_id: SERVICE.to_string(),
        observed_at: Utc::now(),
    })
}
