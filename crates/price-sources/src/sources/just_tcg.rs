//! JustTCG price source.
//!
//! Searches `/cards/search` scoped to the card's game, then reads the
//! near-mint price entry from `/prices/batch`. JustTCG reports
//! market/low/mid/high directly.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry};
use crate::client::{AuthScheme, ClientConfig, ResilientClient};
use crate::errors::SourceError;
use crate::limiter::RateLimitConfig;
use crate::models::{parse_price, CardQuery, PriceQuote};
use crate::sources::PriceSource;

const DEFAULT_BASE_URL: &str = "https://api.justtcg.com/v1";

/// Service key for the rate limiter and circuit breaker.
pub const SERVICE: &str = "justtcg";

/// JustTCG data source. Fallback behind PriceCharting.
pub struct JustTcgSource {
    client: ResilientClient,
}

impl JustTcgSource {
    /// Default client configuration for JustTCG.
    ///
    /// The free tier allows roughly 100 requests per day, so the default
    /// quota is deliberately conservative and hour-capped.
    pub fn config(api_key: impl Into<String>) -> ClientConfig {
        let mut config = ClientConfig::new(
            SERVICE,
            DEFAULT_BASE_URL,
            AuthScheme::ApiKeyHeader {
                header: "X-API-Key".to_string(),
                key: api_key.into(),
            },
        );
        config.rate_limit = RateLimitConfig {
            requests_per_minute: 10,
            requests_per_hour: Some(60),
        };
        config
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
impl PriceSource for JustTcgSource {
    fn id(&self) -> &'static str {
        SERVICE
    }

    fn priority(&self) -> u8 {
        2
    }

    async fn fetch_price(&self, card: &CardQuery) -> Result<PriceQuote, SourceError> {
        let game = card.game.justtcg_code();
        let search = self
            .client
            .get_json(
                "/cards/search",
                &[
                    ("q", card.search_text()),
                    ("game", game.to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let card_id = search["data"]
            .as_array()
            .and_then(|cards| cards.first())
            .and_then(|c| c["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| self.no_usable_price())?;

        debug!(card_id = %card_id, card = %card.name, "JustTCG card resolved");

        let prices = self
            .client
            .get_json(
                "/prices/batch",
                &[
                    ("ids", card_id),
                    ("game", game.to_string()),
                    ("condition", "nm".to_string()),
                ],
            )
            .await?;

        prices["data"]
            .as_array()
            .and_then(|entries| entries.first())
            .and_then(quote_from_entry)
            .ok_or_else(|| self.no_usable_price())
    }

    fn health(&self) -> BreakerSnapshot {
        self.client.health_snapshot()
    }
}

/// Normalize one JustTCG price entry. Requires a usable market price.
fn quote_from_entry(entry: &Value) -> Option<PriceQuote> {
    let market = parse_price(&entry["market_price"])?;
    Some(PriceQuote {
        market_price: market,
        low_price: parse_price(&entry["low_price"]),
        high_price: parse_price(&entry["high_price"]),
        mid_price: parse_price(&entry["mid_price"]),
        currency: "USD".to_string(),
        source_id: SERVICE.to_string(),
        observed_at: Utc::now(),
    })
}
