//! TCGplayer price source.
//!
//! Authenticates with an OAuth2 client-credentials bearer token, resolves
//! the card through `/catalog/products`, then reads market pricing from
//! `/pricing/product/{id}`. A product can carry one pricing entry per
//! printing; the first entry with a usable market price wins.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry};
use crate::client::{AuthScheme, ClientConfig, ResilientClient};
use crate::errors::SourceError;
use crate::models::{parse_price, CardQuery, PriceQuote};
use crate::sources::PriceSource;

const DEFAULT_BASE_URL: &str = "https://api.tcgplayer.com";

/// Service key for the rate limiter and circuit breaker.
pub const SERVICE: &str = "tcgplayer";

/// TCGplayer data source. Last in the default chain.
pub struct TcgPlayerSource {
    client: ResilientClient,
}

impl TcgPlayerSource {
    /// Default client configuration for TCGplayer.
    ///
    /// The token endpoint lives at the API root, not under a version
    /// prefix.
    pub fn config(client_id: impl Into<String>, client_secret: impl Into<String>) -> ClientConfig {
        Self::config_at(DEFAULT_BASE_URL, client_id, client_secret)
    }

    /// Configuration against an explicit base URL.
    pub fn config_at(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> ClientConfig {
        let base = base_url.trim_end_matches('/');
        ClientConfig::new(
            SERVICE,
            base,
            AuthScheme::ClientCredentials {
                token_url: format!("{base}/token"),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
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
impl PriceSource for TcgPlayerSource {
    fn id(&self) -> &'static str {
        SERVICE
    }

    fn priority(&self) -> u8 {
        3
    }

    async fn fetch_price(&self, card: &CardQuery) -> Result<PriceQuote, SourceError> {
        let search = self
            .client
            .get_json(
                "/catalog/products",
                &[
                    ("productName", card.search_text()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let product_id = search["results"]
            .as_array()
            .and_then(|results| results.first())
            .and_then(|product| product["productId"].as_i64())
            .ok_or_else(|| self.no_usable_price())?;

        debug!(product_id, card = %card.name, "TCGplayer product resolved");

        let pricing = self
            .client
            .get_json(&format!("/pricing/product/{product_id}"), &[])
            .await?;

        quote_from_results(&pricing).ok_or_else(|| self.no_usable_price())
    }

    fn health(&self) -> BreakerSnapshot {
        self.client.health_snapshot()
    }
}

/// Normalize a TCGplayer pricing payload.
///
/// The payload holds one result per printing (Normal, Foil, ...); the
/// first entry with a usable market price is taken.
fn quote_from_results(data: &Value) -> Option<PriceQuote> {
    let results = data["results"].as_array()?;
    results.iter().find_map(|entry| {
        let market = parse_price(&entry["marketPrice"])?;
        Some(PriceQuote {
            market_price: market,
            low_price: parse_price(&entry["lowPrice"]),
            high_price: parse_price(&entry["highPrice"]),
            mid_price: parse_price(&entry["midPrice"]),
            currency: "USD".to_string(),
            source_id: SERVICE.to_string(),
            observed_at: Utc::now(),
        })
    })
}
