//! Constructed price service owning the source chain and breaker registry.
//!
//! All resilience state lives here rather than in globals: callers build a
//! [`PriceService`] from per-source settings and share it behind an `Arc`.
//! Sources without credentials are simply left out of the chain.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry};
use crate::errors::SourceError;
use crate::models::{CardQuery, PriceQuote};
use crate::sources::just_tcg::JustTcgSource;
use crate::sources::price_charting::PriceChartingSource;
use crate::sources::tcg_player::TcgPlayerSource;
use crate::sources::{AllSourcesOutcome, PriceSource, SourceChain};

/// Settings for an API-key authenticated source.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiKeySettings {
    /// API key for the source.
    pub api_key: String,
    /// Override for the source's base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Override for the per-minute request quota.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

/// Settings for an OAuth client-credentials source.
#[derive(Clone, Debug, Deserialize)]
pub struct OAuthSettings {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Override for the source's base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Override for the per-minute request quota.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

/// Per-source settings for the service. Each source is optional; a source
/// with no settings is not added to the chain.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub price_charting: Option<ApiKeySettings>,
    #[serde(default)]
    pub just_tcg: Option<ApiKeySettings>,
    #[serde(default)]
    pub tcg_player: Option<OAuthSettings>,
}

/// Deadline applied to each source during the concurrent all-sources fetch.
pub const DEFAULT_FETCH_ALL_DEADLINE: Duration = Duration::from_secs(45);

/// Price fetching facade over the configured source chain.
pub struct PriceService {
    registry: Arc<CircuitBreakerRegistry>,
    chain: SourceChain,
}

impl PriceService {
    /// Build the service from per-source settings.
    pub fn new(settings: ServiceSettings) -> Self {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let mut sources: Vec<Arc<dyn PriceSource>> = Vec::new();

        if let Some(s) = &settings.price_charting {
            let mut config = PriceChartingSource::config(&s.api_key);
            if let Some(url) = &s.base_url {
                config.base_url = url.clone();
            }
            if let Some(rpm) = s.requests_per_minute {
                config.rate_limit.requests_per_minute = rpm;
            }
            sources.push(Arc::new(PriceChartingSource::new(config, &registry)));
        }

        if let Some(s) = &settings.just_tcg {
            let mut config = JustTcgSource::config(&s.api_key);
            if let Some(url) = &s.base_url {
                config.base_url = url.clone();
            }
            if let Some(rpm) = s.requests_per_minute {
                config.rate_limit.requests_per_minute = rpm;
            }
            sources.push(Arc::new(JustTcgSource::new(config, &registry)));
        }

        if let Some(s) = &settings.tcg_player {
            let mut config = match &s.base_url {
                Some(url) => TcgPlayerSource::config_at(url, &s.client_id, &s.client_secret),
                None => TcgPlayerSource::config(&s.client_id, &s.client_secret),
            };
            if let Some(rpm) = s.requests_per_minute {
                config.rate_limit.requests_per_minute = rpm;
            }
            sources.push(Arc::new(TcgPlayerSource::new(config, &registry)));
        }

        Self::from_sources(registry, sources)
    }

    /// Build the service from already constructed sources.
    pub fn from_sources(
        registry: Arc<CircuitBreakerRegistry>,
        sources: Vec<Arc<dyn PriceSource>>,
    ) -> Self {
        let chain = SourceChain::new(sources);
        info!(
            "Price service ready with {} source(s): {}",
            chain.sources().len(),
            chain
                .sources()
                .iter()
                .map(|s| s.id())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self { registry, chain }
    }

    /// Fetch one price, falling back through the chain.
    pub async fn fetch_price(&self, card: &CardQuery) -> Result<PriceQuote, SourceError> {
        self.chain.fetch_price(card).await
    }

    /// Fetch from every source concurrently with the default deadline.
    pub async fn fetch_all(&self, card: &CardQuery) -> AllSourcesOutcome {
        self.fetch_all_within(card, DEFAULT_FETCH_ALL_DEADLINE).await
    }

    /// Fetch from every source concurrently under an explicit deadline.
    pub async fn fetch_all_within(&self, card: &CardQuery, deadline: Duration) -> AllSourcesOutcome {
        self.chain.fetch_all(card, deadline).await
    }

    /// Breaker snapshot for every source, for health reporting.
    pub fn health(&self) -> Vec<BreakerSnapshot> {
        self.chain.health()
    }

    /// Close every breaker and clear its counters.
    pub fn reset_breakers(&self) {
        self.registry.reset_all();
    }

    /// Shared breaker registry.
    pub fn breaker_registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    /// The configured sources in fetch order.
    pub fn source_ids(&self) -> Vec<&'static str> {
        self.chain.sources().iter().map(|s| s.id()).collect()
    }
}
