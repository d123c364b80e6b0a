//! Price sources and the fallback orchestrator.
//!
//! A [`PriceSource`] wraps one provider behind its own resilient client.
//! The [`SourceChain`] tries sources in priority order and returns the
//! first usable quote; a single source's failure never aborts the chain.

pub mod attempts;
pub mod just_tcg;
pub mod price_charting;
pub mod tcg_player;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};

use crate::breaker::BreakerSnapshot;
use crate::errors::SourceError;
use crate::models::{CardQuery, PriceQuote};

use attempts::SourceFailure;

/// One external price data source.
///
/// Implementations fetch through their own [`ResilientClient`] and
/// normalize the provider payload into a [`PriceQuote`]. A payload with
/// no usable market price must surface as
/// [`SourceError::NoUsablePrice`], never as a quote.
///
/// [`ResilientClient`]: crate::client::ResilientClient
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Unique source identifier, e.g. `"pricecharting"`.
    fn id(&self) -> &'static str;

    /// Priority for chain ordering. Lower values are tried first.
    fn priority(&self) -> u8 {
        10
    }

    /// Fetch and normalize a price for the given card.
    async fn fetch_price(&self, card: &CardQuery) -> Result<PriceQuote, SourceError>;

    /// Breaker state for health reporting.
    fn health(&self) -> BreakerSnapshot;
}

/// Result of the concurrent all-sources fetch.
///
/// Partial success is a valid terminal outcome: some sources may have
/// quotes while others are recorded as failures.
#[derive(Debug, Default)]
pub struct AllSourcesOutcome {
    /// Quotes from every source that succeeded, in priority order.
    pub quotes: Vec<PriceQuote>,
    /// Per-source failures, kind preserved.
    pub failures: Vec<SourceFailure>,
}

/// Ordered fallback chain over multiple price sources.
pub struct SourceChain {
    sources: Vec<Arc<dyn PriceSource>>,
}

impl SourceChain {
    /// Build a chain; sources are ordered by [`PriceSource::priority`].
    pub fn new(mut sources: Vec<Arc<dyn PriceSource>>) -> Self {
        sources.sort_by_key(|s| s.priority());
        Self { sources }
    }

    /// The sources in the order they are tried.
    pub fn sources(&self) -> &[Arc<dyn PriceSource>] {
        &self.sources
    }

    /// Fetch a price, falling back through the chain.
    ///
    /// Every per-source failure - auth rejection, exhausted retries, open
    /// circuit, unusable payload - is logged and recorded, and the next
    /// source is tried. Only when every source has failed does the chain
    /// return [`SourceError::AllSourcesFailed`] with one record per
    /// source.
    pub async fn fetch_price(&self, card: &CardQuery) -> Result<PriceQuote, SourceError> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.fetch_price(card).await {
                Ok(quote) => {
                    info!(
                        "Got price for '{}' from '{}': {}",
                        card.name, quote.source_id, quote.market_price
                    );
                    return Ok(quote);
                }
                Err(err) => {
                    warn!(
                        "Source '{}' failed for '{}', trying next: {}",
                        source.id(),
                        card.name,
                        err
                    );
                    failures.push(SourceFailure::from_error(source.id(), &err));
                }
            }
        }

        warn!(
            "All sources failed for '{}': {}",
            card.name,
            SourceFailure::summary(&failures)
        );
        Err(SourceError::AllSourcesFailed { failures })
    }

    /// Fetch from every source concurrently under one wall-clock deadline.
    ///
    /// A source that fails or exceeds the deadline is recorded as a
    /// per-source failure without cancelling its siblings.
    pub async fn fetch_all(&self, card: &CardQuery, deadline: Duration) -> AllSourcesOutcome {
        let fetches = self.sources.iter().map(|source| async move {
            match tokio::time::timeout(deadline, source.fetch_price(card)).await {
                Ok(Ok(quote)) => Ok(quote),
                Ok(Err(err)) => Err(SourceFailure::from_error(source.id(), &err)),
                Err(_) => {
                    warn!(
                        "Source '{}' exceeded the {:?} deadline for '{}'",
                        source.id(),
                        deadline,
                        card.name
                    );
                    Err(SourceFailure::deadline_exceeded(source.id()))
                }
            }
        });

        let mut outcome = AllSourcesOutcome::default();
        for result in join_all(fetches).await {
            match result {
                Ok(quote) => outcome.quotes.push(quote),
                Err(failure) => outcome.failures.push(failure),
            }
        }
        outcome
    }

    /// Breaker snapshots for every source.
    pub fn health(&self) -> Vec<BreakerSnapshot> {
        self.sources.iter().map(|s| s.health()).collect()
    }
}
