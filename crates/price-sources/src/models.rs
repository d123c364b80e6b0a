//! Domain types shared across the price source layer.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trading card games the sources understand.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Game {
    Pokemon,
    OnePiece,
    Magic,
    YuGiOh,
    Lorcana,
    Digimon,
}

impl Game {
    /// Game code used by the JustTCG API.
    pub fn justtcg_code(&self) -> &'static str {
        match self {
            Self::Pokemon => "pokemon",
            Self::OnePiece => "onepiece",
            Self::Magic => "magic",
            Self::YuGiOh => "yugioh",
            Self::Lorcana => "lorcana",
            Self::Digimon => "digimon",
        }
    }

    /// Console identifier used by the PriceCharting API.
    pub fn pricecharting_console(&self) -> &'static str {
        match self {
            Self::Pokemon => "pokemon-cards",
            Self::OnePiece => "one-piece-cards",
            Self::Magic => "magic-cards",
            Self::YuGiOh => "yugioh-cards",
            Self::Lorcana => "lorcana-cards",
            Self::Digimon => "digimon-cards",
        }
    }
}

/// Identity of the card whose price is being fetched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardQuery {
    /// Card name, used as the search query against each source.
    pub name: String,
    /// Set name, when known; narrows the search.
    pub set_name: Option<String>,
    /// Which game the card belongs to.
    pub game: Game,
}

impl CardQuery {
    /// Query for a card by name.
    pub fn new(name: impl Into<String>, game: Game) -> Self {
        Self {
            name: name.into(),
            set_name: None,
            game,
        }
    }

    /// Search text: name plus set name when present.
    pub fn search_text(&self) -> String {
        match &self.set_name {
            Some(set) => format!("{} {}", self.name, set),
            None => self.name.clone(),
        }
    }
}

/// Normalized price quote from one source.
///
/// `market_price` is required: a payload without a usable market price is
/// a failure, never a quote. A quote never mixes fields from two sources.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Current market price.
    pub market_price: Decimal,
    /// Low end of the observed price range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_price: Option<Decimal>,
    /// High end of the observed price range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_price: Option<Decimal>,
    /// Mid-point price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid_price: Option<Decimal>,
    /// Quote currency (ISO 4217).
    pub currency: String,
    /// Source that produced the quote.
    pub source_id: String,
    /// When the quote was fetched.
    pub observed_at: DateTime<Utc>,
}

impl PriceQuote {
    /// Create a quote with only the required fields.
    pub fn new(market_price: Decimal, source_id: impl Into<String>) -> Self {
        Self {
            market_price,
            low_price: None,
            high_price: None,
            mid_price: None,
            currency: "USD".to_string(),
            source_id: source_id.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Sanity ceiling for a single card price.
fn max_card_price() -> Decimal {
    Decimal::from(100_000)
}

/// Parse a price out of a JSON value with sanity validation.
///
/// Accepts numbers and strings like `"$1,234.56"`. Negative, zero, and
/// implausibly high values are rejected.
pub fn parse_price(value: &Value) -> Option<Decimal> {
    let price = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(s) => {
            let cleaned = s.replace(['$', ','], "");
            let cleaned = cleaned.trim();
            if cleaned.is_empty() || cleaned == "N/A" {
                None
            } else {
                cleaned.parse::<Decimal>().ok()
            }
        }
        _ => None,
    }?;

    if price <= Decimal::ZERO || price > max_card_price() {
        return None;
    }
    Some(price)
}
