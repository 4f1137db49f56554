//! Instrument Quote Types
//!
//! Core domain types for reference-rate data: a single instrument's quote,
//! the snapshot produced by one poll cycle, and the upstream payload shape
//! the snapshot is normalized from.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// Types
// =============================================================================

/// An instrument code (uppercase currency or asset ticker, e.g. `USD`).
pub type InstrumentCode = String;

/// Normalize a client- or upstream-supplied code to its canonical form.
#[must_use]
pub fn normalize_code(code: &str) -> InstrumentCode {
    code.trim().to_uppercase()
}

/// Buy/sell rates for one instrument against the USD and INR references.
///
/// Field names on the wire follow the upstream record so cached entries and
/// pushed updates carry the same shape clients already consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentQuote {
    /// Instrument code, unique within a snapshot.
    #[serde(rename = "CurrencyCode")]
    pub code: InstrumentCode,
    /// Buy rate quoted in USD.
    #[serde(rename = "USDBuy")]
    pub usd_buy: Decimal,
    /// Buy rate quoted in INR.
    #[serde(rename = "INRBuy")]
    pub inr_buy: Decimal,
    /// Sell rate quoted in USD.
    #[serde(rename = "USDSell")]
    pub usd_sell: Decimal,
    /// Sell rate quoted in INR.
    #[serde(rename = "INRSell")]
    pub inr_sell: Decimal,
    /// Observation time as reported by the upstream source.
    #[serde(rename = "DateTime")]
    pub observed_at: String,
}

// =============================================================================
// Snapshot
// =============================================================================

/// The ordered set of quotes produced by one successful poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    quotes: Vec<InstrumentQuote>,
    synced_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from already-normalized quotes.
    #[must_use]
    pub const fn new(quotes: Vec<InstrumentQuote>, synced_at: DateTime<Utc>) -> Self {
        Self { quotes, synced_at }
    }

    /// Quotes in upstream order.
    #[must_use]
    pub fn quotes(&self) -> &[InstrumentQuote] {
        &self.quotes
    }

    /// Completion time of the cycle that produced this snapshot.
    #[must_use]
    pub const fn synced_at(&self) -> DateTime<Utc> {
        self.synced_at
    }

    /// Number of quotes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether the snapshot holds no quotes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Quotes restricted to the given codes, in snapshot order.
    #[must_use]
    pub fn filtered(&self, codes: &[&str]) -> Vec<InstrumentQuote> {
        self.quotes
            .iter()
            .filter(|q| codes.contains(&q.code.as_str()))
            .cloned()
            .collect()
    }
}

// =============================================================================
// Upstream Payload
// =============================================================================

/// Body returned by the upstream rate source.
///
/// Only the `detail` container is read; anything else in the body is ignored.
/// Records are decoded one at a time and a malformed record is dropped
/// without rejecting the rest of the body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamPayload {
    /// Quote records, absent when the source has nothing to report.
    #[serde(default, deserialize_with = "lenient_records")]
    pub detail: Option<Vec<InstrumentQuote>>,
}

fn lenient_records<'de, D>(deserializer: D) -> Result<Option<Vec<InstrumentQuote>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(records) = Option::<Vec<Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let quotes = records
        .into_iter()
        .filter_map(|record| {
            let code = record
                .get("CurrencyCode")
                .and_then(Value::as_str)
                .map(str::to_owned);
            match serde_json::from_value::<InstrumentQuote>(record) {
                Ok(quote) => Some(quote),
                Err(e) => {
                    tracing::warn!(?code, error = %e, "Dropping malformed upstream record");
                    None
                }
            }
        })
        .collect();

    Ok(Some(quotes))
}

impl UpstreamPayload {
    /// Normalize the payload into a snapshot stamped with `synced_at`.
    ///
    /// Returns `None` when the container is missing or empty, which callers
    /// treat as a no-op cycle. Codes are upper-cased, blank codes dropped,
    /// and for duplicate codes the first record wins.
    #[must_use]
    pub fn into_snapshot(self, synced_at: DateTime<Utc>) -> Option<Snapshot> {
        let records = self.detail.filter(|d| !d.is_empty())?;

        let mut seen = HashSet::with_capacity(records.len());
        let mut quotes = Vec::with_capacity(records.len());

        for mut quote in records {
            quote.code = normalize_code(&quote.code);
            if quote.code.is_empty() {
                tracing::warn!("Dropping upstream record with blank code");
                continue;
            }
            if !seen.insert(quote.code.clone()) {
                tracing::warn!(code = %quote.code, "Dropping duplicate upstream record");
                continue;
            }
            quotes.push(quote);
        }

        if quotes.is_empty() {
            return None;
        }

        Some(Snapshot::new(quotes, synced_at))
    }
}

// =============================================================================
// Tests
// =============================================================================
