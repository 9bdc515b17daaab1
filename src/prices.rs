// 2.0: price context supplied per execute call. the engine is agnostic to where
// prices come from (aggregation and signing happen before the engine is entered);
// it only cares that every referenced token has a min/max pair and that the
// context is fresh enough for the request being executed.

use crate::types::{Timestamp, TokenId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Min/max price for one token. The spread is the oracle's bid/ask or
/// confidence band; the engine always picks the side that is conservative
/// for the actor: a receiver is valued at min, a payer owes at max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub min: Decimal,
    pub max: Decimal,
}

impl Price {
    #[must_use]
    pub fn new(min: Decimal, max: Decimal) -> Option<Self> {
        if min > Decimal::ZERO && max >= min {
            Some(Self { min, max })
        } else {
            None
        }
    }

    pub fn exact(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self {
            min: value,
            max: value,
        }
    }

    pub fn pick(&self, maximize: bool) -> Decimal {
        if maximize {
            self.max
        } else {
            self.min
        }
    }

    // value credited to a user: conservative side is min
    pub fn for_receiver(&self) -> Decimal {
        self.min
    }

    // value owed by a user: conservative side is max
    pub fn for_payer(&self) -> Decimal {
        self.max
    }

    pub fn mid(&self) -> Decimal {
        (self.min + self.max) / Decimal::TWO
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PriceError {
    #[error("No price for token {0:?}")]
    MissingPrice(TokenId),

    #[error("Price context is stale: observed at {observed_at:?}, now {now:?}, max age {max_age_secs}s")]
    StaleContext {
        observed_at: Timestamp,
        now: Timestamp,
        max_age_secs: i64,
    },
}

/// Immutable snapshot of token prices passed into every execute call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceContext {
    prices: HashMap<TokenId, Price>,
    pub observed_at: Timestamp,
}

impl PriceContext {
    pub fn new(observed_at: Timestamp) -> Self {
        Self {
            prices: HashMap::new(),
            observed_at,
        }
    }

    pub fn with_price(mut self, token: TokenId, price: Price) -> Self {
        self.prices.insert(token, price);
        self
    }

    pub fn set_price(&mut self, token: TokenId, price: Price) {
        self.prices.insert(token, price);
    }

    pub fn price(&self, token: TokenId) -> Result<Price, PriceError> {
        self.prices
            .get(&token)
            .copied()
            .ok_or(PriceError::MissingPrice(token))
    }

    /// Execution requires the context to fall inside the recency window.
    /// Stale contexts are rejected outright, never deferred.
    pub fn validate_age(&self, now: Timestamp, max_age_secs: i64) -> Result<(), PriceError> {
        let age = now.as_secs() - self.observed_at.as_secs();
        if age < 0 || age > max_age_secs {
            return Err(PriceError::StaleContext {
                observed_at: self.observed_at,
                now,
                max_age_secs,
            });
        }
        Ok(())
    }

    pub fn usd_value(&self, token: TokenId, amount: Decimal, maximize: bool) -> Result<Usd, PriceError> {
        let price = self.price(token)?;
        Ok(Usd::new(amount * price.pick(maximize)))
    }
}
