// 8.0: position record. created on the first increase from zero size, mutated
// on every increase/decrease/liquidation, removed when sizeInUsd reaches 0.
// orchestration (fees, impact, payouts) lives in engine/positions.rs; this
// module is the struct plus the pure per-position math.

use crate::pnl::position_pnl_usd;
use crate::types::{AccountId, Amount, MarketId, Side, Timestamp, TokenId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity of a position: one per (account, market, collateral token, side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub account: AccountId,
    pub market: MarketId,
    pub collateral_token: TokenId,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub key: PositionKey,
    pub size_in_usd: Usd,
    pub size_in_tokens: Amount,
    pub collateral_amount: Amount,
    /// Cumulative borrowing factor at last settlement.
    pub borrowing_factor: Decimal,
    /// Funding paid-per-size accumulator at last settlement.
    pub funding_fee_per_size: Decimal,
    /// Funding received-per-size accumulator at last settlement.
    pub claimable_funding_per_size: Decimal,
    /// Price impact owed to this position, in index tokens, not yet realized
    /// into the shared pool. Settled proportionally on decrease.
    pub pending_impact_amount: Amount,
    pub increased_at: Timestamp,
    pub decreased_at: Timestamp,
}

impl Position {
    pub fn open(
        key: PositionKey,
        borrowing_factor: Decimal,
        funding_fee_per_size: Decimal,
        claimable_funding_per_size: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key,
            size_in_usd: Usd::zero(),
            size_in_tokens: Amount::zero(),
            collateral_amount: Amount::zero(),
            borrowing_factor,
            funding_fee_per_size,
            claimable_funding_per_size,
            pending_impact_amount: Amount::zero(),
            increased_at: timestamp,
            decreased_at: timestamp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size_in_usd.is_zero()
    }

    pub fn side(&self) -> Side {
        self.key.side
    }

    /// Average entry price implied by the stored sizes.
    pub fn entry_price(&self) -> Option<Decimal> {
        if self.size_in_tokens.is_zero() {
            None
        } else {
            Some(self.size_in_usd.value() / self.size_in_tokens.value())
        }
    }

    pub fn pnl_usd(&self, index_price: Decimal) -> Usd {
        position_pnl_usd(self.size_in_usd, self.size_in_tokens, self.side(), index_price)
    }

    pub fn collateral_usd(&self, collateral_price: Decimal) -> Usd {
        Usd::new(self.collateral_amount.value() * collateral_price)
    }

    /// Leverage implied by current size and collateral value.
    pub fn leverage(&self, collateral_price: Decimal) -> Option<Decimal> {
        let collateral = self.collateral_usd(collateral_price);
        if collateral.is_positive() {
            Some(self.size_in_usd.value() / collateral.value())
        } else {
            None
        }
    }

    pub fn apply_increase(
        &mut self,
        size_delta_usd: Usd,
        size_delta_tokens: Amount,
        collateral_delta: Amount,
        timestamp: Timestamp,
    ) {
        self.size_in_usd = self.size_in_usd.add(size_delta_usd);
        self.size_in_tokens = self.size_in_tokens.add(size_delta_tokens);
        self.collateral_amount = self.collateral_amount.add(collateral_delta);
        self.increased_at = timestamp;
    }

    /// Fraction of the position a decrease of `size_delta_usd` closes, in [0,1].
    pub fn close_fraction(&self, size_delta_usd: Usd) -> Decimal {
        if self.size_in_usd.is_zero() {
            return Decimal::ZERO;
        }
        (size_delta_usd.value() / self.size_in_usd.value())
            .min(Decimal::ONE)
            .max(Decimal::ZERO)
    }

    /// Token size closed by a USD size delta, proportional to stored sizes so
    /// the implied entry price is preserved for the remainder.
    pub fn tokens_for_decrease(&self, size_delta_usd: Usd) -> Amount {
        self.size_in_tokens.mul(self.close_fraction(size_delta_usd))
    }

    /// Pending impact settled by this decrease, proportional to size closed.
    pub fn pending_impact_for_decrease(&self, size_delta_usd: Usd) -> Amount {
        self.pending_impact_amount.mul(self.close_fraction(size_delta_usd))
    }

    pub fn apply_decrease(
        &mut self,
        size_delta_usd: Usd,
        size_delta_tokens: Amount,
        collateral_delta: Amount,
        settled_impact: Amount,
        timestamp: Timestamp,
    ) {
        self.size_in_usd = self.size_in_usd.sub(size_delta_usd);
        self.size_in_tokens = self.size_in_tokens.sub(size_delta_tokens);
        self.collateral_amount = self.collateral_amount.sub(collateral_delta);
        self.pending_impact_amount = self.pending_impact_amount.sub(settled_impact);
        self.decreased_at = timestamp;

        if self.size_in_usd.is_zero() {
            // full close zeroes everything; the ledger removes the record
            self.size_in_tokens = Amount::zero();
            self.pending_impact_amount = Amount::zero();
        }
    }
}
