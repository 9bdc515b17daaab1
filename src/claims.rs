// 10.0: deferred payout ledgers. when a payout cannot be made at settlement
// time (insolvent close, illiquid payout token, funding owed to the other
// side) the amount is parked here and released only by an explicit second
// claim. claims are deliberately not atomic with the triggering event, so a
// failed best-effort payout never blocks the primary operation.

use crate::types::{AccountId, Amount, MarketId, TimeBucket, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClaimableCollateralEntry {
    pub amount: Amount,
    pub claimed: Amount,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClaimError {
    #[error("Claimable factor {0} exceeds 1")]
    FactorExceedsOne(Decimal),

    #[error("Nothing to claim")]
    NothingToClaim,
}

/// Both claim ledgers. Collateral claims are bucketed by the hour the
/// shortfall happened in and gated by a per-bucket factor that governance
/// raises from 0 to (at most) 1 after review; funding claims are released in
/// full on request.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClaimLedger {
    collateral: HashMap<(MarketId, TokenId, TimeBucket, AccountId), ClaimableCollateralEntry>,
    collateral_factors: HashMap<(MarketId, TokenId, TimeBucket), Decimal>,
    funding: HashMap<(MarketId, TokenId, AccountId), Amount>,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collateral(
        &mut self,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
        account: AccountId,
        amount: Amount,
    ) {
        if !amount.is_positive() {
            return;
        }
        let entry = self
            .collateral
            .entry((market, token, bucket, account))
            .or_default();
        entry.amount = entry.amount.add(amount);
    }

    pub fn collateral_entry(
        &self,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
        account: AccountId,
    ) -> ClaimableCollateralEntry {
        self.collateral
            .get(&(market, token, bucket, account))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_collateral_factor(
        &mut self,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
        factor: Decimal,
    ) -> Result<(), ClaimError> {
        if factor > Decimal::ONE {
            return Err(ClaimError::FactorExceedsOne(factor));
        }
        self.collateral_factors.insert((market, token, bucket), factor);
        Ok(())
    }

    pub fn collateral_factor(
        &self,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
    ) -> Decimal {
        self.collateral_factors
            .get(&(market, token, bucket))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Release amount * factor minus whatever was already claimed. The factor
    /// starts at 0, so newly credited buckets pay nothing until governance
    /// raises it.
    pub fn claim_collateral(
        &mut self,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
        account: AccountId,
    ) -> Result<Amount, ClaimError> {
        let factor = self.collateral_factor(market, token, bucket);
        let entry = self
            .collateral
            .get_mut(&(market, token, bucket, account))
            .ok_or(ClaimError::NothingToClaim)?;

        let allowed = entry.amount.mul(factor);
        let payout = allowed.sub(entry.claimed);
        if !payout.is_positive() {
            return Err(ClaimError::NothingToClaim);
        }
        entry.claimed = entry.claimed.add(payout);
        Ok(payout)
    }

    pub fn add_funding(
        &mut self,
        market: MarketId,
        token: TokenId,
        account: AccountId,
        amount: Amount,
    ) {
        if !amount.is_positive() {
            return;
        }
        let entry = self
            .funding
            .entry((market, token, account))
            .or_insert_with(Amount::zero);
        *entry = entry.add(amount);
    }

    pub fn claimable_funding(
        &self,
        market: MarketId,
        token: TokenId,
        account: AccountId,
    ) -> Amount {
        self.funding
            .get(&(market, token, account))
            .copied()
            .unwrap_or_else(Amount::zero)
    }

    pub fn claim_funding(
        &mut self,
        market: MarketId,
        token: TokenId,
        account: AccountId,
    ) -> Result<Amount, ClaimError> {
        let amount = self
            .funding
            .remove(&(market, token, account))
            .ok_or(ClaimError::NothingToClaim)?;
        if !amount.is_positive() {
            return Err(ClaimError::NothingToClaim);
        }
        Ok(amount)
    }
}
