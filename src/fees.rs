// 5.0: fee math. borrowing fees accrue against a per-market cumulative factor
// (utilization-priced, integrated over elapsed time); position and swap fees
// are flat factors on the traded notional, split between the pool and the
// protocol fee bucket. funding fees are separate, see funding.rs.

use crate::types::{decimal_pow, Side, Usd};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeParams {
    /// Fraction of size delta USD charged on every increase/decrease.
    pub position_fee_factor: Decimal,
    /// Fraction of swap USD charged on deposits/withdrawals.
    pub swap_fee_factor: Decimal,
    /// Protocol's cut of every fee; remainder stays in the pool.
    pub fee_receiver_factor: Decimal,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            position_fee_factor: dec!(0.0005),
            swap_fee_factor: dec!(0.0007),
            fee_receiver_factor: dec!(0.37),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowingParams {
    pub factor_long: Decimal,
    pub factor_short: Decimal,
    pub exponent: u32,
}

impl Default for BorrowingParams {
    fn default() -> Self {
        Self {
            factor_long: dec!(0.0000000063),
            factor_short: dec!(0.0000000063),
            exponent: 1,
        }
    }
}

impl BorrowingParams {
    pub fn factor(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.factor_long,
            Side::Short => self.factor_short,
        }
    }
}

/// factor * reservedUsd^exponent / poolUsd, per second. Zero when nothing is
/// reserved or the pool is empty.
pub fn borrowing_factor_per_second(
    params: &BorrowingParams,
    side: Side,
    reserved_usd: Usd,
    pool_usd: Usd,
) -> Decimal {
    if !reserved_usd.is_positive() || !pool_usd.is_positive() {
        return Decimal::ZERO;
    }
    params.factor(side) * decimal_pow(reserved_usd.value(), params.exponent) / pool_usd.value()
}

/// Integrate the per-second rate over elapsed seconds onto the market's
/// cumulative borrowing factor.
pub fn next_cumulative_borrowing_factor(
    current: Decimal,
    factor_per_second: Decimal,
    elapsed_secs: Decimal,
) -> Decimal {
    current + factor_per_second * elapsed_secs
}

/// Pending fee for one position: (cumulative - snapshot) * sizeInUsd.
pub fn pending_borrowing_fee_usd(
    cumulative_factor: Decimal,
    position_snapshot: Decimal,
    size_in_usd: Usd,
) -> Usd {
    let delta = cumulative_factor - position_snapshot;
    debug_assert!(delta >= Decimal::ZERO, "cumulative factor regressed");
    size_in_usd.mul(delta)
}

pub fn position_fee_usd(params: &FeeParams, size_delta_usd: Usd) -> Usd {
    size_delta_usd.abs().mul(params.position_fee_factor)
}

pub fn swap_fee_usd(params: &FeeParams, swap_usd: Usd) -> Usd {
    swap_usd.abs().mul(params.swap_fee_factor)
}

/// Split a fee into (pool share, protocol share).
pub fn split_fee(params: &FeeParams, fee: Usd) -> (Usd, Usd) {
    let protocol = fee.mul(params.fee_receiver_factor);
    (fee.sub(protocol), protocol)
}
