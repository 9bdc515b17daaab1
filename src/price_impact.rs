// 4.0: price impact. two independent power-law models, one for swaps (pool
// token imbalance) and one for positions (open-interest skew). impact is the
// difference of the curve before and after the proposed change, so a trade is
// charged for how much it moves the skew, not for the skew itself.
// helpful trades (skew shrinks) earn the positive factor, harmful trades pay
// the negative factor; crossover trades pay both legs.

use crate::types::{decimal_pow, Amount, Usd};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapImpactParams {
    pub exponent: u32,
    /// Factor applied when the pool imbalance shrinks (rebate).
    pub positive_factor: Decimal,
    /// Factor applied when the pool imbalance grows (penalty).
    pub negative_factor: Decimal,
}

impl Default for SwapImpactParams {
    fn default() -> Self {
        Self {
            exponent: 2,
            positive_factor: dec!(0.0000000005),
            negative_factor: dec!(0.000000001),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionImpactParams {
    pub exponent: u32,
    pub positive_factor: Decimal,
    pub negative_factor: Decimal,
    /// Positive impact may not exceed this fraction of the size delta.
    pub max_positive_factor: Decimal,
    /// Negative impact cap, as a fraction of the size delta.
    pub max_negative_factor: Decimal,
    /// Stricter negative bound used when deciding whether a liquidation-path
    /// close is even allowed.
    pub max_factor_for_liquidations: Decimal,
}

impl Default for PositionImpactParams {
    fn default() -> Self {
        Self {
            exponent: 2,
            positive_factor: dec!(0.0000000005),
            negative_factor: dec!(0.000000001),
            max_positive_factor: dec!(0.005),
            max_negative_factor: dec!(0.01),
            max_factor_for_liquidations: dec!(0.01),
        }
    }
}

/// Core curve: signed impact USD for moving the imbalance from
/// (long0, short0) to (long1, short1). Positive = actor is owed a rebate,
/// negative = actor pays a penalty.
fn impact_for_change(
    exponent: u32,
    positive_factor: Decimal,
    negative_factor: Decimal,
    long0: Decimal,
    short0: Decimal,
    long1: Decimal,
    short1: Decimal,
) -> Usd {
    let d0 = (long0 - short0).abs();
    let d1 = (long1 - short1).abs();

    let same_side = (long0 <= short0) == (long1 <= short1);

    if same_side {
        // impact = factor * (d0^e - d1^e); the factor depends on whether the
        // change helped or hurt the balance.
        let improved = d1 < d0;
        let factor = if improved {
            positive_factor
        } else {
            negative_factor
        };
        Usd::new(factor * (decimal_pow(d0, exponent) - decimal_pow(d1, exponent)))
    } else {
        // crossover: rebate for closing the old skew, penalty for opening the
        // new one on the other side.
        let rebate = positive_factor * decimal_pow(d0, exponent);
        let penalty = negative_factor * decimal_pow(d1, exponent);
        Usd::new(rebate - penalty)
    }
}

pub fn swap_impact_usd(
    params: &SwapImpactParams,
    long_usd_before: Decimal,
    short_usd_before: Decimal,
    long_usd_after: Decimal,
    short_usd_after: Decimal,
) -> Usd {
    impact_for_change(
        params.exponent,
        params.positive_factor,
        params.negative_factor,
        long_usd_before,
        short_usd_before,
        long_usd_after,
        short_usd_after,
    )
}

/// Uncapped position impact for an OI skew change. Callers that must account
/// for the capped-off excess (it becomes claimable collateral on a decrease)
/// take this and apply `cap_position_impact` themselves.
pub fn position_impact_usd_uncapped(
    params: &PositionImpactParams,
    long_before: Decimal,
    short_before: Decimal,
    long_after: Decimal,
    short_after: Decimal,
) -> Usd {
    impact_for_change(
        params.exponent,
        params.positive_factor,
        params.negative_factor,
        long_before,
        short_before,
        long_after,
        short_after,
    )
}

/// Position impact for an OI skew change, capped by the max impact factors
/// (the impact-pool cap is applied later, at settlement).
pub fn position_impact_usd(
    params: &PositionImpactParams,
    long_before: Decimal,
    short_before: Decimal,
    long_after: Decimal,
    short_after: Decimal,
    size_delta_usd: Usd,
) -> Usd {
    let raw = position_impact_usd_uncapped(params, long_before, short_before, long_after, short_after);
    cap_position_impact(params, raw, size_delta_usd)
}

pub fn cap_position_impact(
    params: &PositionImpactParams,
    impact: Usd,
    size_delta_usd: Usd,
) -> Usd {
    if impact.is_positive() {
        impact.min(size_delta_usd.abs().mul(params.max_positive_factor))
    } else {
        impact.max(size_delta_usd.abs().mul(params.max_negative_factor).negate())
    }
}

/// Whether a liquidation-path close is allowed: the negative impact must stay
/// within the liquidation bound or the close is rejected entirely.
pub fn exceeds_liquidation_impact(
    params: &PositionImpactParams,
    impact: Usd,
    size_delta_usd: Usd,
) -> bool {
    impact.is_negative()
        && impact.abs() > size_delta_usd.abs().mul(params.max_factor_for_liquidations)
}

/// Convert an impact USD value into index-token units at the given price.
/// Positive amounts (owed to the trader) round down; negative amounts (owed
/// by the trader) round up in magnitude. Both roundings favor the pool.
pub fn impact_usd_to_tokens(impact: Usd, index_price: Decimal) -> Amount {
    debug_assert!(index_price > Decimal::ZERO);
    let raw = impact.value() / index_price;
    const DP: u32 = 18;
    if raw >= Decimal::ZERO {
        Amount::new(raw.trunc_with_scale(DP))
    } else {
        let truncated = raw.abs().trunc_with_scale(DP);
        let bumped = if truncated < raw.abs() {
            truncated + Decimal::new(1, DP)
        } else {
            truncated
        };
        Amount::new(-bumped)
    }
}
