// 9.0: insolvency detection. a position is liquidatable when its collateral,
// net of pending costs, losses and the liquidation-path price impact, falls
// below the margin floor. the forced close itself goes through the normal
// decrease path (engine/liquidations.rs).

use crate::price_impact::{exceeds_liquidation_impact, PositionImpactParams};
use crate::types::Usd;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationParams {
    /// Minimum remaining collateral as a fraction of position size.
    pub min_collateral_factor: Decimal,
    /// Absolute USD floor on remaining collateral.
    pub min_collateral_usd: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            min_collateral_factor: dec!(0.01),
            min_collateral_usd: dec!(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationReason {
    /// Remaining collateral below min_collateral_factor * size.
    MinCollateralFactor,
    /// Remaining collateral below the absolute USD floor.
    MinCollateralUsd,
    /// Liquidation-path price impact exceeds the configured max.
    ExcessiveImpact,
}

#[derive(Debug, Clone, Copy)]
pub struct LiquidationCheck {
    pub reason: Option<LiquidationReason>,
    /// Collateral left after costs, losses and negative impact.
    pub remaining_collateral_usd: Usd,
}

impl LiquidationCheck {
    pub fn is_liquidatable(&self) -> bool {
        self.reason.is_some()
    }
}

/// Pure solvency check over already-computed components. `pending_costs_usd`
/// is funding + borrowing + the close fee; `impact_usd` is the price impact a
/// full close would incur right now (only losses count against margin).
pub fn check_liquidatable(
    params: &LiquidationParams,
    impact_params: &PositionImpactParams,
    size_in_usd: Usd,
    collateral_usd: Usd,
    pnl_usd: Usd,
    pending_costs_usd: Usd,
    impact_usd: Usd,
) -> LiquidationCheck {
    let impact_loss = if impact_usd.is_negative() {
        impact_usd
    } else {
        Usd::zero()
    };
    let loss = if pnl_usd.is_negative() { pnl_usd } else { Usd::zero() };
    let remaining = collateral_usd
        .add(loss)
        .add(impact_loss)
        .sub(pending_costs_usd);

    let reason = if exceeds_liquidation_impact(impact_params, impact_usd, size_in_usd) {
        Some(LiquidationReason::ExcessiveImpact)
    } else if remaining < size_in_usd.mul(params.min_collateral_factor) {
        Some(LiquidationReason::MinCollateralFactor)
    } else if remaining.value() < params.min_collateral_usd {
        Some(LiquidationReason::MinCollateralUsd)
    } else {
        None
    };

    LiquidationCheck {
        reason,
        remaining_collateral_usd: remaining,
    }
}
