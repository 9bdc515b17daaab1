// 14.5 engine/liquidations.rs: keeper-driven forced closes. a liquidation is
// the shared decrease path in liquidation mode: no acceptable price, negative
// impact clamped to the liquidation bound, and an insolvent close books its
// shortfall as claimable collateral for the configured holding account.

use super::config::Role;
use super::core::Engine;
use super::positions::{liquidation_check, CloseMode};
use super::results::{EngineError, ExecutionOutcome, LiquidationOutcome};
use crate::events::{ClaimableCollateralCreditedEvent, EventPayload, PositionLiquidatedEvent};
use crate::position::PositionKey;
use crate::prices::PriceContext;
use crate::request::CancelReason;
use crate::types::{AccountId, Amount, TimeBucket};

impl Engine {
    /// Whether the position would pass the solvency check at these prices.
    pub fn is_liquidatable(
        &self,
        key: &PositionKey,
        prices: &PriceContext,
    ) -> Result<bool, EngineError> {
        let market = self.market(key.market)?;
        let position = self.position(key).ok_or(EngineError::PositionNotFound)?;
        let check = liquidation_check(&market.config, &market.pool, position, prices)?;
        Ok(check.is_liquidatable())
    }

    pub fn liquidate(
        &mut self,
        keeper: AccountId,
        key: &PositionKey,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<LiquidationOutcome>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        prices.validate_age(self.time(), self.config.max_price_age_secs)?;
        self.touch_market(key.market, prices)?;

        let market = self.market(key.market)?;
        let position = self.position(key).ok_or(EngineError::PositionNotFound)?;
        let size = position.size_in_usd;
        let check = liquidation_check(&market.config, &market.pool, position, prices)?;
        if !check.is_liquidatable() {
            return Err(EngineError::NotLiquidatable);
        }
        // an insolvent close needs somewhere to book the shortfall. fail
        // closed: leave the position standing rather than leak the loss.
        let holding = self.config.holding_account;
        if check.remaining_collateral_usd.is_negative() && holding.is_none() {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::EmptyHoldingAccount));
        }

        let outcome = self.close_position(
            key,
            size,
            Amount::zero(),
            None,
            prices,
            CloseMode::Liquidation,
        )?;
        let close = match outcome {
            ExecutionOutcome::Executed(close) => close,
            // liquidation mode has no cancel paths
            ExecutionOutcome::Cancelled(_) => return Err(EngineError::NotLiquidatable),
        };

        let shortfall = close.insolvent_shortfall_usd;
        if shortfall.is_positive() {
            let holding = holding.ok_or(EngineError::NoHoldingAccount)?;
            let collateral_price = prices.price(key.collateral_token)?;
            let credit = Amount::new(shortfall.value() / collateral_price.max);
            let bucket = TimeBucket::containing(self.time());
            self.claims
                .add_collateral(key.market, key.collateral_token, bucket, holding, credit);
            self.emit_event(EventPayload::ClaimableCollateralCredited(
                ClaimableCollateralCreditedEvent {
                    market_id: key.market,
                    token: key.collateral_token,
                    account_id: holding,
                    time_bucket: bucket,
                    amount: credit,
                },
            ));
        }

        self.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            key: key.clone(),
            size_in_usd: size,
            remaining_collateral_usd: close.remaining_collateral_usd,
            insolvent_shortfall_usd: shortfall,
        }));

        Ok(ExecutionOutcome::Executed(LiquidationOutcome {
            market: key.market,
            account: key.account,
            size_liquidated_usd: size,
            remaining_collateral_usd: close.remaining_collateral_usd,
            insolvent_shortfall_usd: shortfall,
        }))
    }
}
