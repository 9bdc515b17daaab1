// 14.4 engine/positions.rs: position increase/decrease execution. all the
// math runs on local clones of the pool and position; state is written back
// only when every check has passed, so a cancelled execution leaves no trace
// beyond the cancellation event.

use rust_decimal::Decimal;

use super::config::Role;
use super::core::Engine;
use super::results::{
    DecreaseResult, EngineError, ExecutionOutcome, IncreaseResult, PositionInfo, PositionOutcome,
};
use crate::events::{
    ClaimableCollateralCreditedEvent, ClaimableFundingCreditedEvent, EventPayload,
    PositionDecreasedEvent, PositionIncreasedEvent,
};
use crate::fees::{pending_borrowing_fee_usd, position_fee_usd, split_fee};
use crate::funding::{position_claimable_funding_usd, position_funding_fee_usd};
use crate::liquidation::{check_liquidatable, LiquidationCheck};
use crate::market::{MarketConfig, MarketError, PoolState};
use crate::pnl::position_pnl_usd;
use crate::position::{Position, PositionKey};
use crate::price_impact::{
    cap_position_impact, impact_usd_to_tokens, position_impact_usd, position_impact_usd_uncapped,
};
use crate::prices::PriceContext;
use crate::request::{CancelReason, PositionAction, PositionRequest, Request};
use crate::types::{Amount, RequestId, Side, TimeBucket, TokenId, Usd};

fn side_idx(side: Side) -> usize {
    match side {
        Side::Long => 0,
        Side::Short => 1,
    }
}

/// Pending costs settled against a position's accrual snapshots.
pub(super) struct SettledCosts {
    pub borrowing_usd: Usd,
    pub funding_usd: Usd,
    pub claimable_funding_usd: Usd,
}

/// Roll a position's fee snapshots forward and report what accrued since the
/// last settlement. Does not move any tokens.
pub(super) fn settle_costs(pool: &PoolState, position: &mut Position) -> SettledCosts {
    let side = position.side();
    let idx = side_idx(side);
    let cumulative = pool.cumulative_borrowing_factor[idx];
    let borrowing_usd =
        pending_borrowing_fee_usd(cumulative, position.borrowing_factor, position.size_in_usd);
    let funding_usd = position_funding_fee_usd(
        &pool.funding,
        side,
        position.funding_fee_per_size,
        position.size_in_usd,
    );
    let claimable_funding_usd = position_claimable_funding_usd(
        &pool.funding,
        side,
        position.claimable_funding_per_size,
        position.size_in_usd,
    );

    position.borrowing_factor = cumulative;
    position.funding_fee_per_size = pool.funding.paid_per_size(side);
    position.claimable_funding_per_size = pool.funding.received_per_size(side);

    SettledCosts {
        borrowing_usd,
        funding_usd,
        claimable_funding_usd,
    }
}

/// OI skew (before, after) for moving `size_delta_usd` of open interest on
/// `side`, in the market's configured imbalance units.
fn skew_change(
    config: &MarketConfig,
    pool: &PoolState,
    side: Side,
    size_delta_usd: Usd,
    size_delta_tokens: Amount,
    increase: bool,
) -> (Decimal, Decimal, Decimal, Decimal) {
    let in_tokens = config.oi_in_tokens_for_imbalance;
    let long0 = if in_tokens {
        pool.open_interest.tokens_by_side(Side::Long)
    } else {
        pool.open_interest.usd_by_side(Side::Long)
    };
    let short0 = if in_tokens {
        pool.open_interest.tokens_by_side(Side::Short)
    } else {
        pool.open_interest.usd_by_side(Side::Short)
    };
    let delta = if in_tokens {
        size_delta_tokens.value()
    } else {
        size_delta_usd.value()
    };
    let signed = if increase { delta } else { -delta };
    match side {
        Side::Long => (long0, short0, (long0 + signed).max(Decimal::ZERO), short0),
        Side::Short => (long0, short0, long0, (short0 + signed).max(Decimal::ZERO)),
    }
}

/// Impact a full close would incur right now, uncapped. Used by the
/// liquidation check.
pub(super) fn full_close_impact_usd(
    config: &MarketConfig,
    pool: &PoolState,
    position: &Position,
) -> Usd {
    let (l0, s0, l1, s1) = skew_change(
        config,
        pool,
        position.side(),
        position.size_in_usd,
        position.size_in_tokens,
        false,
    );
    position_impact_usd_uncapped(&config.position_impact, l0, s0, l1, s1)
}

/// Solvency check for one position at the given prices. Costs are taken from
/// the live accrual indices, so callers need not settle first.
pub(super) fn liquidation_check(
    config: &MarketConfig,
    pool: &PoolState,
    position: &Position,
    prices: &PriceContext,
) -> Result<LiquidationCheck, EngineError> {
    let index = prices.price(config.index_token)?;
    let collateral = prices.price(position.key.collateral_token)?;
    // pessimistic marks: longs at min, shorts at max
    let mark = index.pick(!position.side().is_long());
    let pnl = position.pnl_usd(mark);
    let collateral_usd = position.collateral_usd(collateral.min);

    let mut probe = position.clone();
    let costs = settle_costs(pool, &mut probe);
    let close_fee = position_fee_usd(&config.fees, position.size_in_usd);
    let pending_costs = costs
        .borrowing_usd
        .add(costs.funding_usd)
        .add(close_fee);

    let impact = full_close_impact_usd(config, pool, position);
    Ok(check_liquidatable(
        &config.liquidation,
        &config.position_impact,
        position.size_in_usd,
        collateral_usd,
        pnl,
        pending_costs,
        impact,
    ))
}

pub(super) enum CloseMode {
    Request,
    Liquidation,
}

/// Everything a decrease produced, for both the request and liquidation paths.
pub(super) struct CloseOutcome {
    pub result: DecreaseResult,
    pub remaining_collateral_usd: Usd,
    pub insolvent_shortfall_usd: Usd,
}

impl Engine {
    pub fn execute_position(
        &mut self,
        keeper: crate::types::AccountId,
        id: RequestId,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<PositionOutcome>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        let request = self.requests.take(id)?;
        let r = match request {
            Request::Position(r) => r,
            other => {
                self.requests.insert(other);
                return Err(EngineError::RequestTypeMismatch(id));
            }
        };

        if prices
            .validate_age(self.time(), self.config.max_price_age_secs)
            .is_err()
        {
            self.cancel_with_reason(Request::Position(r), CancelReason::StalePrices);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::StalePrices));
        }
        if !self.market(r.key.market)?.pool.is_active() {
            self.cancel_with_reason(Request::Position(r), CancelReason::MarketNotActive);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::MarketNotActive));
        }
        self.touch_market(r.key.market, prices)?;

        let outcome = match r.action {
            PositionAction::Increase => self
                .apply_increase_request(&r, prices)?
                .map(PositionOutcome::Increased),
            PositionAction::Decrease => self
                .apply_decrease_request(&r, prices)?
                .map(PositionOutcome::Decreased),
        };
        if let ExecutionOutcome::Cancelled(reason) = &outcome {
            let reason = *reason;
            self.cancel_with_reason(Request::Position(r), reason);
        }
        Ok(outcome)
    }

    fn apply_increase_request(
        &mut self,
        r: &PositionRequest,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<IncreaseResult>, EngineError> {
        let key = r.key.clone();
        let config = self.market(key.market)?.config.clone();
        let mut pool = self.market(key.market)?.pool.clone();
        let now = self.time();

        let index = prices.price(config.index_token)?;
        let collateral_price = prices.price(key.collateral_token)?;
        let slot = config
            .pool_token_for(key.collateral_token)
            .ok_or(MarketError::InvalidCollateralToken {
                market: key.market,
                token: key.collateral_token,
            })?;
        let side = key.side;

        let mut position = match self.position(&key) {
            Some(p) => p.clone(),
            None => Position::open(
                key.clone(),
                pool.cumulative_borrowing_factor[side_idx(side)],
                pool.funding.paid_per_size(side),
                pool.funding.received_per_size(side),
                now,
            ),
        };

        let costs = settle_costs(&pool, &mut position);
        let position_fee = position_fee_usd(&config.fees, r.size_delta_usd);

        // execution price: entry at the conservative side of the index, with
        // negative impact worsening it via a smaller token size.
        let base_price = index.pick(side.is_long());
        let size_delta_tokens_base = Amount::new(r.size_delta_usd.value() / base_price);
        let (l0, s0, l1, s1) = skew_change(
            &config,
            &pool,
            side,
            r.size_delta_usd,
            size_delta_tokens_base,
            true,
        );
        let impact_usd =
            position_impact_usd(&config.position_impact, l0, s0, l1, s1, r.size_delta_usd);

        let size_delta_tokens;
        if impact_usd.is_negative() {
            // realize immediately: the pool's impact reserve grows and the
            // trader's entry worsens by the same value.
            let charged = impact_usd_to_tokens(impact_usd, base_price);
            pool.position_impact_pool = pool.position_impact_pool.add(charged.abs());
            size_delta_tokens =
                Amount::new((r.size_delta_usd.value() + impact_usd.value()) / base_price);
        } else {
            // defer: the rebate is attributed to the position and paid out,
            // impact-pool permitting, when it decreases.
            let pending = impact_usd_to_tokens(impact_usd, index.max);
            position.pending_impact_amount = position.pending_impact_amount.add(pending);
            size_delta_tokens = size_delta_tokens_base;
        }
        let execution_price = if size_delta_tokens.is_positive() {
            r.size_delta_usd.value() / size_delta_tokens.value()
        } else {
            base_price
        };

        if let Some(acceptable) = r.acceptable_price {
            let ok = match side {
                Side::Long => execution_price <= acceptable,
                Side::Short => execution_price >= acceptable,
            };
            if !ok {
                return Ok(ExecutionOutcome::Cancelled(CancelReason::UnacceptablePrice));
            }
        }

        position.apply_increase(r.size_delta_usd, size_delta_tokens, r.collateral_delta, now);

        // charge accrued costs and the open fee from collateral
        let fee_total_usd = costs.borrowing_usd.add(costs.funding_usd).add(position_fee);
        let fee_tokens = Amount::new(fee_total_usd.value() / collateral_price.min);
        if fee_tokens > position.collateral_amount {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::Liquidatable));
        }
        position.collateral_amount = position.collateral_amount.sub(fee_tokens);

        // fee routing: borrowing and the pool's fee share deepen the pool,
        // the protocol cut becomes claimable, funding backs the claims pot.
        let (pool_fee, protocol_fee) = split_fee(&config.fees, position_fee);
        let pool_share_usd = costs.borrowing_usd.add(pool_fee);
        pool.add_pool_amount(slot, Amount::new(pool_share_usd.value() / collateral_price.min));
        pool.add_claimable_fee(slot, Amount::new(protocol_fee.value() / collateral_price.min));

        pool.open_interest.apply(
            slot,
            side,
            r.size_delta_usd.value(),
            size_delta_tokens.value(),
        );
        if pool.validate_open_interest_cap(&config, side).is_err() {
            return Ok(ExecutionOutcome::Cancelled(
                CancelReason::OpenInterestCapExceeded,
            ));
        }
        if pool.validate_reserve(&config, prices, side).is_err() {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::InsufficientReserve));
        }
        if liquidation_check(&config, &pool, &position, prices)?.is_liquidatable() {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::Liquidatable));
        }

        // commit
        let claimable_funding_tokens =
            Amount::new(costs.claimable_funding_usd.value() / collateral_price.max);
        self.market_mut(key.market)?.pool = pool;
        self.positions.insert(key.clone(), position);
        if claimable_funding_tokens.is_positive() {
            self.claims.add_funding(
                key.market,
                key.collateral_token,
                key.account,
                claimable_funding_tokens,
            );
            self.emit_event(EventPayload::ClaimableFundingCredited(
                ClaimableFundingCreditedEvent {
                    market_id: key.market,
                    token: key.collateral_token,
                    account_id: key.account,
                    amount: claimable_funding_tokens,
                },
            ));
        }
        self.emit_event(EventPayload::PositionIncreased(PositionIncreasedEvent {
            key: key.clone(),
            size_delta_usd: r.size_delta_usd,
            collateral_delta: r.collateral_delta,
            execution_price,
            price_impact_usd: impact_usd,
            funding_fee_usd: costs.funding_usd,
            borrowing_fee_usd: costs.borrowing_usd,
            position_fee_usd: position_fee,
        }));

        Ok(ExecutionOutcome::Executed(IncreaseResult {
            market: key.market,
            account: key.account,
            size_delta_usd: r.size_delta_usd,
            execution_price,
            price_impact_usd: impact_usd,
            fees_usd: fee_total_usd,
        }))
    }

    fn apply_decrease_request(
        &mut self,
        r: &PositionRequest,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<DecreaseResult>, EngineError> {
        let outcome = self.close_position(
            &r.key,
            r.size_delta_usd,
            r.collateral_delta,
            r.acceptable_price,
            prices,
            CloseMode::Request,
        )?;
        Ok(outcome.map(|o| o.result))
    }

    /// Shared decrease path. `CloseMode::Liquidation` skips the acceptable
    /// price, caps negative impact at the liquidation bound and books an
    /// insolvent shortfall instead of cancelling.
    pub(super) fn close_position(
        &mut self,
        key: &PositionKey,
        size_delta_usd: Usd,
        collateral_withdrawal: Amount,
        acceptable_price: Option<Decimal>,
        prices: &PriceContext,
        mode: CloseMode,
    ) -> Result<ExecutionOutcome<CloseOutcome>, EngineError> {
        let config = self.market(key.market)?.config.clone();
        let mut pool = self.market(key.market)?.pool.clone();
        let now = self.time();
        let mut position = self
            .position(key)
            .cloned()
            .ok_or(EngineError::PositionNotFound)?;

        let index = prices.price(config.index_token)?;
        let collateral_price = prices.price(key.collateral_token)?;
        let slot = config
            .pool_token_for(key.collateral_token)
            .ok_or(MarketError::InvalidCollateralToken {
                market: key.market,
                token: key.collateral_token,
            })?;
        let side = key.side;

        let size_delta = size_delta_usd.min(position.size_in_usd);
        let full_close = size_delta == position.size_in_usd;
        let costs = settle_costs(&pool, &mut position);
        let position_fee = position_fee_usd(&config.fees, size_delta);

        // exit at the conservative side of the index
        let base_price = index.pick(!side.is_long());
        let tokens_closed = position.tokens_for_decrease(size_delta);
        let realized_pnl = position_pnl_usd(size_delta, tokens_closed, side, base_price);

        let (l0, s0, l1, s1) = skew_change(&config, &pool, side, size_delta, tokens_closed, false);
        let uncapped = position_impact_usd_uncapped(&config.position_impact, l0, s0, l1, s1);
        let mut capped = cap_position_impact(&config.position_impact, uncapped, size_delta);
        if matches!(mode, CloseMode::Liquidation) && capped.is_negative() {
            let bound = size_delta
                .abs()
                .mul(config.position_impact.max_factor_for_liquidations)
                .negate();
            capped = capped.max(bound);
        }
        // positive impact the cap withheld is paid later via governance review
        let impact_diff = if uncapped.is_positive() && uncapped > capped {
            uncapped.sub(capped)
        } else {
            Usd::zero()
        };

        // settle: the proportional pending rebate plus this decrease's own
        // impact, bounded by what the impact pool actually holds.
        let pending_tokens = position.pending_impact_for_decrease(size_delta);
        let price_for_capped = if capped.is_negative() {
            index.min
        } else {
            index.max
        };
        let decrease_impact_tokens = impact_usd_to_tokens(capped, price_for_capped);
        let total_impact_tokens = pending_tokens.add(decrease_impact_tokens);

        let impact_value_usd;
        let mut negative_impact_tokens = Amount::zero();
        let mut impact_payout_usd = Usd::zero();
        if total_impact_tokens.is_positive() {
            let paid = total_impact_tokens.min(pool.position_impact_pool);
            pool.position_impact_pool = pool.position_impact_pool.sub(paid);
            impact_payout_usd = Usd::new(paid.value() * index.min);
            impact_value_usd = impact_payout_usd;
        } else {
            pool.position_impact_pool = pool.position_impact_pool.add(total_impact_tokens.abs());
            impact_value_usd = Usd::new(total_impact_tokens.value() * index.max);
            negative_impact_tokens =
                Amount::new(impact_value_usd.abs().value() / collateral_price.min);
        }

        let execution_price = if tokens_closed.is_positive() {
            base_price + side.sign() * (impact_value_usd.value() / tokens_closed.value())
        } else {
            base_price
        };
        if let Some(acceptable) = acceptable_price {
            if matches!(mode, CloseMode::Request) {
                let ok = match side {
                    Side::Long => execution_price >= acceptable,
                    Side::Short => execution_price <= acceptable,
                };
                if !ok {
                    return Ok(ExecutionOutcome::Cancelled(CancelReason::UnacceptablePrice));
                }
            }
        }

        // token flows, all in the collateral token unless stated otherwise
        let fee_total_usd = costs.borrowing_usd.add(costs.funding_usd).add(position_fee);
        let cost_tokens = Amount::new(fee_total_usd.value() / collateral_price.min);
        let loss_tokens = if realized_pnl.is_negative() {
            Amount::new(realized_pnl.abs().value() / collateral_price.min)
        } else {
            Amount::zero()
        };
        let profit_tokens = if realized_pnl.is_positive() {
            Amount::new(realized_pnl.value() / collateral_price.max)
        } else {
            Amount::zero()
        };
        let impact_payout_tokens = Amount::new(impact_payout_usd.value() / collateral_price.max);

        let owed_tokens = cost_tokens.add(loss_tokens).add(negative_impact_tokens);
        let insolvent = owed_tokens > position.collateral_amount;
        if insolvent && matches!(mode, CloseMode::Request) {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::Liquidatable));
        }
        let collected = owed_tokens.min(position.collateral_amount);
        let shortfall_usd = Usd::new(
            (owed_tokens.value() - collected.value()) * collateral_price.min,
        );

        // what the trader owes deepens the pool (losses, negative impact,
        // borrowing, pool fee share); the funding pot and the protocol cut
        // are routed out first, in that order, when collateral runs short.
        let (_, protocol_fee) = split_fee(&config.fees, position_fee);
        let funding_tokens = Amount::new(costs.funding_usd.value() / collateral_price.min);
        let protocol_tokens = Amount::new(protocol_fee.value() / collateral_price.min);
        let funding_part = funding_tokens.min(collected);
        let protocol_part = protocol_tokens.min(collected.sub(funding_part));
        let to_pool = collected.sub(funding_part).sub(protocol_part);
        pool.add_pool_amount(slot, to_pool);
        pool.add_claimable_fee(slot, protocol_part);

        let remaining_collateral = position.collateral_amount.sub(collected);
        let remaining_collateral_usd =
            Usd::new(remaining_collateral.value() * collateral_price.min).sub(shortfall_usd);

        // collateral leaving with the trader
        let collateral_out = if full_close {
            remaining_collateral
        } else {
            collateral_withdrawal.min(remaining_collateral)
        };

        // profit and settled impact are paid from the pool, falling back to
        // the other pool token, then to a claimable-collateral credit.
        let mut payouts: Vec<(TokenId, Amount)> = Vec::new();
        let mut claimable_credit = Amount::zero();
        let needed_from_pool = profit_tokens.add(impact_payout_tokens);
        if needed_from_pool.is_positive() {
            let available = pool.pool_amount(slot);
            let pay = needed_from_pool.min(available);
            if pay.is_positive() {
                // cannot fail: pay <= available
                pool.sub_pool_amount(slot, pay)?;
                payouts.push((key.collateral_token, pay));
            }
            let unpaid = needed_from_pool.sub(pay);
            if unpaid.is_positive() {
                let unpaid_usd = unpaid.value() * collateral_price.min;
                let other = slot.opposite();
                let other_token = config.token(other);
                let other_price = prices.price(other_token)?;
                let other_needed = Amount::new(unpaid_usd / other_price.max);
                let other_pay = other_needed.min(pool.pool_amount(other));
                if other_pay.is_positive() {
                    pool.sub_pool_amount(other, other_pay)?;
                    payouts.push((other_token, other_pay));
                }
                let residual = other_needed.sub(other_pay);
                if residual.is_positive() {
                    // residual credited in the collateral token
                    claimable_credit = Amount::new(
                        residual.value() * other_price.max / collateral_price.max,
                    );
                }
            }
        }
        // the positive impact the cap withheld
        if impact_diff.is_positive() {
            claimable_credit = claimable_credit
                .add(Amount::new(impact_diff.value() / collateral_price.max));
        }
        if collateral_out.is_positive() {
            match payouts.iter_mut().find(|(t, _)| *t == key.collateral_token) {
                Some(entry) => entry.1 = entry.1.add(collateral_out),
                None => payouts.insert(0, (key.collateral_token, collateral_out)),
            }
        }

        // bookkeeping on the position itself
        let collateral_spent = collected.add(collateral_out);
        position.apply_decrease(size_delta, tokens_closed, collateral_spent, pending_tokens, now);
        pool.open_interest
            .apply(slot, side, -size_delta.value(), -tokens_closed.value());

        if !position.is_empty()
            && matches!(mode, CloseMode::Request)
            && liquidation_check(&config, &pool, &position, prices)?.is_liquidatable()
        {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::Liquidatable));
        }

        // commit
        let claimable_funding_tokens =
            Amount::new(costs.claimable_funding_usd.value() / collateral_price.max);
        self.market_mut(key.market)?.pool = pool;
        if position.is_empty() {
            self.positions.remove(key);
        } else {
            self.positions.insert(key.clone(), position);
        }
        for (token, amount) in &payouts {
            self.add_balance(key.account, *token, *amount);
        }
        if claimable_funding_tokens.is_positive() {
            self.claims.add_funding(
                key.market,
                key.collateral_token,
                key.account,
                claimable_funding_tokens,
            );
            self.emit_event(EventPayload::ClaimableFundingCredited(
                ClaimableFundingCreditedEvent {
                    market_id: key.market,
                    token: key.collateral_token,
                    account_id: key.account,
                    amount: claimable_funding_tokens,
                },
            ));
        }
        if claimable_credit.is_positive() {
            let bucket = TimeBucket::containing(now);
            self.claims.add_collateral(
                key.market,
                key.collateral_token,
                bucket,
                key.account,
                claimable_credit,
            );
            self.emit_event(EventPayload::ClaimableCollateralCredited(
                ClaimableCollateralCreditedEvent {
                    market_id: key.market,
                    token: key.collateral_token,
                    account_id: key.account,
                    time_bucket: bucket,
                    amount: claimable_credit,
                },
            ));
        }
        self.emit_event(EventPayload::PositionDecreased(PositionDecreasedEvent {
            key: key.clone(),
            size_delta_usd: size_delta,
            collateral_delta: collateral_spent,
            execution_price,
            price_impact_usd: capped,
            realized_pnl_usd: realized_pnl,
            funding_fee_usd: costs.funding_usd,
            borrowing_fee_usd: costs.borrowing_usd,
            position_fee_usd: position_fee,
            payouts: payouts.clone(),
        }));

        Ok(ExecutionOutcome::Executed(CloseOutcome {
            result: DecreaseResult {
                market: key.market,
                account: key.account,
                size_delta_usd: size_delta,
                execution_price,
                realized_pnl_usd: realized_pnl,
                price_impact_usd: capped,
                fees_usd: fee_total_usd,
                payouts,
                closed: full_close,
            },
            remaining_collateral_usd,
            insolvent_shortfall_usd: shortfall_usd,
        }))
    }

    /// Read-only view of a position with live pending costs.
    pub fn position_info(
        &self,
        key: &PositionKey,
        prices: &PriceContext,
    ) -> Result<PositionInfo, EngineError> {
        let position = self
            .position(key)
            .cloned()
            .ok_or(EngineError::PositionNotFound)?;
        let market = self.market(key.market)?;
        let config = &market.config;
        let pool = &market.pool;

        let index = prices.price(config.index_token)?;
        let collateral = prices.price(key.collateral_token)?;
        let mark = index.pick(!position.side().is_long());

        let mut probe = position.clone();
        let costs = settle_costs(pool, &mut probe);
        let check = liquidation_check(config, pool, &position, prices)?;

        Ok(PositionInfo {
            size_in_usd: position.size_in_usd,
            collateral_amount: position.collateral_amount,
            collateral_usd: position.collateral_usd(collateral.min),
            pnl_usd: position.pnl_usd(mark),
            pending_borrowing_usd: costs.borrowing_usd,
            pending_funding_usd: costs.funding_usd,
            leverage: position.leverage(collateral.min),
            liquidatable: check.is_liquidatable(),
        })
    }
}

impl<T> ExecutionOutcome<T> {
    pub(super) fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionOutcome<U> {
        match self {
            ExecutionOutcome::Executed(t) => ExecutionOutcome::Executed(f(t)),
            ExecutionOutcome::Cancelled(r) => ExecutionOutcome::Cancelled(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::market::{MarketConfig, PoolToken};
    use crate::prices::Price;
    use crate::types::{AccountId, MarketId, Timestamp, TokenId};
    use rust_decimal_macros::dec;

    const ETH: TokenId = TokenId(1);
    const USDC: TokenId = TokenId(2);
    const MARKET: MarketId = MarketId(1);
    const ADMIN: AccountId = AccountId(1);
    const KEEPER: AccountId = AccountId(2);
    const TRADER: AccountId = AccountId(3);

    fn setup() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.grant_role(ADMIN, Role::Config);
        engine.grant_role(KEEPER, Role::Keeper);
        engine
            .register_market(ADMIN, MarketConfig::eth_usd(MARKET, ETH, USDC))
            .unwrap();
        // seed the pool directly: 100 ETH and 500k USDC
        let market = engine.market_mut(MARKET).unwrap();
        market
            .pool
            .add_pool_amount(PoolToken::LongToken, Amount::new(dec!(100)));
        market
            .pool
            .add_pool_amount(PoolToken::ShortToken, Amount::new(dec!(500_000)));
        engine
    }

    fn prices(at: i64) -> PriceContext {
        PriceContext::new(Timestamp::from_secs(at))
            .with_price(ETH, Price::exact(dec!(5000)))
            .with_price(USDC, Price::exact(dec!(1)))
    }

    fn open_long(engine: &mut Engine, size_usd: Decimal, collateral_usdc: Decimal) -> PositionKey {
        engine
            .fund_account(TRADER, USDC, Amount::new(collateral_usdc))
            .unwrap();
        let id = engine
            .create_increase(
                TRADER,
                MARKET,
                USDC,
                Side::Long,
                Usd::new(size_usd),
                Amount::new(collateral_usdc),
                None,
            )
            .unwrap();
        let outcome = engine.execute_position(KEEPER, id, &prices(0)).unwrap();
        assert!(outcome.is_executed(), "open_long cancelled: {:?}", outcome.cancel_reason());
        PositionKey {
            account: TRADER,
            market: MARKET,
            collateral_token: USDC,
            side: Side::Long,
        }
    }

    #[test]
    fn increase_records_size_and_charges_fee() {
        let mut engine = setup();
        let key = open_long(&mut engine, dec!(50_000), dec!(10_000));

        let position = engine.position(&key).unwrap();
        assert_eq!(position.size_in_usd.value(), dec!(50_000));
        // open fee 0.05% of 50k = $25 taken from collateral
        assert!(position.collateral_amount.value() < dec!(10_000));
        assert!(position.collateral_amount.value() > dec!(9_970));

        let pool = &engine.market(MARKET).unwrap().pool;
        assert_eq!(
            pool.open_interest.usd_by_side(Side::Long),
            dec!(50_000)
        );
        // protocol cut of the fee is claimable, the rest deepened the pool
        assert!(pool.claimable_fee(PoolToken::ShortToken).is_positive());
        assert!(pool.pool_amount(PoolToken::ShortToken).value() > dec!(500_000));
    }

    #[test]
    fn increase_with_negative_impact_worsens_entry() {
        let mut engine = setup();
        let key = open_long(&mut engine, dec!(1_000_000), dec!(200_000));

        let position = engine.position(&key).unwrap();
        // long OI goes 0 -> 1M: negative impact, so fewer tokens than
        // size/price and an entry above the oracle price
        assert!(position.size_in_tokens.value() < dec!(200));
        assert!(position.entry_price().unwrap() > dec!(5000));
        assert!(engine
            .market(MARKET)
            .unwrap()
            .pool
            .position_impact_pool
            .is_positive());
    }

    #[test]
    fn stale_prices_cancel_and_refund() {
        let mut engine = setup();
        engine.set_time(Timestamp::from_secs(1000)).unwrap();
        engine
            .fund_account(TRADER, USDC, Amount::new(dec!(1000)))
            .unwrap();
        let id = engine
            .create_increase(
                TRADER,
                MARKET,
                USDC,
                Side::Long,
                Usd::new(dec!(5000)),
                Amount::new(dec!(1000)),
                None,
            )
            .unwrap();

        // prices observed at t=0, now t=1000, max age 60
        let outcome = engine.execute_position(KEEPER, id, &prices(0)).unwrap();
        assert_eq!(outcome.cancel_reason(), Some(CancelReason::StalePrices));
        assert_eq!(engine.balance(TRADER, USDC).value(), dec!(1000));
        // replay is impossible: the request is consumed
        assert!(engine.execute_position(KEEPER, id, &prices(1000)).is_err());
    }

    #[test]
    fn unacceptable_price_cancels() {
        let mut engine = setup();
        engine
            .fund_account(TRADER, USDC, Amount::new(dec!(10_000)))
            .unwrap();
        // long entry executes at >= 5000; demanding 4999 must cancel
        let id = engine
            .create_increase(
                TRADER,
                MARKET,
                USDC,
                Side::Long,
                Usd::new(dec!(50_000)),
                Amount::new(dec!(10_000)),
                Some(dec!(4999)),
            )
            .unwrap();
        let outcome = engine.execute_position(KEEPER, id, &prices(0)).unwrap();
        assert_eq!(outcome.cancel_reason(), Some(CancelReason::UnacceptablePrice));
        assert_eq!(engine.balance(TRADER, USDC).value(), dec!(10_000));
    }

    #[test]
    fn reserve_check_cancels_oversized_increase() {
        let mut engine = setup();
        engine
            .fund_account(TRADER, USDC, Amount::new(dec!(400_000)))
            .unwrap();
        // pool long slot = 100 ETH = $500k, reserve factor 0.95 -> $475k max;
        // a 160 ETH long cannot be reserved
        let id = engine
            .create_increase(
                TRADER,
                MARKET,
                USDC,
                Side::Long,
                Usd::new(dec!(800_000)),
                Amount::new(dec!(400_000)),
                None,
            )
            .unwrap();
        let outcome = engine.execute_position(KEEPER, id, &prices(0)).unwrap();
        assert_eq!(
            outcome.cancel_reason(),
            Some(CancelReason::InsufficientReserve)
        );
        // no pool state leaked from the attempt
        assert_eq!(
            engine
                .market(MARKET)
                .unwrap()
                .pool
                .open_interest
                .total_usd(),
            Decimal::ZERO
        );
    }

    #[test]
    fn profitable_close_pays_from_pool() {
        let mut engine = setup();
        let key = open_long(&mut engine, dec!(50_000), dec!(10_000));
        let pool_before = engine
            .market(MARKET)
            .unwrap()
            .pool
            .pool_amount(PoolToken::ShortToken);

        // price rises 10%
        let up = PriceContext::new(Timestamp::from_secs(0))
            .with_price(ETH, Price::exact(dec!(5500)))
            .with_price(USDC, Price::exact(dec!(1)));
        let id = engine
            .create_decrease(key.clone(), Usd::new(dec!(50_000)), Amount::zero(), None)
            .unwrap();
        let outcome = engine.execute_position(KEEPER, id, &up).unwrap();
        let result = match outcome.executed().unwrap() {
            PositionOutcome::Decreased(r) => r,
            other => panic!("unexpected outcome {other:?}"),
        };

        assert!(result.closed);
        assert!(result.realized_pnl_usd.value() > dec!(4000));
        assert!(engine.position(&key).is_none());
        // trader got collateral back plus profit
        assert!(engine.balance(TRADER, USDC).value() > dec!(13_000));
        // the pool paid the profit
        let pool_after = engine
            .market(MARKET)
            .unwrap()
            .pool
            .pool_amount(PoolToken::ShortToken);
        assert!(pool_after < pool_before);
        assert_eq!(
            engine
                .market(MARKET)
                .unwrap()
                .pool
                .open_interest
                .usd_by_side(Side::Long),
            Decimal::ZERO
        );
    }

    #[test]
    fn losing_close_deepens_pool() {
        let mut engine = setup();
        let key = open_long(&mut engine, dec!(50_000), dec!(10_000));
        let pool_before = engine
            .market(MARKET)
            .unwrap()
            .pool
            .pool_amount(PoolToken::ShortToken);

        let down = PriceContext::new(Timestamp::from_secs(0))
            .with_price(ETH, Price::exact(dec!(4800)))
            .with_price(USDC, Price::exact(dec!(1)));
        let id = engine
            .create_decrease(key.clone(), Usd::new(dec!(50_000)), Amount::zero(), None)
            .unwrap();
        let outcome = engine.execute_position(KEEPER, id, &down).unwrap();
        let result = match outcome.executed().unwrap() {
            PositionOutcome::Decreased(r) => r,
            other => panic!("unexpected outcome {other:?}"),
        };

        assert!(result.realized_pnl_usd.is_negative());
        let pool_after = engine
            .market(MARKET)
            .unwrap()
            .pool
            .pool_amount(PoolToken::ShortToken);
        assert!(pool_after > pool_before);
        // trader still gets the rest of the collateral back
        let returned = engine.balance(TRADER, USDC).value();
        assert!(returned > Decimal::ZERO && returned < dec!(10_000));
    }

    #[test]
    fn partial_close_keeps_entry_price() {
        let mut engine = setup();
        let key = open_long(&mut engine, dec!(50_000), dec!(10_000));
        let entry_before = engine.position(&key).unwrap().entry_price().unwrap();

        let id = engine
            .create_decrease(key.clone(), Usd::new(dec!(20_000)), Amount::zero(), None)
            .unwrap();
        let outcome = engine.execute_position(KEEPER, id, &prices(0)).unwrap();
        assert!(outcome.is_executed());

        let position = engine.position(&key).unwrap();
        assert_eq!(position.size_in_usd.value(), dec!(30_000));
        assert_eq!(position.entry_price().unwrap(), entry_before);
    }

    #[test]
    fn decrease_settles_borrowing_over_time() {
        let mut engine = setup();
        let key = open_long(&mut engine, dec!(50_000), dec!(10_000));
        let collateral_before = engine.position(&key).unwrap().collateral_amount;

        engine.set_time(Timestamp::from_secs(86_400)).unwrap();
        let id = engine
            .create_decrease(key.clone(), Usd::new(dec!(10_000)), Amount::zero(), None)
            .unwrap();
        let outcome = engine
            .execute_position(KEEPER, id, &prices(86_400))
            .unwrap();
        let result = match outcome.executed().unwrap() {
            PositionOutcome::Decreased(r) => r,
            other => panic!("unexpected outcome {other:?}"),
        };
        // a day of borrowing plus the close fee
        assert!(result.fees_usd.value() > dec!(5));
        let position = engine.position(&key).unwrap();
        assert!(position.collateral_amount < collateral_before);
    }
}
