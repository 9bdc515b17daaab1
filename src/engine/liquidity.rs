// 14.6 engine/liquidity.rs: deposits, withdrawals and shifts. the pool math
// is staged on a cloned PoolState and committed only after every guard has
// passed; the staged helpers are reused by shifts and the vault layer.

use rust_decimal::Decimal;

use super::config::Role;
use super::core::Engine;
use super::results::{
    DepositResult, EngineError, ExecutionOutcome, ShiftResult, WithdrawalResult,
};
use crate::events::{
    DepositExecutedEvent, EventPayload, ShiftExecutedEvent, WithdrawalExecutedEvent,
};
use crate::market::{PoolState, PoolToken};
use crate::pnl::{pool_value_usd, share_price, PnlContext};
use crate::price_impact::swap_impact_usd;
use crate::prices::PriceContext;
use crate::request::{CancelReason, Request};
use crate::types::{AccountId, Amount, MarketId, RequestId, Side, Usd};

/// A fully computed deposit, not yet written back to the engine.
pub(super) struct StagedDeposit {
    pub pool: PoolState,
    pub shares_to_holder: Decimal,
    /// Dead shares minted on the pool's very first deposit.
    pub burn_shares: Decimal,
    pub value_usd: Usd,
    pub impact_usd: Usd,
}

pub(super) struct StagedWithdrawal {
    pub pool: PoolState,
    pub long_out: Amount,
    pub short_out: Amount,
}

impl Engine {
    /// Stage a deposit of pool tokens into a market. `charge_fees` is off for
    /// shifts, which pay impact but no swap fee.
    pub(super) fn stage_deposit(
        &self,
        market_id: MarketId,
        long_amount: Amount,
        short_amount: Amount,
        prices: &PriceContext,
        charge_fees: bool,
    ) -> Result<Result<StagedDeposit, CancelReason>, EngineError> {
        let market = self.market(market_id)?;
        let config = &market.config;
        let mut pool = market.pool.clone();
        let now = self.time();

        let long_price = prices.price(config.long_token)?;
        let short_price = prices.price(config.short_token)?;

        // share price uses the deposit pnl cap and a maximized pool value, so
        // a deposit never mints more cheaply than the pool is worth.
        let pool_value = pool_value_usd(config, &pool, prices, now, PnlContext::Deposits, true)?;
        let price_per_share = share_price(pool_value, pool.share_supply);

        let imbalance_before = (
            pool.pool_amount(PoolToken::LongToken).value() * long_price.mid(),
            pool.pool_amount(PoolToken::ShortToken).value() * short_price.mid(),
        );

        let mut value_usd = Usd::zero();
        let mut contribution_usd = [Decimal::ZERO, Decimal::ZERO];
        for (i, (slot, amount, price)) in [
            (PoolToken::LongToken, long_amount, long_price),
            (PoolToken::ShortToken, short_amount, short_price),
        ]
        .into_iter()
        .enumerate()
        {
            if amount.is_zero() {
                continue;
            }
            let fee = if charge_fees {
                amount.mul(config.fees.swap_fee_factor)
            } else {
                Amount::zero()
            };
            let protocol = fee.mul(config.fees.fee_receiver_factor);
            // the pool's share of the fee stays in the pool and accrues to
            // existing holders; only the protocol cut leaves.
            let contribution = amount.sub(protocol);
            pool.add_claimable_fee(slot, protocol);
            pool.add_pool_amount(slot, contribution);
            value_usd = value_usd.add(Usd::new(amount.sub(fee).value() * price.min));
            contribution_usd[i] = contribution.value() * price.mid();
        }

        let imbalance_after = (
            pool.pool_amount(PoolToken::LongToken).value() * long_price.mid(),
            pool.pool_amount(PoolToken::ShortToken).value() * short_price.mid(),
        );
        let impact_usd = swap_impact_usd(
            &config.swap_impact,
            imbalance_before.0,
            imbalance_before.1,
            imbalance_after.0,
            imbalance_after.1,
        );

        // impact settles in the token that dominates the deposit
        let (impact_slot, impact_price) = if contribution_usd[0] >= contribution_usd[1] {
            (PoolToken::LongToken, long_price)
        } else {
            (PoolToken::ShortToken, short_price)
        };
        if impact_usd.is_negative() {
            // held back from the deposit into the swap impact pool
            let requested = Amount::new(impact_usd.abs().value() / impact_price.min);
            let charge = requested.min(pool.pool_amount(impact_slot));
            pool.sub_pool_amount(impact_slot, charge)?;
            pool.add_swap_impact(impact_slot, charge);
            value_usd = value_usd.sub(Usd::new(charge.value() * impact_price.min));
        } else if impact_usd.is_positive() {
            // rebate paid from the impact pool, capped at its balance
            let requested = Amount::new(impact_usd.value() / impact_price.max);
            let paid = pool.take_swap_impact(impact_slot, requested);
            pool.add_pool_amount(impact_slot, paid);
            value_usd = value_usd.add(Usd::new(paid.value() * impact_price.min));
        }

        let minted = if value_usd.is_positive() {
            value_usd.value() / price_per_share
        } else {
            Decimal::ZERO
        };
        let first_deposit = pool.share_supply.is_zero();
        let burn_shares = if first_deposit {
            config.min_first_deposit_shares
        } else {
            Decimal::ZERO
        };
        if first_deposit && minted <= burn_shares {
            return Ok(Err(CancelReason::BelowMinFirstDeposit));
        }
        pool.share_supply += minted;

        Ok(Ok(StagedDeposit {
            pool,
            shares_to_holder: minted - burn_shares,
            burn_shares,
            value_usd,
            impact_usd,
        }))
    }

    /// Stage a redemption of market shares for pool tokens.
    pub(super) fn stage_withdrawal(
        &self,
        market_id: MarketId,
        shares: Decimal,
        prices: &PriceContext,
        charge_fees: bool,
    ) -> Result<Result<StagedWithdrawal, CancelReason>, EngineError> {
        let market = self.market(market_id)?;
        let config = &market.config;
        let mut pool = market.pool.clone();
        let now = self.time();

        let long_price = prices.price(config.long_token)?;
        let short_price = prices.price(config.short_token)?;

        // withdrawal values the pool low: minimized value, withdrawal pnl cap
        let pool_value =
            pool_value_usd(config, &pool, prices, now, PnlContext::Withdrawals, false)?;
        let value_usd = shares * share_price(pool_value, pool.share_supply);

        // split across the two tokens in proportion to pool composition
        let long_pool_usd = pool.pool_amount(PoolToken::LongToken).value() * long_price.min;
        let short_pool_usd = pool.pool_amount(PoolToken::ShortToken).value() * short_price.min;
        let total = long_pool_usd + short_pool_usd;
        if total <= Decimal::ZERO {
            return Ok(Err(CancelReason::SlippageExceeded));
        }

        let mut outputs = [Amount::zero(), Amount::zero()];
        for (i, (slot, pool_usd, price)) in [
            (PoolToken::LongToken, long_pool_usd, long_price),
            (PoolToken::ShortToken, short_pool_usd, short_price),
        ]
        .into_iter()
        .enumerate()
        {
            let portion_usd = value_usd * pool_usd / total;
            let gross = Amount::new(portion_usd / price.max).min(pool.pool_amount(slot));
            if pool.sub_pool_amount(slot, gross).is_err() {
                return Ok(Err(CancelReason::InsufficientReserve));
            }
            let fee = if charge_fees {
                gross.mul(config.fees.swap_fee_factor)
            } else {
                Amount::zero()
            };
            let protocol = fee.mul(config.fees.fee_receiver_factor);
            pool.add_pool_amount(slot, fee.sub(protocol));
            pool.add_claimable_fee(slot, protocol);
            outputs[i] = gross.sub(fee);
        }
        pool.share_supply -= shares;

        // the remaining pool must still cover what open interest reserves
        for side in [Side::Long, Side::Short] {
            if pool.validate_reserve(config, prices, side).is_err() {
                return Ok(Err(CancelReason::InsufficientReserve));
            }
        }

        Ok(Ok(StagedWithdrawal {
            pool,
            long_out: outputs[0],
            short_out: outputs[1],
        }))
    }

    pub fn execute_deposit(
        &mut self,
        keeper: AccountId,
        id: RequestId,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<DepositResult>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        let request = self.requests.take(id)?;
        let r = match request {
            Request::Deposit(r) => r,
            other => {
                self.requests.insert(other);
                return Err(EngineError::RequestTypeMismatch(id));
            }
        };

        if let Some(reason) = self.pre_execution_check(r.market, prices)? {
            self.cancel_with_reason(Request::Deposit(r), reason);
            return Ok(ExecutionOutcome::Cancelled(reason));
        }
        self.touch_market(r.market, prices)?;

        let staged = match self.stage_deposit(r.market, r.long_amount, r.short_amount, prices, true)? {
            Ok(staged) => staged,
            Err(reason) => {
                self.cancel_with_reason(Request::Deposit(r), reason);
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        };
        if staged.shares_to_holder < r.min_shares {
            self.cancel_with_reason(Request::Deposit(r), CancelReason::SlippageExceeded);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::SlippageExceeded));
        }

        // commit
        self.market_mut(r.market)?.pool = staged.pool;
        self.add_shares(r.account, r.market, staged.shares_to_holder);
        if staged.burn_shares > Decimal::ZERO {
            self.add_shares(AccountId::BURN, r.market, staged.burn_shares);
        }
        self.emit_event(EventPayload::DepositExecuted(DepositExecutedEvent {
            request_id: r.id,
            market_id: r.market,
            account_id: r.account,
            long_amount: r.long_amount,
            short_amount: r.short_amount,
            shares_minted: staged.shares_to_holder,
            price_impact_usd: staged.impact_usd,
        }));

        Ok(ExecutionOutcome::Executed(DepositResult {
            market: r.market,
            account: r.account,
            shares_minted: staged.shares_to_holder,
            deposit_value_usd: staged.value_usd,
            price_impact_usd: staged.impact_usd,
        }))
    }

    pub fn execute_withdrawal(
        &mut self,
        keeper: AccountId,
        id: RequestId,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<WithdrawalResult>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        let request = self.requests.take(id)?;
        let r = match request {
            Request::Withdrawal(r) => r,
            other => {
                self.requests.insert(other);
                return Err(EngineError::RequestTypeMismatch(id));
            }
        };

        if let Some(reason) = self.pre_execution_check(r.market, prices)? {
            self.cancel_with_reason(Request::Withdrawal(r), reason);
            return Ok(ExecutionOutcome::Cancelled(reason));
        }
        self.touch_market(r.market, prices)?;

        let staged = match self.stage_withdrawal(r.market, r.shares, prices, true)? {
            Ok(staged) => staged,
            Err(reason) => {
                self.cancel_with_reason(Request::Withdrawal(r), reason);
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        };
        if staged.long_out < r.min_long_amount || staged.short_out < r.min_short_amount {
            self.cancel_with_reason(Request::Withdrawal(r), CancelReason::SlippageExceeded);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::SlippageExceeded));
        }

        let (long_token, short_token) = {
            let config = &self.market(r.market)?.config;
            (config.long_token, config.short_token)
        };
        self.market_mut(r.market)?.pool = staged.pool;
        self.add_balance(r.account, long_token, staged.long_out);
        self.add_balance(r.account, short_token, staged.short_out);
        self.emit_event(EventPayload::WithdrawalExecuted(WithdrawalExecutedEvent {
            request_id: r.id,
            market_id: r.market,
            account_id: r.account,
            shares_burned: r.shares,
            long_amount_out: staged.long_out,
            short_amount_out: staged.short_out,
        }));

        Ok(ExecutionOutcome::Executed(WithdrawalResult {
            market: r.market,
            account: r.account,
            shares_burned: r.shares,
            long_token_out: staged.long_out,
            short_token_out: staged.short_out,
        }))
    }

    pub fn execute_shift(
        &mut self,
        keeper: AccountId,
        id: RequestId,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<ShiftResult>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        let request = self.requests.take(id)?;
        let r = match request {
            Request::Shift(r) => r,
            other => {
                self.requests.insert(other);
                return Err(EngineError::RequestTypeMismatch(id));
            }
        };

        let blocked = self
            .pre_execution_check(r.from_market, prices)?
            .or(self.pre_execution_check(r.to_market, prices)?);
        if let Some(reason) = blocked {
            self.cancel_with_reason(Request::Shift(r), reason);
            return Ok(ExecutionOutcome::Cancelled(reason));
        }
        self.touch_market(r.from_market, prices)?;
        self.touch_market(r.to_market, prices)?;

        // both legs are staged before either is committed
        let staged_out = match self.stage_withdrawal(r.from_market, r.shares, prices, false)? {
            Ok(staged) => staged,
            Err(reason) => {
                self.cancel_with_reason(Request::Shift(r), reason);
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        };
        let staged_in = match self.stage_deposit(
            r.to_market,
            staged_out.long_out,
            staged_out.short_out,
            prices,
            false,
        )? {
            Ok(staged) => staged,
            Err(reason) => {
                self.cancel_with_reason(Request::Shift(r), reason);
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        };
        if staged_in.shares_to_holder < r.min_shares_out {
            self.cancel_with_reason(Request::Shift(r), CancelReason::SlippageExceeded);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::SlippageExceeded));
        }

        self.market_mut(r.from_market)?.pool = staged_out.pool;
        self.market_mut(r.to_market)?.pool = staged_in.pool;
        self.add_shares(r.account, r.to_market, staged_in.shares_to_holder);
        if staged_in.burn_shares > Decimal::ZERO {
            self.add_shares(AccountId::BURN, r.to_market, staged_in.burn_shares);
        }
        self.emit_event(EventPayload::ShiftExecuted(ShiftExecutedEvent {
            request_id: r.id,
            from_market: r.from_market,
            to_market: r.to_market,
            account_id: r.account,
            shares_burned: r.shares,
            shares_minted: staged_in.shares_to_holder,
            price_impact_usd: staged_in.impact_usd,
        }));

        Ok(ExecutionOutcome::Executed(ShiftResult {
            from_market: r.from_market,
            to_market: r.to_market,
            account: r.account,
            shares_burned: r.shares,
            shares_minted: staged_in.shares_to_holder,
            value_moved_usd: staged_in.value_usd,
        }))
    }

    /// Common pre-execution guards: price recency and market status.
    pub(super) fn pre_execution_check(
        &self,
        market: MarketId,
        prices: &PriceContext,
    ) -> Result<Option<CancelReason>, EngineError> {
        if prices
            .validate_age(self.time(), self.config.max_price_age_secs)
            .is_err()
        {
            return Ok(Some(CancelReason::StalePrices));
        }
        if !self.market(market)?.pool.is_active() {
            return Ok(Some(CancelReason::MarketNotActive));
        }
        Ok(None)
    }
}
