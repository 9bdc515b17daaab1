// 14.7 engine/vault.rs: vault deposit/withdraw execution and keeper-driven
// rebalancing between constituent markets. the vault layer rides on the
// staged pool math in engine/liquidity.rs; a vault only ever holds market
// shares, never pool tokens directly.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::config::Role;
use super::core::Engine;
use super::results::{
    EngineError, ExecutionOutcome, VaultDepositResult, VaultShiftResult, VaultWithdrawalResult,
};
use crate::events::{
    EventPayload, VaultDepositExecutedEvent, VaultShiftedEvent, VaultWithdrawalExecutedEvent,
};
use crate::pnl::{pool_value_usd, share_price, PnlContext};
use crate::prices::PriceContext;
use crate::request::{CancelReason, Request};
use crate::types::{AccountId, MarketId, RequestId, Usd, VaultId};
use crate::vault::{Vault, VaultError};

impl Engine {
    /// Total USD value of a vault's market-share holdings.
    fn vault_value_usd(
        &self,
        vault: &Vault,
        prices: &PriceContext,
        context: PnlContext,
        maximize: bool,
    ) -> Result<Usd, EngineError> {
        let now = self.time();
        let mut total = Decimal::ZERO;
        for market_id in vault.markets() {
            let balance = vault.share_balance(market_id);
            if balance.is_zero() {
                continue;
            }
            let market = self.market(market_id)?;
            let value = pool_value_usd(&market.config, &market.pool, prices, now, context, maximize)?;
            total += balance * share_price(value, market.pool.share_supply);
        }
        Ok(Usd::new(total))
    }

    fn market_share_price(
        &self,
        market_id: MarketId,
        prices: &PriceContext,
        context: PnlContext,
        maximize: bool,
    ) -> Result<Decimal, EngineError> {
        let market = self.market(market_id)?;
        let value = pool_value_usd(
            &market.config,
            &market.pool,
            prices,
            self.time(),
            context,
            maximize,
        )?;
        Ok(share_price(value, market.pool.share_supply))
    }

    pub fn execute_vault_deposit(
        &mut self,
        keeper: AccountId,
        id: RequestId,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<VaultDepositResult>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        let request = self.requests.take(id)?;
        let r = match request {
            Request::VaultDeposit(r) => r,
            other => {
                self.requests.insert(other);
                return Err(EngineError::RequestTypeMismatch(id));
            }
        };

        if let Some(reason) = self.pre_execution_check(r.market, prices)? {
            self.cancel_with_reason(Request::VaultDeposit(r), reason);
            return Ok(ExecutionOutcome::Cancelled(reason));
        }
        self.touch_market(r.market, prices)?;

        // vault share price is fixed before the deposit touches the pool
        let vault = self.vault(r.vault)?.clone();
        let vault_value = self.vault_value_usd(&vault, prices, PnlContext::Deposits, true)?;
        let vault_price = share_price(vault_value, vault.share_supply);
        let market_price = self.market_share_price(r.market, prices, PnlContext::Deposits, true)?;

        let staged = match self.stage_deposit(r.market, r.long_amount, r.short_amount, prices, true)?
        {
            Ok(staged) => staged,
            Err(reason) => {
                self.cancel_with_reason(Request::VaultDeposit(r), reason);
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        };

        let new_balance = vault.share_balance(r.market) + staged.shares_to_holder;
        if vault.validate_caps(r.market, new_balance, market_price).is_err() {
            self.cancel_with_reason(Request::VaultDeposit(r), CancelReason::VaultCapExceeded);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::VaultCapExceeded));
        }

        let vault_shares = if vault_price.is_zero() {
            Decimal::ZERO
        } else {
            staged.shares_to_holder * market_price / vault_price
        };
        if vault_shares < r.min_vault_shares {
            self.cancel_with_reason(Request::VaultDeposit(r), CancelReason::SlippageExceeded);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::SlippageExceeded));
        }

        // commit
        self.market_mut(r.market)?.pool = staged.pool;
        if staged.burn_shares > Decimal::ZERO {
            self.add_shares(AccountId::BURN, r.market, staged.burn_shares);
        }
        let v = self
            .vaults
            .get_mut(&r.vault)
            .ok_or(VaultError::VaultNotFound(r.vault))?;
        v.add_share_balance(r.market, staged.shares_to_holder);
        v.share_supply += vault_shares;
        self.add_vault_shares(r.account, r.vault, vault_shares);
        self.emit_event(EventPayload::VaultDepositExecuted(VaultDepositExecutedEvent {
            request_id: r.id,
            vault_id: r.vault,
            market_id: r.market,
            account_id: r.account,
            market_shares_received: staged.shares_to_holder,
            vault_shares_minted: vault_shares,
        }));

        Ok(ExecutionOutcome::Executed(VaultDepositResult {
            vault: r.vault,
            market: r.market,
            account: r.account,
            vault_shares_minted: vault_shares,
            market_shares_added: staged.shares_to_holder,
        }))
    }

    pub fn execute_vault_withdrawal(
        &mut self,
        keeper: AccountId,
        id: RequestId,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<VaultWithdrawalResult>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        let request = self.requests.take(id)?;
        let r = match request {
            Request::VaultWithdrawal(r) => r,
            other => {
                self.requests.insert(other);
                return Err(EngineError::RequestTypeMismatch(id));
            }
        };

        if let Some(reason) = self.pre_execution_check(r.market, prices)? {
            self.cancel_with_reason(Request::VaultWithdrawal(r), reason);
            return Ok(ExecutionOutcome::Cancelled(reason));
        }
        self.touch_market(r.market, prices)?;

        let vault = self.vault(r.vault)?.clone();
        let vault_value = self.vault_value_usd(&vault, prices, PnlContext::Withdrawals, false)?;
        let vault_price = share_price(vault_value, vault.share_supply);
        let market_price =
            self.market_share_price(r.market, prices, PnlContext::Withdrawals, false)?;

        let value_usd = r.vault_shares * vault_price;
        let mut market_shares = if market_price.is_zero() {
            Decimal::ZERO
        } else {
            value_usd / market_price
        };
        // the two share-price divisions can leave rounding dust; a full
        // redemption must not bounce off its own balance
        let available = vault.share_balance(r.market);
        if market_shares > available && market_shares - available <= dec!(0.000001) {
            market_shares = available;
        }
        if vault.share_balance(r.market) < market_shares {
            // the chosen market cannot cover the redemption; leave the
            // request for a retry against a better-funded market
            let market = r.market;
            self.requests.insert(Request::VaultWithdrawal(r));
            return Err(VaultError::InsufficientShareBalance(market).into());
        }

        let staged = match self.stage_withdrawal(r.market, market_shares, prices, true)? {
            Ok(staged) => staged,
            Err(reason) => {
                self.cancel_with_reason(Request::VaultWithdrawal(r), reason);
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        };
        if staged.long_out < r.min_long_amount || staged.short_out < r.min_short_amount {
            self.cancel_with_reason(Request::VaultWithdrawal(r), CancelReason::SlippageExceeded);
            return Ok(ExecutionOutcome::Cancelled(CancelReason::SlippageExceeded));
        }

        let (long_token, short_token) = {
            let config = &self.market(r.market)?.config;
            (config.long_token, config.short_token)
        };
        self.market_mut(r.market)?.pool = staged.pool;
        let v = self
            .vaults
            .get_mut(&r.vault)
            .ok_or(VaultError::VaultNotFound(r.vault))?;
        v.sub_share_balance(r.market, market_shares)?;
        v.share_supply -= r.vault_shares;
        self.add_balance(r.account, long_token, staged.long_out);
        self.add_balance(r.account, short_token, staged.short_out);
        self.emit_event(EventPayload::VaultWithdrawalExecuted(
            VaultWithdrawalExecutedEvent {
                request_id: r.id,
                vault_id: r.vault,
                market_id: r.market,
                account_id: r.account,
                vault_shares_burned: r.vault_shares,
                long_amount_out: staged.long_out,
                short_amount_out: staged.short_out,
            },
        ));

        Ok(ExecutionOutcome::Executed(VaultWithdrawalResult {
            vault: r.vault,
            market: r.market,
            account: r.account,
            vault_shares_burned: r.vault_shares,
            long_token_out: staged.long_out,
            short_token_out: staged.short_out,
        }))
    }

    /// Keeper rebalance: move part of a vault's holding from one constituent
    /// market to another. Runs directly, without a request, so failed guards
    /// surface as a cancelled outcome with nothing to refund.
    pub fn shift_vault_market(
        &mut self,
        keeper: AccountId,
        vault_id: VaultId,
        from_market: MarketId,
        to_market: MarketId,
        market_shares: Decimal,
        prices: &PriceContext,
    ) -> Result<ExecutionOutcome<VaultShiftResult>, EngineError> {
        self.require_role(keeper, Role::Keeper)?;
        if market_shares <= Decimal::ZERO {
            return Err(EngineError::NonPositiveAmount(market_shares));
        }

        let vault = self.vault(vault_id)?.clone();
        for market in [from_market, to_market] {
            if !vault.is_listed(market) {
                return Err(VaultError::MarketNotListed(market, vault_id).into());
            }
        }
        if vault.share_balance(from_market) < market_shares {
            return Err(VaultError::InsufficientShareBalance(from_market).into());
        }

        for market in [from_market, to_market] {
            if let Some(reason) = self.pre_execution_check(market, prices)? {
                return Ok(ExecutionOutcome::Cancelled(reason));
            }
        }
        self.touch_market(from_market, prices)?;
        self.touch_market(to_market, prices)?;

        // like a pool shift: impact applies, swap fees do not
        let staged_out = match self.stage_withdrawal(from_market, market_shares, prices, false)? {
            Ok(staged) => staged,
            Err(reason) => return Ok(ExecutionOutcome::Cancelled(reason)),
        };
        let staged_in = match self.stage_deposit(
            to_market,
            staged_out.long_out,
            staged_out.short_out,
            prices,
            false,
        )? {
            Ok(staged) => staged,
            Err(reason) => return Ok(ExecutionOutcome::Cancelled(reason)),
        };

        let to_price = self.market_share_price(to_market, prices, PnlContext::Deposits, true)?;
        let new_balance = vault.share_balance(to_market) + staged_in.shares_to_holder;
        if vault.validate_caps(to_market, new_balance, to_price).is_err() {
            return Ok(ExecutionOutcome::Cancelled(CancelReason::VaultCapExceeded));
        }

        self.market_mut(from_market)?.pool = staged_out.pool;
        self.market_mut(to_market)?.pool = staged_in.pool;
        if staged_in.burn_shares > Decimal::ZERO {
            self.add_shares(AccountId::BURN, to_market, staged_in.burn_shares);
        }
        let v = self
            .vaults
            .get_mut(&vault_id)
            .ok_or(VaultError::VaultNotFound(vault_id))?;
        v.sub_share_balance(from_market, market_shares)?;
        v.add_share_balance(to_market, staged_in.shares_to_holder);
        self.emit_event(EventPayload::VaultShifted(VaultShiftedEvent {
            vault_id,
            from_market,
            to_market,
            shares_moved: market_shares,
            shares_received: staged_in.shares_to_holder,
        }));

        Ok(ExecutionOutcome::Executed(VaultShiftResult {
            vault: vault_id,
            from_market,
            to_market,
            market_shares_moved: market_shares,
            market_shares_received: staged_in.shares_to_holder,
        }))
    }
}
