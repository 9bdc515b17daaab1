// 14.2 engine/core.rs: engine state, roles, balances, the request lifecycle
// plumbing (create / cancel / refund) and the claim entry points. economic
// execution lives in the sibling modules.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;

use super::config::{EngineConfig, Role};
use super::results::EngineError;
use crate::claims::ClaimLedger;
use crate::events::{
    CollateralClaimedEvent, Event, EventId, EventPayload, FundingClaimedEvent,
    RequestCancelledEvent,
};
use crate::market::{MarketConfig, MarketError, MarketStatus, PoolState, PoolToken};
use crate::position::{Position, PositionKey};
use crate::request::{
    CancelReason, DepositRequest, PositionAction, PositionRequest, Request, RequestStore,
    ShiftRequest, VaultDepositRequest, VaultWithdrawalRequest, WithdrawalRequest,
};
use crate::types::{AccountId, Amount, MarketId, RequestId, Side, TimeBucket, Timestamp, TokenId, Usd, VaultId};
use crate::vault::{Vault, VaultError, VaultMarketCaps};

/// One registered market: immutable config plus its pool record.
#[derive(Debug, Clone)]
pub struct Market {
    pub config: MarketConfig,
    pub pool: PoolState,
}

/** 14.2.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) markets: HashMap<MarketId, Market>,
    pub(super) positions: HashMap<PositionKey, Position>,
    pub(super) requests: RequestStore,
    pub(super) claims: ClaimLedger,
    pub(super) vaults: HashMap<VaultId, Vault>,
    /// free token balances held by accounts inside the engine.
    pub(super) token_balances: HashMap<(AccountId, TokenId), Amount>,
    /// market share (LP) balances per account.
    pub(super) share_balances: HashMap<(AccountId, MarketId), Decimal>,
    pub(super) vault_share_balances: HashMap<(AccountId, VaultId), Decimal>,
    pub(super) roles: HashMap<AccountId, BTreeSet<Role>>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            markets: HashMap::new(),
            positions: HashMap::new(),
            requests: RequestStore::new(),
            claims: ClaimLedger::new(),
            vaults: HashMap::new(),
            token_balances: HashMap::new(),
            share_balances: HashMap::new(),
            vault_share_balances: HashMap::new(),
            roles: HashMap::new(),
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_secs(0),
        }
    }

    // -- time ---------------------------------------------------------------

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    /// Monotonic clock: moving backwards would corrupt the accrual indices.
    pub fn set_time(&mut self, timestamp: Timestamp) -> Result<(), EngineError> {
        if timestamp < self.current_time {
            return Err(EngineError::TimeWentBackwards);
        }
        self.current_time = timestamp;
        Ok(())
    }

    pub fn advance_time(&mut self, secs: i64) {
        self.current_time = self.current_time.plus_secs(secs);
    }

    // -- roles --------------------------------------------------------------

    /// Genesis role grant. Subsequent grants go through `grant_role_by`.
    pub fn grant_role(&mut self, account: AccountId, role: Role) {
        self.roles.entry(account).or_default().insert(role);
    }

    pub fn grant_role_by(
        &mut self,
        granter: AccountId,
        account: AccountId,
        role: Role,
    ) -> Result<(), EngineError> {
        self.require_role(granter, Role::Config)?;
        self.grant_role(account, role);
        Ok(())
    }

    pub fn has_role(&self, account: AccountId, role: Role) -> bool {
        self.roles
            .get(&account)
            .map(|set| set.contains(&role))
            .unwrap_or(false)
    }

    pub(super) fn require_role(&self, account: AccountId, role: Role) -> Result<(), EngineError> {
        if self.has_role(account, role) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(account, role))
        }
    }

    // -- markets and vaults -------------------------------------------------

    pub fn register_market(
        &mut self,
        caller: AccountId,
        config: MarketConfig,
    ) -> Result<MarketId, EngineError> {
        self.require_role(caller, Role::Config)?;
        let id = config.id;
        if self.markets.contains_key(&id) {
            return Err(EngineError::MarketAlreadyExists(id));
        }
        let pool = PoolState::new(self.current_time);
        self.markets.insert(id, Market { config, pool });
        Ok(id)
    }

    pub fn register_vault(
        &mut self,
        caller: AccountId,
        vault: Vault,
    ) -> Result<VaultId, EngineError> {
        self.require_role(caller, Role::Config)?;
        let id = vault.id;
        if self.vaults.contains_key(&id) {
            return Err(EngineError::VaultAlreadyExists(id));
        }
        self.vaults.insert(id, vault);
        Ok(id)
    }

    /// Whitelist a market in a vault. The market must trade the vault's pair.
    pub fn add_vault_market(
        &mut self,
        caller: AccountId,
        vault_id: VaultId,
        market_id: MarketId,
        caps: VaultMarketCaps,
    ) -> Result<(), EngineError> {
        self.require_role(caller, Role::Config)?;
        let market = self.market(market_id)?;
        let (long, short) = (market.config.long_token, market.config.short_token);
        let vault = self
            .vaults
            .get_mut(&vault_id)
            .ok_or(VaultError::VaultNotFound(vault_id))?;
        if vault.long_token != long || vault.short_token != short {
            return Err(VaultError::PairMismatch(market_id, vault_id).into());
        }
        vault.add_market(market_id, caps)?;
        Ok(())
    }

    pub fn pause_market(&mut self, caller: AccountId, id: MarketId) -> Result<(), EngineError> {
        self.require_role(caller, Role::Config)?;
        self.market_mut(id)?.pool.status = MarketStatus::Paused;
        Ok(())
    }

    pub fn resume_market(&mut self, caller: AccountId, id: MarketId) -> Result<(), EngineError> {
        self.require_role(caller, Role::Config)?;
        self.market_mut(id)?.pool.status = MarketStatus::Active;
        Ok(())
    }

    pub fn market(&self, id: MarketId) -> Result<&Market, EngineError> {
        self.markets
            .get(&id)
            .ok_or_else(|| MarketError::MarketNotFound(id).into())
    }

    pub(super) fn market_mut(&mut self, id: MarketId) -> Result<&mut Market, EngineError> {
        self.markets
            .get_mut(&id)
            .ok_or_else(|| MarketError::MarketNotFound(id).into())
    }

    pub fn vault(&self, id: VaultId) -> Result<&Vault, EngineError> {
        self.vaults
            .get(&id)
            .ok_or_else(|| VaultError::VaultNotFound(id).into())
    }

    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn positions_iter(&self) -> impl Iterator<Item = (&PositionKey, &Position)> {
        self.positions.iter()
    }

    // -- balances -----------------------------------------------------------

    /// External token inflow into an account's free balance.
    pub fn fund_account(
        &mut self,
        account: AccountId,
        token: TokenId,
        amount: Amount,
    ) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::NonPositiveAmount(amount.value()));
        }
        self.add_balance(account, token, amount);
        Ok(())
    }

    pub fn balance(&self, account: AccountId, token: TokenId) -> Amount {
        self.token_balances
            .get(&(account, token))
            .copied()
            .unwrap_or(Amount::zero())
    }

    pub(super) fn add_balance(&mut self, account: AccountId, token: TokenId, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        debug_assert!(amount.is_positive());
        let entry = self
            .token_balances
            .entry((account, token))
            .or_insert(Amount::zero());
        *entry = entry.add(amount);
    }

    pub(super) fn sub_balance(
        &mut self,
        account: AccountId,
        token: TokenId,
        amount: Amount,
    ) -> Result<(), EngineError> {
        let held = self.balance(account, token);
        if amount > held {
            return Err(EngineError::InsufficientBalance {
                account,
                token,
                held,
                needed: amount,
            });
        }
        self.token_balances.insert((account, token), held.sub(amount));
        Ok(())
    }

    pub fn share_balance(&self, account: AccountId, market: MarketId) -> Decimal {
        self.share_balances
            .get(&(account, market))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub(super) fn add_shares(&mut self, account: AccountId, market: MarketId, shares: Decimal) {
        debug_assert!(shares >= Decimal::ZERO);
        *self
            .share_balances
            .entry((account, market))
            .or_insert(Decimal::ZERO) += shares;
    }

    pub(super) fn sub_shares(
        &mut self,
        account: AccountId,
        market: MarketId,
        shares: Decimal,
    ) -> Result<(), EngineError> {
        let held = self.share_balance(account, market);
        if shares > held {
            return Err(EngineError::InsufficientShares {
                account,
                market,
                held,
                needed: shares,
            });
        }
        self.share_balances.insert((account, market), held - shares);
        Ok(())
    }

    pub fn vault_share_balance(&self, account: AccountId, vault: VaultId) -> Decimal {
        self.vault_share_balances
            .get(&(account, vault))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub(super) fn add_vault_shares(&mut self, account: AccountId, vault: VaultId, shares: Decimal) {
        debug_assert!(shares >= Decimal::ZERO);
        *self
            .vault_share_balances
            .entry((account, vault))
            .or_insert(Decimal::ZERO) += shares;
    }

    pub(super) fn sub_vault_shares(
        &mut self,
        account: AccountId,
        vault: VaultId,
        shares: Decimal,
    ) -> Result<(), EngineError> {
        let held = self.vault_share_balance(account, vault);
        if shares > held {
            return Err(EngineError::InsufficientVaultShares {
                account,
                vault,
                held,
                needed: shares,
            });
        }
        self.vault_share_balances
            .insert((account, vault), held - shares);
        Ok(())
    }

    // -- request creation ---------------------------------------------------
    // creating a request locks its inputs immediately. execution or
    // cancellation is the only way to unlock them.

    pub fn create_deposit(
        &mut self,
        account: AccountId,
        market: MarketId,
        long_amount: Amount,
        short_amount: Amount,
        min_shares: Decimal,
    ) -> Result<RequestId, EngineError> {
        let config = &self.market(market)?.config;
        if long_amount.is_negative() || short_amount.is_negative() {
            return Err(EngineError::NonPositiveAmount(
                long_amount.min(short_amount).value(),
            ));
        }
        if long_amount.is_zero() && short_amount.is_zero() {
            return Err(EngineError::NonPositiveAmount(Decimal::ZERO));
        }
        let (long_token, short_token) = (config.long_token, config.short_token);
        self.sub_balance(account, long_token, long_amount)?;
        self.sub_balance(account, short_token, short_amount)?;

        let id = self.requests.next_id();
        self.requests.insert(Request::Deposit(DepositRequest {
            id,
            account,
            market,
            long_amount,
            short_amount,
            min_shares,
            created_at: self.current_time,
        }));
        Ok(id)
    }

    pub fn create_withdrawal(
        &mut self,
        account: AccountId,
        market: MarketId,
        shares: Decimal,
        min_long_amount: Amount,
        min_short_amount: Amount,
    ) -> Result<RequestId, EngineError> {
        self.market(market)?;
        if shares <= Decimal::ZERO {
            return Err(EngineError::NonPositiveAmount(shares));
        }
        self.sub_shares(account, market, shares)?;

        let id = self.requests.next_id();
        self.requests.insert(Request::Withdrawal(WithdrawalRequest {
            id,
            account,
            market,
            shares,
            min_long_amount,
            min_short_amount,
            created_at: self.current_time,
        }));
        Ok(id)
    }

    pub fn create_shift(
        &mut self,
        account: AccountId,
        from_market: MarketId,
        to_market: MarketId,
        shares: Decimal,
        min_shares_out: Decimal,
    ) -> Result<RequestId, EngineError> {
        if shares <= Decimal::ZERO {
            return Err(EngineError::NonPositiveAmount(shares));
        }
        let from = self.market(from_market)?.config.clone();
        let to = &self.market(to_market)?.config;
        if !from.same_pair(to) {
            return Err(MarketError::TokenPairMismatch(from_market, to_market).into());
        }
        self.sub_shares(account, from_market, shares)?;

        let id = self.requests.next_id();
        self.requests.insert(Request::Shift(ShiftRequest {
            id,
            account,
            from_market,
            to_market,
            shares,
            min_shares_out,
            created_at: self.current_time,
        }));
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_increase(
        &mut self,
        account: AccountId,
        market: MarketId,
        collateral_token: TokenId,
        side: Side,
        size_delta_usd: Usd,
        collateral_delta: Amount,
        acceptable_price: Option<Decimal>,
    ) -> Result<RequestId, EngineError> {
        let config = &self.market(market)?.config;
        if config.pool_token_for(collateral_token).is_none() {
            return Err(MarketError::InvalidCollateralToken {
                market,
                token: collateral_token,
            }
            .into());
        }
        if !size_delta_usd.is_positive() && !collateral_delta.is_positive() {
            return Err(EngineError::NonPositiveAmount(size_delta_usd.value()));
        }
        if size_delta_usd.is_negative() || collateral_delta.is_negative() {
            return Err(EngineError::NonPositiveAmount(size_delta_usd.value()));
        }
        self.sub_balance(account, collateral_token, collateral_delta)?;

        let key = PositionKey {
            account,
            market,
            collateral_token,
            side,
        };
        let id = self.requests.next_id();
        self.requests.insert(Request::Position(PositionRequest {
            id,
            key,
            action: PositionAction::Increase,
            size_delta_usd,
            collateral_delta,
            acceptable_price,
            created_at: self.current_time,
        }));
        Ok(id)
    }

    pub fn create_decrease(
        &mut self,
        key: PositionKey,
        size_delta_usd: Usd,
        collateral_withdrawal: Amount,
        acceptable_price: Option<Decimal>,
    ) -> Result<RequestId, EngineError> {
        if !self.positions.contains_key(&key) {
            return Err(EngineError::PositionNotFound);
        }
        if size_delta_usd.is_negative() || collateral_withdrawal.is_negative() {
            return Err(EngineError::NonPositiveAmount(size_delta_usd.value()));
        }
        let id = self.requests.next_id();
        self.requests.insert(Request::Position(PositionRequest {
            id,
            key,
            action: PositionAction::Decrease,
            size_delta_usd,
            collateral_delta: collateral_withdrawal,
            acceptable_price,
            created_at: self.current_time,
        }));
        Ok(id)
    }

    pub fn create_vault_deposit(
        &mut self,
        account: AccountId,
        vault_id: VaultId,
        market: MarketId,
        long_amount: Amount,
        short_amount: Amount,
        min_vault_shares: Decimal,
    ) -> Result<RequestId, EngineError> {
        let vault = self.vault(vault_id)?;
        if !vault.is_listed(market) {
            return Err(VaultError::MarketNotListed(market, vault_id).into());
        }
        if long_amount.is_negative() || short_amount.is_negative() {
            return Err(EngineError::NonPositiveAmount(
                long_amount.min(short_amount).value(),
            ));
        }
        if long_amount.is_zero() && short_amount.is_zero() {
            return Err(EngineError::NonPositiveAmount(Decimal::ZERO));
        }
        let (long_token, short_token) = (vault.long_token, vault.short_token);
        self.sub_balance(account, long_token, long_amount)?;
        self.sub_balance(account, short_token, short_amount)?;

        let id = self.requests.next_id();
        self.requests
            .insert(Request::VaultDeposit(VaultDepositRequest {
                id,
                account,
                vault: vault_id,
                market,
                long_amount,
                short_amount,
                min_vault_shares,
                created_at: self.current_time,
            }));
        Ok(id)
    }

    pub fn create_vault_withdrawal(
        &mut self,
        account: AccountId,
        vault_id: VaultId,
        market: MarketId,
        vault_shares: Decimal,
        min_long_amount: Amount,
        min_short_amount: Amount,
    ) -> Result<RequestId, EngineError> {
        let vault = self.vault(vault_id)?;
        if !vault.is_listed(market) {
            return Err(VaultError::MarketNotListed(market, vault_id).into());
        }
        if vault_shares <= Decimal::ZERO {
            return Err(EngineError::NonPositiveAmount(vault_shares));
        }
        self.sub_vault_shares(account, vault_id, vault_shares)?;

        let id = self.requests.next_id();
        self.requests
            .insert(Request::VaultWithdrawal(VaultWithdrawalRequest {
                id,
                account,
                vault: vault_id,
                market,
                vault_shares,
                min_long_amount,
                min_short_amount,
                created_at: self.current_time,
            }));
        Ok(id)
    }

    // -- cancellation -------------------------------------------------------

    /// User-initiated cancel. Keepers may cancel any request; owners only
    /// their own.
    pub fn cancel_request(
        &mut self,
        caller: AccountId,
        id: RequestId,
    ) -> Result<(), EngineError> {
        let request = self.requests.take(id)?;
        if request.account() != caller && !self.has_role(caller, Role::Keeper) {
            // put it back untouched
            let owner_err = EngineError::NotRequestOwner(id);
            self.requests.insert(request);
            return Err(owner_err);
        }
        self.cancel_with_reason(request, CancelReason::UserRequested);
        Ok(())
    }

    /// Refund a request's locked inputs and record the cancellation.
    pub(super) fn cancel_with_reason(&mut self, request: Request, reason: CancelReason) {
        let (id, account) = (request.id(), request.account());
        self.refund_request(&request);
        self.emit_event(EventPayload::RequestCancelled(RequestCancelledEvent {
            request_id: id,
            account_id: account,
            reason,
        }));
    }

    fn refund_request(&mut self, request: &Request) {
        match request {
            Request::Deposit(r) => {
                // market config cannot have been removed while pending
                if let Ok(market) = self.market(r.market) {
                    let (long, short) = (market.config.long_token, market.config.short_token);
                    self.add_balance(r.account, long, r.long_amount);
                    self.add_balance(r.account, short, r.short_amount);
                }
            }
            Request::Withdrawal(r) => {
                self.add_shares(r.account, r.market, r.shares);
            }
            Request::Shift(r) => {
                self.add_shares(r.account, r.from_market, r.shares);
            }
            Request::Position(r) => match r.action {
                PositionAction::Increase => {
                    self.add_balance(r.key.account, r.key.collateral_token, r.collateral_delta);
                }
                PositionAction::Decrease => {}
            },
            Request::VaultDeposit(r) => {
                if let Ok(vault) = self.vault(r.vault) {
                    let (long, short) = (vault.long_token, vault.short_token);
                    self.add_balance(r.account, long, r.long_amount);
                    self.add_balance(r.account, short, r.short_amount);
                }
            }
            Request::VaultWithdrawal(r) => {
                self.add_vault_shares(r.account, r.vault, r.vault_shares);
            }
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    // -- claims -------------------------------------------------------------

    /// Governance sets the payout fraction for one (market, token, hour)
    /// claimable-collateral bucket.
    pub fn set_claimable_collateral_factor(
        &mut self,
        caller: AccountId,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
        factor: Decimal,
    ) -> Result<(), EngineError> {
        self.require_role(caller, Role::Config)?;
        self.claims
            .set_collateral_factor(market, token, bucket, factor)?;
        Ok(())
    }

    pub fn claim_collateral(
        &mut self,
        account: AccountId,
        market: MarketId,
        token: TokenId,
        bucket: TimeBucket,
    ) -> Result<Amount, EngineError> {
        let amount = self.claims.claim_collateral(market, token, bucket, account)?;
        self.add_balance(account, token, amount);
        self.emit_event(EventPayload::CollateralClaimed(CollateralClaimedEvent {
            market_id: market,
            token,
            account_id: account,
            time_bucket: bucket,
            amount,
        }));
        Ok(amount)
    }

    pub fn claimable_funding(&self, account: AccountId, market: MarketId, token: TokenId) -> Amount {
        self.claims.claimable_funding(market, token, account)
    }

    pub fn claim_funding(
        &mut self,
        account: AccountId,
        market: MarketId,
        token: TokenId,
    ) -> Result<Amount, EngineError> {
        let amount = self.claims.claim_funding(market, token, account)?;
        self.add_balance(account, token, amount);
        self.emit_event(EventPayload::FundingClaimed(FundingClaimedEvent {
            market_id: market,
            token,
            account_id: account,
            amount,
        }));
        Ok(amount)
    }

    /// Governance withdrawal of the protocol fee cut accrued in a market.
    pub fn claim_protocol_fees(
        &mut self,
        caller: AccountId,
        market_id: MarketId,
        receiver: AccountId,
    ) -> Result<[(TokenId, Amount); 2], EngineError> {
        self.require_role(caller, Role::Config)?;
        let market = self.market_mut(market_id)?;
        let long_token = market.config.long_token;
        let short_token = market.config.short_token;
        let long_fee = market.pool.take_claimable_fee(PoolToken::LongToken);
        let short_fee = market.pool.take_claimable_fee(PoolToken::ShortToken);
        self.add_balance(receiver, long_token, long_fee);
        self.add_balance(receiver, short_token, short_fee);
        Ok([(long_token, long_fee), (short_token, short_fee)])
    }

    // -- events -------------------------------------------------------------

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            println!("[Event {}] {:?}", event.id.0, event.payload);
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
