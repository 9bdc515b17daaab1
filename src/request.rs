// 11.0: two-phase requests. every user intent is first recorded with its
// inputs locked (create), then a keeper supplies prices and triggers the
// economic effects (execute) or the request is cancelled with a typed reason
// and the locked inputs refunded. executing or cancelling consumes the id,
// so a replayed key is simply not found.

use crate::position::PositionKey;
use crate::types::{AccountId, Amount, MarketId, RequestId, Timestamp, Usd, VaultId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why an execution-time cancellation happened. These are expected,
/// user-facing outcomes, not faults: the request is undone as a unit and all
/// locked inputs refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    /// Price context outside the recency window.
    StalePrices,
    /// Market paused or closed.
    MarketNotActive,
    InsufficientReserve,
    OpenInterestCapExceeded,
    /// Execution price worse than the acceptable price on the request.
    UnacceptablePrice,
    /// Withdrawal/shift output below the requested minimum.
    SlippageExceeded,
    /// Increase would leave the position immediately liquidatable.
    Liquidatable,
    /// First deposit too small to cover the mandatory burn shares.
    BelowMinFirstDeposit,
    /// Insolvent close with no holding account configured. Fail closed.
    EmptyHoldingAccount,
    /// Vault-level balance cap would be breached.
    VaultCapExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: RequestId,
    pub account: AccountId,
    pub market: MarketId,
    /// Locked inputs, refunded in full on cancellation.
    pub long_amount: Amount,
    pub short_amount: Amount,
    pub min_shares: Decimal,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: RequestId,
    pub account: AccountId,
    pub market: MarketId,
    pub shares: Decimal,
    pub min_long_amount: Amount,
    pub min_short_amount: Amount,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftRequest {
    pub id: RequestId,
    pub account: AccountId,
    pub from_market: MarketId,
    pub to_market: MarketId,
    pub shares: Decimal,
    pub min_shares_out: Decimal,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionAction {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRequest {
    pub id: RequestId,
    pub key: PositionKey,
    pub action: PositionAction,
    pub size_delta_usd: Usd,
    /// Increase: collateral locked in. Decrease: collateral to withdraw.
    pub collateral_delta: Amount,
    /// Bound on execution price: max for longs opening / shorts closing,
    /// min for the converse. None disables the guard (liquidations).
    pub acceptable_price: Option<Decimal>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultDepositRequest {
    pub id: RequestId,
    pub account: AccountId,
    pub vault: VaultId,
    /// Constituent market the liquidity lands in.
    pub market: MarketId,
    pub long_amount: Amount,
    pub short_amount: Amount,
    pub min_vault_shares: Decimal,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultWithdrawalRequest {
    pub id: RequestId,
    pub account: AccountId,
    pub vault: VaultId,
    pub market: MarketId,
    pub vault_shares: Decimal,
    pub min_long_amount: Amount,
    pub min_short_amount: Amount,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Deposit(DepositRequest),
    Withdrawal(WithdrawalRequest),
    Shift(ShiftRequest),
    Position(PositionRequest),
    VaultDeposit(VaultDepositRequest),
    VaultWithdrawal(VaultWithdrawalRequest),
}

impl Request {
    pub fn id(&self) -> RequestId {
        match self {
            Request::Deposit(r) => r.id,
            Request::Withdrawal(r) => r.id,
            Request::Shift(r) => r.id,
            Request::Position(r) => r.id,
            Request::VaultDeposit(r) => r.id,
            Request::VaultWithdrawal(r) => r.id,
        }
    }

    pub fn account(&self) -> AccountId {
        match self {
            Request::Deposit(r) => r.account,
            Request::Withdrawal(r) => r.account,
            Request::Shift(r) => r.account,
            Request::Position(r) => r.key.account,
            Request::VaultDeposit(r) => r.account,
            Request::VaultWithdrawal(r) => r.account,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("Request {0:?} not found (already executed or cancelled?)")]
    RequestNotFound(RequestId),
}

/// Pending requests keyed by id. `take` consumes the entry; execute and
/// cancel both go through it, which is what makes replay impossible.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RequestStore {
    pending: HashMap<RequestId, Request>,
    next_id: u64,
}

impl RequestStore {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, request: Request) {
        self.pending.insert(request.id(), request);
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.pending.get(&id)
    }

    pub fn take(&mut self, id: RequestId) -> Result<Request, RequestError> {
        self.pending.remove(&id).ok_or(RequestError::RequestNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deposit(store: &mut RequestStore) -> RequestId {
        let id = store.next_id();
        store.insert(Request::Deposit(DepositRequest {
            id,
            account: AccountId(1),
            market: MarketId(1),
            long_amount: Amount::new(dec!(10)),
            short_amount: Amount::new(dec!(50_000)),
            min_shares: Decimal::ZERO,
            created_at: Timestamp::from_secs(0),
        }));
        id
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let mut store = RequestStore::new();
        let a = store.next_id();
        let b = store.next_id();
        assert!(b > a);
    }

    #[test]
    fn take_consumes_the_request() {
        let mut store = RequestStore::new();
        let id = deposit(&mut store);
        assert_eq!(store.len(), 1);

        assert!(store.take(id).is_ok());
        assert!(store.is_empty());

        // replay of a consumed id
        assert!(matches!(
            store.take(id),
            Err(RequestError::RequestNotFound(_))
        ));
    }

    #[test]
    fn get_does_not_consume() {
        let mut store = RequestStore::new();
        let id = deposit(&mut store);
        assert!(store.get(id).is_some());
        assert!(store.get(id).is_some());
    }
}
