// 14.8: aggregate error type and execution result structs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::claims::ClaimError;
use crate::market::MarketError;
use crate::prices::PriceError;
use crate::request::{CancelReason, RequestError};
use crate::types::{AccountId, Amount, MarketId, RequestId, TokenId, Usd, VaultId};
use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("Account {0:?} lacks the {1:?} role")]
    Unauthorized(AccountId, super::Role),
    #[error("Account {account:?} holds {held} of token {token:?}, needs {needed}")]
    InsufficientBalance {
        account: AccountId,
        token: TokenId,
        held: Amount,
        needed: Amount,
    },
    #[error("Account {account:?} holds {held} shares of market {market:?}, needs {needed}")]
    InsufficientShares {
        account: AccountId,
        market: MarketId,
        held: Decimal,
        needed: Decimal,
    },
    #[error("Account {account:?} holds {held} shares of vault {vault:?}, needs {needed}")]
    InsufficientVaultShares {
        account: AccountId,
        vault: VaultId,
        held: Decimal,
        needed: Decimal,
    },
    #[error("Market {0:?} already registered")]
    MarketAlreadyExists(MarketId),
    #[error("Vault {0:?} already registered")]
    VaultAlreadyExists(VaultId),
    #[error("Position not found for the given key")]
    PositionNotFound,
    #[error("Position is not liquidatable")]
    NotLiquidatable,
    #[error("No holding account configured for insolvent closes")]
    NoHoldingAccount,
    #[error("Request {0:?} was not submitted by this account")]
    NotRequestOwner(RequestId),
    #[error("Request {0:?} is not of the expected kind")]
    RequestTypeMismatch(RequestId),
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Time may not move backwards")]
    TimeWentBackwards,
}

/// outcome of executing a pending request: either applied, or cancelled with
/// a typed reason and all locked inputs refunded. cancellation is an expected
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome<T> {
    Executed(T),
    Cancelled(CancelReason),
}

impl<T> ExecutionOutcome<T> {
    pub fn executed(self) -> Option<T> {
        match self {
            ExecutionOutcome::Executed(t) => Some(t),
            ExecutionOutcome::Cancelled(_) => None,
        }
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            ExecutionOutcome::Executed(_) => None,
            ExecutionOutcome::Cancelled(r) => Some(*r),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositResult {
    pub market: MarketId,
    pub account: AccountId,
    pub shares_minted: Decimal,
    pub deposit_value_usd: Usd,
    pub price_impact_usd: Usd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalResult {
    pub market: MarketId,
    pub account: AccountId,
    pub shares_burned: Decimal,
    pub long_token_out: Amount,
    pub short_token_out: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftResult {
    pub from_market: MarketId,
    pub to_market: MarketId,
    pub account: AccountId,
    pub shares_burned: Decimal,
    pub shares_minted: Decimal,
    pub value_moved_usd: Usd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreaseResult {
    pub market: MarketId,
    pub account: AccountId,
    pub size_delta_usd: Usd,
    pub execution_price: Decimal,
    pub price_impact_usd: Usd,
    pub fees_usd: Usd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecreaseResult {
    pub market: MarketId,
    pub account: AccountId,
    pub size_delta_usd: Usd,
    pub execution_price: Decimal,
    pub realized_pnl_usd: Usd,
    pub price_impact_usd: Usd,
    pub fees_usd: Usd,
    /// tokens paid out to the account, per token.
    pub payouts: Vec<(TokenId, Amount)>,
    pub closed: bool,
}

/// What a position request did once executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionOutcome {
    Increased(IncreaseResult),
    Decreased(DecreaseResult),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    pub market: MarketId,
    pub account: AccountId,
    pub size_liquidated_usd: Usd,
    pub remaining_collateral_usd: Usd,
    /// portion of what the account owed that its collateral could not cover.
    pub insolvent_shortfall_usd: Usd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDepositResult {
    pub vault: VaultId,
    pub market: MarketId,
    pub account: AccountId,
    pub vault_shares_minted: Decimal,
    pub market_shares_added: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultWithdrawalResult {
    pub vault: VaultId,
    pub market: MarketId,
    pub account: AccountId,
    pub vault_shares_burned: Decimal,
    pub long_token_out: Amount,
    pub short_token_out: Amount,
}

/// Outcome of a keeper rebalance moving vault liquidity between markets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultShiftResult {
    pub vault: VaultId,
    pub from_market: MarketId,
    pub to_market: MarketId,
    pub market_shares_moved: Decimal,
    pub market_shares_received: Decimal,
}

/// read-only snapshot of a position with its pending costs at given prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub size_in_usd: Usd,
    pub collateral_amount: Amount,
    pub collateral_usd: Usd,
    pub pnl_usd: Usd,
    pub pending_borrowing_usd: Usd,
    pub pending_funding_usd: Usd,
    pub leverage: Option<Decimal>,
    pub liquidatable: bool,
}
