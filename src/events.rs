// 13.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists
// all event types; the engine keeps a bounded in-memory log.

use crate::position::PositionKey;
use crate::request::CancelReason;
use crate::types::{
    AccountId, Amount, MarketId, RequestId, Side, TimeBucket, Timestamp, TokenId, Usd, VaultId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // liquidity events
    DepositExecuted(DepositExecutedEvent),
    WithdrawalExecuted(WithdrawalExecutedEvent),
    ShiftExecuted(ShiftExecutedEvent),
    RequestCancelled(RequestCancelledEvent),

    // position events
    PositionIncreased(PositionIncreasedEvent),
    PositionDecreased(PositionDecreasedEvent),
    PositionLiquidated(PositionLiquidatedEvent),

    // accrual events
    FundingUpdated(FundingUpdatedEvent),
    BorrowingUpdated(BorrowingUpdatedEvent),
    ImpactPoolDistributed(ImpactPoolDistributedEvent),

    // claim events
    ClaimableCollateralCredited(ClaimableCollateralCreditedEvent),
    ClaimableFundingCredited(ClaimableFundingCreditedEvent),
    CollateralClaimed(CollateralClaimedEvent),
    FundingClaimed(FundingClaimedEvent),

    // vault events
    VaultDepositExecuted(VaultDepositExecutedEvent),
    VaultWithdrawalExecuted(VaultWithdrawalExecutedEvent),
    VaultShifted(VaultShiftedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositExecutedEvent {
    pub request_id: RequestId,
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub long_amount: Amount,
    pub short_amount: Amount,
    pub shares_minted: Decimal,
    pub price_impact_usd: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalExecutedEvent {
    pub request_id: RequestId,
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub shares_burned: Decimal,
    pub long_amount_out: Amount,
    pub short_amount_out: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftExecutedEvent {
    pub request_id: RequestId,
    pub from_market: MarketId,
    pub to_market: MarketId,
    pub account_id: AccountId,
    pub shares_burned: Decimal,
    pub shares_minted: Decimal,
    pub price_impact_usd: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCancelledEvent {
    pub request_id: RequestId,
    pub account_id: AccountId,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionIncreasedEvent {
    pub key: PositionKey,
    pub size_delta_usd: Usd,
    pub collateral_delta: Amount,
    pub execution_price: Decimal,
    pub price_impact_usd: Usd,
    pub funding_fee_usd: Usd,
    pub borrowing_fee_usd: Usd,
    pub position_fee_usd: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionDecreasedEvent {
    pub key: PositionKey,
    pub size_delta_usd: Usd,
    pub collateral_delta: Amount,
    pub execution_price: Decimal,
    pub price_impact_usd: Usd,
    pub realized_pnl_usd: Usd,
    pub funding_fee_usd: Usd,
    pub borrowing_fee_usd: Usd,
    pub position_fee_usd: Usd,
    /// (token, amount) pairs credited to the account.
    pub payouts: Vec<(TokenId, Amount)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub key: PositionKey,
    pub size_in_usd: Usd,
    pub remaining_collateral_usd: Usd,
    /// Shortfall parked for the holding account, zero on a solvent close.
    pub insolvent_shortfall_usd: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingUpdatedEvent {
    pub market_id: MarketId,
    pub factor_per_second: Decimal,
    pub longs_pay_shorts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowingUpdatedEvent {
    pub market_id: MarketId,
    pub side: Side,
    pub cumulative_factor: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactPoolDistributedEvent {
    pub market_id: MarketId,
    pub amount: Amount,
    pub remaining_pool: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimableCollateralCreditedEvent {
    pub market_id: MarketId,
    pub token: TokenId,
    pub account_id: AccountId,
    pub time_bucket: TimeBucket,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimableFundingCreditedEvent {
    pub market_id: MarketId,
    pub token: TokenId,
    pub account_id: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralClaimedEvent {
    pub market_id: MarketId,
    pub token: TokenId,
    pub account_id: AccountId,
    pub time_bucket: TimeBucket,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingClaimedEvent {
    pub market_id: MarketId,
    pub token: TokenId,
    pub account_id: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultDepositExecutedEvent {
    pub request_id: RequestId,
    pub vault_id: VaultId,
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub market_shares_received: Decimal,
    pub vault_shares_minted: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultWithdrawalExecutedEvent {
    pub request_id: RequestId,
    pub vault_id: VaultId,
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub vault_shares_burned: Decimal,
    pub long_amount_out: Amount,
    pub short_amount_out: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultShiftedEvent {
    pub vault_id: VaultId,
    pub from_market: MarketId,
    pub to_market: MarketId,
    pub shares_moved: Decimal,
    pub shares_received: Decimal,
}
