// 14.0: the engine. owns all market/position/request/claim/vault state and
// orchestrates the two-phase request lifecycle: create locks inputs, execute
// applies economic effects at keeper-supplied prices, cancel refunds.
// deterministic and event-driven with no external I/O.

mod config;
mod core;
mod accrual;
mod liquidity;
mod positions;
mod liquidations;
mod vault;
mod results;

pub use config::{EngineConfig, Role};
pub use core::{Engine, Market};
pub use results::{
    DecreaseResult, DepositResult, EngineError, ExecutionOutcome, IncreaseResult,
    LiquidationOutcome, PositionInfo, PositionOutcome, ShiftResult, VaultDepositResult,
    VaultShiftResult, VaultWithdrawalResult, WithdrawalResult,
};
