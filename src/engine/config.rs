// 14.1: engine-level configuration and access roles.

use serde::{Deserialize, Serialize};

use crate::types::AccountId;

/// roles an account may hold. keepers execute and cancel pending requests and
/// run liquidations; config holders register markets and vaults, set claim
/// factors and grant roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Keeper,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// bounded event log capacity. oldest events are dropped past this.
    pub max_events: usize,
    /// print executed events to stdout as they happen.
    pub verbose: bool,
    /// maximum age of a keeper price context, in seconds. execution with
    /// older prices cancels the request instead of applying it.
    pub max_price_age_secs: i64,
    /// receiver of the claimable-collateral credit booked when an insolvent
    /// close leaves an unpayable shortfall. if unset, liquidations that would
    /// need it fail closed.
    pub holding_account: Option<AccountId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            verbose: false,
            max_price_age_secs: 60,
            holding_account: None,
        }
    }
}
