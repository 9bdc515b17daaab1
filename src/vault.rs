// 12.0: vault aggregator. a vault owns market-share balances across a
// whitelisted set of markets that all trade the same long/short pair, and
// issues its own share on top. valuation and the deposit/withdraw/shift
// plumbing live in engine/vault.rs; this module is the entity and its
// listing/cap rules.

use crate::types::{MarketId, TokenId, Usd, VaultId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultMarketCaps {
    /// Max market-share balance the vault may hold in this market.
    pub max_share_balance: Decimal,
    /// Max USD value of that balance.
    pub max_balance_usd: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub name: String,
    pub long_token: TokenId,
    pub short_token: TokenId,
    markets: HashMap<MarketId, VaultMarketCaps>,
    share_balance: HashMap<MarketId, Decimal>,
    pub share_supply: Decimal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VaultError {
    #[error("Vault {0:?} not found")]
    VaultNotFound(VaultId),

    #[error("Market {0:?} already listed in vault {1:?}")]
    MarketAlreadyListed(MarketId, VaultId),

    #[error("Market {0:?} not listed in vault {1:?}")]
    MarketNotListed(MarketId, VaultId),

    #[error("Market {0:?} token pair does not match vault {1:?}")]
    PairMismatch(MarketId, VaultId),

    #[error("Balance cap exceeded for market {0:?} in vault {1:?}")]
    CapExceeded(MarketId, VaultId),

    #[error("Insufficient vault share balance in market {0:?}")]
    InsufficientShareBalance(MarketId),
}

impl Vault {
    pub fn new(id: VaultId, name: String, long_token: TokenId, short_token: TokenId) -> Self {
        Self {
            id,
            name,
            long_token,
            short_token,
            markets: HashMap::new(),
            share_balance: HashMap::new(),
            share_supply: Decimal::ZERO,
        }
    }

    /// List a market. The pair check against the market's config happens in
    /// the engine; this enforces the whitelist itself.
    pub fn add_market(&mut self, market: MarketId, caps: VaultMarketCaps) -> Result<(), VaultError> {
        if self.markets.contains_key(&market) {
            return Err(VaultError::MarketAlreadyListed(market, self.id));
        }
        self.markets.insert(market, caps);
        Ok(())
    }

    pub fn is_listed(&self, market: MarketId) -> bool {
        self.markets.contains_key(&market)
    }

    pub fn caps(&self, market: MarketId) -> Result<&VaultMarketCaps, VaultError> {
        self.markets
            .get(&market)
            .ok_or(VaultError::MarketNotListed(market, self.id))
    }

    pub fn markets(&self) -> impl Iterator<Item = MarketId> + '_ {
        self.markets.keys().copied()
    }

    pub fn share_balance(&self, market: MarketId) -> Decimal {
        self.share_balance.get(&market).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn add_share_balance(&mut self, market: MarketId, shares: Decimal) {
        debug_assert!(shares >= Decimal::ZERO);
        *self.share_balance.entry(market).or_insert(Decimal::ZERO) += shares;
    }

    pub fn sub_share_balance(&mut self, market: MarketId, shares: Decimal) -> Result<(), VaultError> {
        let balance = self.share_balance.entry(market).or_insert(Decimal::ZERO);
        if shares > *balance {
            return Err(VaultError::InsufficientShareBalance(market));
        }
        *balance -= shares;
        Ok(())
    }

    /// Would holding `share_balance` (valued at `share_price`) breach this
    /// market's caps?
    pub fn validate_caps(
        &self,
        market: MarketId,
        share_balance: Decimal,
        share_price: Decimal,
    ) -> Result<(), VaultError> {
        let caps = self.caps(market)?;
        let value = Usd::new(share_balance * share_price);
        if share_balance > caps.max_share_balance || value.value() > caps.max_balance_usd {
            return Err(VaultError::CapExceeded(market, self.id));
        }
        Ok(())
    }
}
