// 3.0: market configuration and pool state. a market is a pool of two tokens
// (long/short) backing leveraged positions in one index asset. all monetary
// state for a market lives in its PoolState record and nowhere else, so the
// conservation invariant is checkable in one place.
// 3.1 has the open-interest ledger, 3.2 the pool mutation/validation logic.

use crate::fees::{BorrowingParams, FeeParams};
use crate::funding::{FundingParams, FundingState};
use crate::liquidation::LiquidationParams;
use crate::pnl::PnlFactorParams;
use crate::price_impact::{PositionImpactParams, SwapImpactParams};
use crate::prices::{PriceContext, PriceError};
use crate::types::{Amount, MarketId, Side, Timestamp, TokenId, Usd};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarketStatus {
    #[default]
    Active,
    /// Trading paused (e.g. during parameter migration or emergency)
    Paused,
    /// Market is closed permanently
    Closed,
}

/// Which of the market's two pool slots a token amount belongs to.
/// Single-asset markets have long_token == short_token but still keep the
/// two slots separate in accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolToken {
    LongToken,
    ShortToken,
}

impl PoolToken {
    pub fn opposite(&self) -> Self {
        match self {
            PoolToken::LongToken => PoolToken::ShortToken,
            PoolToken::ShortToken => PoolToken::LongToken,
        }
    }

    fn idx(&self) -> usize {
        match self {
            PoolToken::LongToken => 0,
            PoolToken::ShortToken => 1,
        }
    }
}

fn side_idx(side: Side) -> usize {
    match side {
        Side::Long => 0,
        Side::Short => 1,
    }
}

/// Static market configuration (immutable after creation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Human-readable name (e.g. "ETH/USD [ETH-USDC]")
    pub name: String,
    pub long_token: TokenId,
    pub short_token: TokenId,
    /// Price reference for positions. May equal long_token.
    pub index_token: TokenId,
    /// Measure OI imbalance for funding/impact in token units instead of USD.
    /// Explicit per-market flag; the two modes can produce materially
    /// different impact signs at the edges.
    pub oi_in_tokens_for_imbalance: bool,
    /// Fraction of the pool that open interest may reserve (per side).
    pub reserve_factor: Decimal,
    /// Hard cap on open interest USD per side.
    pub max_open_interest_usd: Decimal,
    pub swap_impact: SwapImpactParams,
    pub position_impact: PositionImpactParams,
    pub fees: FeeParams,
    pub borrowing: BorrowingParams,
    pub funding: FundingParams,
    pub liquidation: LiquidationParams,
    pub pnl_factors: PnlFactorParams,
    /// Shares the very first deposit must mint to the placeholder receiver.
    pub min_first_deposit_shares: Decimal,
    /// Floor below which the position impact pool stops distributing.
    pub min_position_impact_pool: Amount,
    /// Index tokens per second released from the impact pool into pool value.
    pub position_impact_distribution_rate: Decimal,
}

impl MarketConfig {
    /// Default ETH/USD market backed by an ETH-USDC pool.
    pub fn eth_usd(id: MarketId, eth: TokenId, usdc: TokenId) -> Self {
        Self {
            id,
            name: "ETH/USD [ETH-USDC]".to_string(),
            long_token: eth,
            short_token: usdc,
            index_token: eth,
            oi_in_tokens_for_imbalance: false,
            reserve_factor: dec!(0.95),
            max_open_interest_usd: dec!(1_000_000_000),
            swap_impact: SwapImpactParams::default(),
            position_impact: PositionImpactParams::default(),
            fees: FeeParams::default(),
            borrowing: BorrowingParams::default(),
            funding: FundingParams::default(),
            liquidation: LiquidationParams::default(),
            pnl_factors: PnlFactorParams::default(),
            min_first_deposit_shares: dec!(1),
            min_position_impact_pool: Amount::zero(),
            position_impact_distribution_rate: Decimal::ZERO,
        }
    }

    pub fn token(&self, slot: PoolToken) -> TokenId {
        match slot {
            PoolToken::LongToken => self.long_token,
            PoolToken::ShortToken => self.short_token,
        }
    }

    /// Resolve a collateral token to its pool slot. For single-asset markets
    /// the long slot wins.
    pub fn pool_token_for(&self, token: TokenId) -> Option<PoolToken> {
        if token == self.long_token {
            Some(PoolToken::LongToken)
        } else if token == self.short_token {
            Some(PoolToken::ShortToken)
        } else {
            None
        }
    }

    pub fn is_single_asset(&self) -> bool {
        self.long_token == self.short_token
    }

    pub fn same_pair(&self, other: &MarketConfig) -> bool {
        self.long_token == other.long_token && self.short_token == other.short_token
    }
}

// 3.1: open interest ledger. notional and token-denominated size per
// (collateral slot, position side). both are needed: USD for fees and caps,
// tokens for pnl and the token-weighted imbalance mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenInterest {
    usd: [[Decimal; 2]; 2],
    tokens: [[Decimal; 2]; 2],
}

impl OpenInterest {
    pub fn apply(
        &mut self,
        slot: PoolToken,
        side: Side,
        usd_delta: Decimal,
        tokens_delta: Decimal,
    ) {
        let u = &mut self.usd[slot.idx()][side_idx(side)];
        *u = (*u + usd_delta).max(Decimal::ZERO);
        let t = &mut self.tokens[slot.idx()][side_idx(side)];
        *t = (*t + tokens_delta).max(Decimal::ZERO);
    }

    pub fn usd_for(&self, slot: PoolToken, side: Side) -> Decimal {
        self.usd[slot.idx()][side_idx(side)]
    }

    pub fn usd_by_side(&self, side: Side) -> Decimal {
        self.usd[0][side_idx(side)] + self.usd[1][side_idx(side)]
    }

    pub fn tokens_by_side(&self, side: Side) -> Decimal {
        self.tokens[0][side_idx(side)] + self.tokens[1][side_idx(side)]
    }

    pub fn total_usd(&self) -> Decimal {
        self.usd_by_side(Side::Long) + self.usd_by_side(Side::Short)
    }

    /// Imbalance measured per the market flag: (long - short, total), either
    /// in USD or in index-token units.
    pub fn imbalance(&self, in_tokens: bool) -> (Decimal, Decimal) {
        if in_tokens {
            let long = self.tokens_by_side(Side::Long);
            let short = self.tokens_by_side(Side::Short);
            (long - short, long + short)
        } else {
            let long = self.usd_by_side(Side::Long);
            let short = self.usd_by_side(Side::Short);
            (long - short, long + short)
        }
    }
}

// 3.2: dynamic pool state. every deposit, withdrawal, position action, shift
// and claim flows through this one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    pub status: MarketStatus,
    pool_amount: [Amount; 2],
    swap_impact_pool: [Amount; 2],
    /// Index-token units held back from traders' negative position impact,
    /// paid out again on positive impact.
    pub position_impact_pool: Amount,
    /// Impact pool already released by the scheduled distribution; counted
    /// into pool value until trimmed from position_impact_pool.
    pub last_impact_distribution: Timestamp,
    pub open_interest: OpenInterest,
    pub cumulative_borrowing_factor: [Decimal; 2],
    pub last_borrowing_update: Timestamp,
    pub funding: FundingState,
    /// Protocol fee cut per pool slot, claimable by governance.
    claimable_fee: [Amount; 2],
    pub share_supply: Decimal,
}

impl PoolState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            status: MarketStatus::Active,
            pool_amount: [Amount::zero(), Amount::zero()],
            swap_impact_pool: [Amount::zero(), Amount::zero()],
            position_impact_pool: Amount::zero(),
            last_impact_distribution: timestamp,
            open_interest: OpenInterest::default(),
            cumulative_borrowing_factor: [Decimal::ZERO, Decimal::ZERO],
            last_borrowing_update: timestamp,
            funding: FundingState::new(timestamp),
            claimable_fee: [Amount::zero(), Amount::zero()],
            share_supply: Decimal::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn pool_amount(&self, slot: PoolToken) -> Amount {
        self.pool_amount[slot.idx()]
    }

    pub fn add_pool_amount(&mut self, slot: PoolToken, amount: Amount) {
        debug_assert!(!amount.is_negative());
        self.pool_amount[slot.idx()] = self.pool_amount[slot.idx()].add(amount);
    }

    pub fn sub_pool_amount(&mut self, slot: PoolToken, amount: Amount) -> Result<(), MarketError> {
        debug_assert!(!amount.is_negative());
        let current = self.pool_amount[slot.idx()];
        if amount > current {
            return Err(MarketError::InsufficientPoolAmount {
                requested: amount,
                available: current,
            });
        }
        self.pool_amount[slot.idx()] = current.sub(amount);
        Ok(())
    }

    pub fn swap_impact_pool(&self, slot: PoolToken) -> Amount {
        self.swap_impact_pool[slot.idx()]
    }

    pub fn add_swap_impact(&mut self, slot: PoolToken, amount: Amount) {
        self.swap_impact_pool[slot.idx()] = self.swap_impact_pool[slot.idx()].add(amount);
    }

    /// Pay positive swap impact out of the impact pool, capped at its balance.
    /// The excess is dropped, never deferred.
    pub fn take_swap_impact(&mut self, slot: PoolToken, requested: Amount) -> Amount {
        let available = self.swap_impact_pool[slot.idx()];
        let paid = requested.min(available);
        self.swap_impact_pool[slot.idx()] = available.sub(paid);
        paid
    }

    pub fn claimable_fee(&self, slot: PoolToken) -> Amount {
        self.claimable_fee[slot.idx()]
    }

    pub fn add_claimable_fee(&mut self, slot: PoolToken, amount: Amount) {
        self.claimable_fee[slot.idx()] = self.claimable_fee[slot.idx()].add(amount);
    }

    pub fn take_claimable_fee(&mut self, slot: PoolToken) -> Amount {
        std::mem::replace(&mut self.claimable_fee[slot.idx()], Amount::zero())
    }

    /// Pool USD value without pnl/impact adjustments (those live in pnl.rs).
    pub fn token_balances_usd(
        &self,
        config: &MarketConfig,
        prices: &PriceContext,
        maximize: bool,
    ) -> Result<Usd, PriceError> {
        let long = prices.usd_value(
            config.long_token,
            self.pool_amount(PoolToken::LongToken).value(),
            maximize,
        )?;
        let short = prices.usd_value(
            config.short_token,
            self.pool_amount(PoolToken::ShortToken).value(),
            maximize,
        )?;
        Ok(long.add(short))
    }

    /// USD reserved by open interest on one side. Longs reserve index-token
    /// exposure (valued at the current price), shorts reserve their notional.
    pub fn reserved_usd(
        &self,
        config: &MarketConfig,
        prices: &PriceContext,
        side: Side,
    ) -> Result<Usd, PriceError> {
        match side {
            Side::Long => {
                let index_price = prices.price(config.index_token)?;
                Ok(Usd::new(
                    self.open_interest.tokens_by_side(Side::Long) * index_price.max,
                ))
            }
            Side::Short => Ok(Usd::new(self.open_interest.usd_by_side(Side::Short))),
        }
    }

    /// Reserve check: reserved USD on a side must stay within
    /// reserve_factor of that side's pool slot value.
    pub fn validate_reserve(
        &self,
        config: &MarketConfig,
        prices: &PriceContext,
        side: Side,
    ) -> Result<(), MarketError> {
        let slot = match side {
            Side::Long => PoolToken::LongToken,
            Side::Short => PoolToken::ShortToken,
        };
        let pool_usd = prices.usd_value(config.token(slot), self.pool_amount(slot).value(), false)?;
        let max_reserved = pool_usd.mul(config.reserve_factor);
        let reserved = self.reserved_usd(config, prices, side)?;
        if reserved > max_reserved {
            return Err(MarketError::InsufficientReserve {
                side,
                reserved,
                max_reserved,
            });
        }
        Ok(())
    }

    pub fn validate_open_interest_cap(
        &self,
        config: &MarketConfig,
        side: Side,
    ) -> Result<(), MarketError> {
        let oi = self.open_interest.usd_by_side(side);
        if oi > config.max_open_interest_usd {
            return Err(MarketError::OpenInterestCapExceeded {
                side,
                open_interest: Usd::new(oi),
                cap: Usd::new(config.max_open_interest_usd),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketError {
    #[error("Market {0:?} not found")]
    MarketNotFound(MarketId),

    #[error("Market {0:?} is not active")]
    MarketNotActive(MarketId),

    #[error("Token {token:?} is not a pool token of market {market:?}")]
    InvalidCollateralToken { market: MarketId, token: TokenId },

    #[error("Insufficient pool amount: requested {requested}, available {available}")]
    InsufficientPoolAmount { requested: Amount, available: Amount },

    #[error("Insufficient reserve on {side:?}: reserved {reserved}, max {max_reserved}")]
    InsufficientReserve {
        side: Side,
        reserved: Usd,
        max_reserved: Usd,
    },

    #[error("Open interest cap exceeded on {side:?}: {open_interest} > {cap}")]
    OpenInterestCapExceeded {
        side: Side,
        open_interest: Usd,
        cap: Usd,
    },

    #[error("Markets {0:?} and {1:?} do not share a token pair")]
    TokenPairMismatch(MarketId, MarketId),

    #[error(transparent)]
    Price(#[from] PriceError),
}
