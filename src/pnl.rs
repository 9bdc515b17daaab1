// 7.0: pnl and pool valuation. position pnl restates sizeInUsd against the
// current index price; market pnl aggregates per side from open interest.
// pool value subtracts traders' net pnl, capped so one side's unrealized
// profit can never imply pool insolvency, and accounts for the scheduled
// position-impact-pool release.

use crate::market::{MarketConfig, PoolState};
use crate::prices::{PriceContext, PriceError};
use crate::types::{Amount, Side, Timestamp, Usd};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Max fraction of pool value that traders' net pnl may consume, per context.
/// Withdrawals use the tightest bound so LPs cannot exit ahead of losses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlFactorParams {
    pub for_traders: Decimal,
    pub for_deposits: Decimal,
    pub for_withdrawals: Decimal,
}

impl Default for PnlFactorParams {
    fn default() -> Self {
        Self {
            for_traders: dec!(0.9),
            for_deposits: dec!(0.8),
            for_withdrawals: dec!(0.7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlContext {
    Traders,
    Deposits,
    Withdrawals,
}

impl PnlFactorParams {
    pub fn factor(&self, context: PnlContext) -> Decimal {
        match context {
            PnlContext::Traders => self.for_traders,
            PnlContext::Deposits => self.for_deposits,
            PnlContext::Withdrawals => self.for_withdrawals,
        }
    }
}

/// Position pnl at the given index price.
pub fn position_pnl_usd(
    size_in_usd: Usd,
    size_in_tokens: Amount,
    side: Side,
    index_price: Decimal,
) -> Usd {
    let current_value = size_in_tokens.value() * index_price;
    match side {
        Side::Long => Usd::new(current_value - size_in_usd.value()),
        Side::Short => Usd::new(size_in_usd.value() - current_value),
    }
}

/// Aggregate pnl of one side of the market. `maximize` picks the price side
/// that maximizes the result (max price for longs, min for shorts).
pub fn market_pnl_usd(
    pool: &PoolState,
    config: &MarketConfig,
    prices: &PriceContext,
    side: Side,
    maximize: bool,
) -> Result<Usd, PriceError> {
    let index_price = prices.price(config.index_token)?;
    let price = match side {
        Side::Long => index_price.pick(maximize),
        Side::Short => index_price.pick(!maximize),
    };
    let oi_usd = Usd::new(pool.open_interest.usd_by_side(side));
    let oi_tokens = Amount::new(pool.open_interest.tokens_by_side(side));
    Ok(position_pnl_usd(oi_usd, oi_tokens, side, price))
}

pub fn net_pnl_usd(
    pool: &PoolState,
    config: &MarketConfig,
    prices: &PriceContext,
    maximize: bool,
) -> Result<Usd, PriceError> {
    let long = market_pnl_usd(pool, config, prices, Side::Long, maximize)?;
    let short = market_pnl_usd(pool, config, prices, Side::Short, maximize)?;
    Ok(long.add(short))
}

/// Index tokens the scheduled distribution has released since the last
/// mutation, bounded so the pool never drops below its configured floor.
pub fn pending_impact_distribution(
    config: &MarketConfig,
    pool: &PoolState,
    now: Timestamp,
) -> Amount {
    if config.position_impact_distribution_rate.is_zero() {
        return Amount::zero();
    }
    let headroom = pool
        .position_impact_pool
        .sub(config.min_position_impact_pool);
    if !headroom.is_positive() {
        return Amount::zero();
    }
    let elapsed = pool.last_impact_distribution.elapsed_secs(&now);
    let released = Amount::new(config.position_impact_distribution_rate * elapsed);
    released.min(headroom)
}

/// Pool value: token balances, minus the value still held back in the
/// position impact pool (net of the scheduled release), minus traders'
/// capped net pnl.
pub fn pool_value_usd(
    config: &MarketConfig,
    pool: &PoolState,
    prices: &PriceContext,
    now: Timestamp,
    context: PnlContext,
    maximize: bool,
) -> Result<Usd, PriceError> {
    let balances = pool.token_balances_usd(config, prices, maximize)?;

    let index_price = prices.price(config.index_token)?;
    let held_back = pool
        .position_impact_pool
        .sub(pending_impact_distribution(config, pool, now));
    // held-back value is subtracted, so maximizing pool value prices it low
    let impact_pool_value = Usd::new(held_back.value() * index_price.pick(!maximize));

    // pnl subtracted: when maximizing pool value, take the pnl side that
    // minimizes the deduction.
    let net_pnl = net_pnl_usd(pool, config, prices, !maximize)?;
    let capped_pnl = if net_pnl.is_positive() {
        let cap = balances.mul(config.pnl_factors.factor(context));
        net_pnl.min(cap)
    } else {
        // traders are net losing: the pool keeps the gain uncapped
        net_pnl
    };

    Ok(balances.sub(impact_pool_value).sub(capped_pnl))
}

/// Market-share price: pool value / supply, 1.0 on an empty pool.
pub fn share_price(pool_value: Usd, supply: Decimal) -> Decimal {
    if supply.is_zero() {
        Decimal::ONE
    } else {
        pool_value.value() / supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PoolToken;
    use crate::prices::Price;
    use crate::types::{MarketId, TokenId};
    use rust_decimal_macros::dec;

    fn eth() -> TokenId {
        TokenId(1)
    }

    fn usdc() -> TokenId {
        TokenId(2)
    }

    fn config() -> MarketConfig {
        MarketConfig::eth_usd(MarketId(1), eth(), usdc())
    }

    fn prices(eth_price: Decimal) -> PriceContext {
        PriceContext::new(Timestamp::from_secs(0))
            .with_price(eth(), Price::exact(eth_price))
            .with_price(usdc(), Price::exact(dec!(1)))
    }

    fn seeded_pool() -> PoolState {
        let mut pool = PoolState::new(Timestamp::from_secs(0));
        pool.add_pool_amount(PoolToken::LongToken, Amount::new(dec!(10)));
        pool.add_pool_amount(PoolToken::ShortToken, Amount::new(dec!(50_000)));
        pool
    }

    #[test]
    fn position_pnl_both_sides() {
        // 2 ETH long opened at $5000
        let long = position_pnl_usd(
            Usd::new(dec!(10_000)),
            Amount::new(dec!(2)),
            Side::Long,
            dec!(6000),
        );
        assert_eq!(long.value(), dec!(2000));

        let short = position_pnl_usd(
            Usd::new(dec!(10_000)),
            Amount::new(dec!(2)),
            Side::Short,
            dec!(6000),
        );
        assert_eq!(short.value(), dec!(-2000));
    }

    #[test]
    fn pool_value_without_positions() {
        let pool = seeded_pool();
        let value = pool_value_usd(
            &config(),
            &pool,
            &prices(dec!(5000)),
            Timestamp::from_secs(0),
            PnlContext::Deposits,
            true,
        )
        .unwrap();
        assert_eq!(value.value(), dec!(100_000));
        assert_eq!(share_price(value, Decimal::ZERO), dec!(1));
    }

    #[test]
    fn trader_profit_reduces_pool_value() {
        let mut pool = seeded_pool();
        // 1 ETH long opened at $5000
        pool.open_interest
            .apply(PoolToken::LongToken, Side::Long, dec!(5000), dec!(1));

        let value = pool_value_usd(
            &config(),
            &pool,
            &prices(dec!(6000)),
            Timestamp::from_secs(0),
            PnlContext::Traders,
            true,
        )
        .unwrap();
        // balances at 6000: 10*6000 + 50000 = 110_000; trader pnl = +1000
        assert_eq!(value.value(), dec!(109_000));
    }

    #[test]
    fn pnl_cap_prevents_insolvency() {
        let mut config = config();
        config.pnl_factors.for_traders = dec!(0.1);
        let mut pool = seeded_pool();
        // huge winning long: 10 ETH at entry $1000
        pool.open_interest
            .apply(PoolToken::LongToken, Side::Long, dec!(10_000), dec!(10));

        let value = pool_value_usd(
            &config,
            &pool,
            &prices(dec!(5000)),
            Timestamp::from_secs(0),
            PnlContext::Traders,
            true,
        )
        .unwrap();
        // balances = 100_000; raw pnl = 40_000 but cap = 10_000
        assert_eq!(value.value(), dec!(90_000));
    }

    #[test]
    fn trader_losses_uncapped() {
        let mut pool = seeded_pool();
        pool.open_interest
            .apply(PoolToken::LongToken, Side::Long, dec!(50_000), dec!(10));

        let value = pool_value_usd(
            &config(),
            &pool,
            &prices(dec!(4000)),
            Timestamp::from_secs(0),
            PnlContext::Traders,
            true,
        )
        .unwrap();
        // balances = 10*4000 + 50_000 = 90_000; pnl = -10_000 adds to pool
        assert_eq!(value.value(), dec!(100_000));
    }

    #[test]
    fn impact_pool_held_back_and_released() {
        let mut config = config();
        config.position_impact_distribution_rate = dec!(0.001); // tokens/sec
        config.min_position_impact_pool = Amount::new(dec!(0.5));

        let mut pool = seeded_pool();
        pool.position_impact_pool = Amount::new(dec!(2));

        // at t=0 the full 2 tokens are held back
        let v0 = pool_value_usd(
            &config,
            &pool,
            &prices(dec!(5000)),
            Timestamp::from_secs(0),
            PnlContext::Deposits,
            true,
        )
        .unwrap();
        assert_eq!(v0.value(), dec!(100_000) - dec!(2) * dec!(5000));

        // after 1000s, 1 token has leaked back into pool value
        let v1 = pool_value_usd(
            &config,
            &pool,
            &prices(dec!(5000)),
            Timestamp::from_secs(1000),
            PnlContext::Deposits,
            true,
        )
        .unwrap();
        assert_eq!(v1.value(), dec!(100_000) - dec!(1) * dec!(5000));
        assert!(v1 > v0);

        // release never drops the pool below its floor
        let v_late = pool_value_usd(
            &config,
            &pool,
            &prices(dec!(5000)),
            Timestamp::from_secs(100_000),
            PnlContext::Deposits,
            true,
        )
        .unwrap();
        assert_eq!(v_late.value(), dec!(100_000) - dec!(0.5) * dec!(5000));
    }

    #[test]
    fn share_price_tracks_pool_value() {
        assert_eq!(share_price(Usd::new(dec!(150_000)), dec!(100_000)), dec!(1.5));
        assert_eq!(share_price(Usd::zero(), Decimal::ZERO), dec!(1));
    }
}
