// 14.3 engine/accrual.rs: time-based accrual. every mutating market
// operation calls touch_market first so borrowing indices, funding indices
// and the scheduled impact-pool distribution are current before any position
// or pool math runs.

use rust_decimal::Decimal;

use super::core::Engine;
use super::results::EngineError;
use crate::events::{BorrowingUpdatedEvent, EventPayload, FundingUpdatedEvent, ImpactPoolDistributedEvent};
use crate::fees::{borrowing_factor_per_second, next_cumulative_borrowing_factor};
use crate::funding::next_funding;
use crate::market::PoolToken;
use crate::pnl::pending_impact_distribution;
use crate::prices::PriceContext;
use crate::types::{MarketId, Side};

pub(super) fn side_slot(side: Side) -> PoolToken {
    match side {
        Side::Long => PoolToken::LongToken,
        Side::Short => PoolToken::ShortToken,
    }
}

fn side_idx(side: Side) -> usize {
    match side {
        Side::Long => 0,
        Side::Short => 1,
    }
}

impl Engine {
    /// Roll the market's accrual indices forward to the current time.
    pub(super) fn touch_market(
        &mut self,
        market_id: MarketId,
        prices: &PriceContext,
    ) -> Result<(), EngineError> {
        let now = self.current_time;
        let config = self.market(market_id)?.config.clone();
        let mut payloads = Vec::new();

        {
            let market = self.market_mut(market_id)?;
            let pool = &mut market.pool;

            // borrowing: integrate the per-second rate since the last update,
            // per side, using current reserves and pool depth.
            let elapsed = pool.last_borrowing_update.elapsed_secs(&now);
            if elapsed > Decimal::ZERO {
                for side in [Side::Long, Side::Short] {
                    let reserved = pool.reserved_usd(&config, prices, side)?;
                    let slot = side_slot(side);
                    let pool_usd = prices.usd_value(
                        config.token(slot),
                        pool.pool_amount(slot).value(),
                        false,
                    )?;
                    let rate =
                        borrowing_factor_per_second(&config.borrowing, side, reserved, pool_usd);
                    let idx = side_idx(side);
                    pool.cumulative_borrowing_factor[idx] = next_cumulative_borrowing_factor(
                        pool.cumulative_borrowing_factor[idx],
                        rate,
                        elapsed,
                    );
                    payloads.push(EventPayload::BorrowingUpdated(BorrowingUpdatedEvent {
                        market_id,
                        side,
                        cumulative_factor: pool.cumulative_borrowing_factor[idx],
                    }));
                }
                pool.last_borrowing_update = now;
            }

            // funding: recompute the velocity-adjusted rate and accrue the
            // paid/received indices at the previously saved rate.
            let (skew, total) = pool
                .open_interest
                .imbalance(config.oi_in_tokens_for_imbalance);
            let long_oi = pool.open_interest.usd_by_side(Side::Long);
            let short_oi = pool.open_interest.usd_by_side(Side::Short);
            let next = next_funding(
                &config.funding,
                &pool.funding,
                long_oi,
                short_oi,
                skew,
                total,
                now,
            );
            let changed = next.factor_per_second != pool.funding.saved_factor_per_second;
            next.apply(&mut pool.funding);
            if changed {
                payloads.push(EventPayload::FundingUpdated(FundingUpdatedEvent {
                    market_id,
                    factor_per_second: next.factor_per_second,
                    longs_pay_shorts: next.longs_pay_shorts,
                }));
            }

            // scheduled impact-pool release into pool value.
            let released = pending_impact_distribution(&config, pool, now);
            if released.is_positive() {
                pool.position_impact_pool = pool.position_impact_pool.sub(released);
                pool.last_impact_distribution = now;
                payloads.push(EventPayload::ImpactPoolDistributed(
                    ImpactPoolDistributedEvent {
                        market_id,
                        amount: released,
                        remaining_pool: pool.position_impact_pool,
                    },
                ));
            } else {
                pool.last_impact_distribution = now;
            }
        }

        for payload in payloads {
            self.emit_event(payload);
        }
        Ok(())
    }
}
