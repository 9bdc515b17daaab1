// 6.0: funding fees. the over-weighted side pays the under-weighted side at a
// persisted, velocity-based rate: sustained imbalance ratchets the rate up,
// balanced markets let it decay back toward zero (and through zero, flipping
// payer and receiver). the saved rate only moves on state-mutating actions;
// pure reads compute the would-be next value without persisting.
// 6.1 has the velocity rule, 6.2 the per-size accrual and settlement math.

use crate::types::{Side, Timestamp, Usd};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingParams {
    /// Rate velocity per second per unit of imbalance ratio.
    pub increase_factor_per_second: Decimal,
    /// Fixed decay per second while the market is balanced.
    pub decrease_factor_per_second: Decimal,
    /// Keep ratcheting while the imbalance ratio exceeds this.
    pub threshold_for_stable_funding: Decimal,
    /// Decay while the imbalance ratio is below this.
    pub threshold_for_decrease_funding: Decimal,
    /// Bounds on the rate magnitude.
    pub min_factor_per_second: Decimal,
    pub max_factor_per_second: Decimal,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            increase_factor_per_second: dec!(0.000001),
            decrease_factor_per_second: dec!(0.00000002),
            threshold_for_stable_funding: dec!(0.05),
            threshold_for_decrease_funding: dec!(0.03),
            min_factor_per_second: Decimal::ZERO,
            max_factor_per_second: dec!(0.00001),
        }
    }
}

fn side_idx(side: Side) -> usize {
    match side {
        Side::Long => 0,
        Side::Short => 1,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingState {
    /// Signed rate per second. Positive = longs pay shorts.
    pub saved_factor_per_second: Decimal,
    /// Cumulative USD paid per USD of size, per position side. Monotonic.
    cumulative_paid_per_size: [Decimal; 2],
    /// Cumulative USD receivable per USD of size, per position side. Monotonic.
    cumulative_received_per_size: [Decimal; 2],
    pub last_update: Timestamp,
}

impl FundingState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            saved_factor_per_second: Decimal::ZERO,
            cumulative_paid_per_size: [Decimal::ZERO, Decimal::ZERO],
            cumulative_received_per_size: [Decimal::ZERO, Decimal::ZERO],
            last_update: timestamp,
        }
    }

    pub fn paid_per_size(&self, side: Side) -> Decimal {
        self.cumulative_paid_per_size[side_idx(side)]
    }

    pub fn received_per_size(&self, side: Side) -> Decimal {
        self.cumulative_received_per_size[side_idx(side)]
    }
}

// 6.1: the velocity rule. `skew` is signed (long OI - short OI) in the
// market's configured imbalance units, `total` the matching total.
pub fn next_funding_factor_per_second(
    params: &FundingParams,
    saved: Decimal,
    skew: Decimal,
    total: Decimal,
    elapsed_secs: Decimal,
) -> Decimal {
    if elapsed_secs <= Decimal::ZERO || total <= Decimal::ZERO {
        return saved;
    }

    let ratio = skew.abs() / total;
    let heavy_sign = if skew > Decimal::ZERO {
        dec!(1)
    } else if skew < Decimal::ZERO {
        dec!(-1)
    } else {
        Decimal::ZERO
    };

    let next = if !heavy_sign.is_zero() && !saved.is_zero() && saved.signum() != heavy_sign {
        // rate points away from the current skew: always move toward the
        // heavy side, regardless of thresholds.
        saved + heavy_sign * ratio * params.increase_factor_per_second * elapsed_secs
    } else if !heavy_sign.is_zero() && ratio > params.threshold_for_stable_funding {
        saved + heavy_sign * ratio * params.increase_factor_per_second * elapsed_secs
    } else if ratio < params.threshold_for_decrease_funding && !saved.is_zero() {
        // decay at a fixed speed. this may cross zero, flipping payer side.
        saved - saved.signum() * params.decrease_factor_per_second * elapsed_secs
    } else {
        saved
    };

    clamp_magnitude(next, params)
}

fn clamp_magnitude(rate: Decimal, params: &FundingParams) -> Decimal {
    if rate.is_zero() {
        return rate;
    }
    let magnitude = rate
        .abs()
        .max(params.min_factor_per_second)
        .min(params.max_factor_per_second);
    rate.signum() * magnitude
}

/// Pure preview of the funding update at `now`: the would-be saved rate plus
/// the per-size accrual deltas. Nothing is persisted; mutating entry points
/// call `apply` on the result.
#[derive(Debug, Clone, Copy)]
pub struct NextFunding {
    pub factor_per_second: Decimal,
    pub longs_pay_shorts: bool,
    pub paid_delta_per_size: [Decimal; 2],
    pub received_delta_per_size: [Decimal; 2],
    pub at: Timestamp,
}

pub fn next_funding(
    params: &FundingParams,
    state: &FundingState,
    long_oi_usd: Decimal,
    short_oi_usd: Decimal,
    skew: Decimal,
    total: Decimal,
    now: Timestamp,
) -> NextFunding {
    let elapsed = state.last_update.elapsed_secs(&now);
    let factor = next_funding_factor_per_second(
        params,
        state.saved_factor_per_second,
        skew,
        total,
        elapsed,
    );

    let mut paid = [Decimal::ZERO, Decimal::ZERO];
    let mut received = [Decimal::ZERO, Decimal::ZERO];

    // accrue with the rate that held over the elapsed window (the previous
    // saved rate), then persist the new one. consistent with persisting only
    // on mutating actions.
    let rate = state.saved_factor_per_second;
    if !rate.is_zero() && elapsed > Decimal::ZERO {
        let (payer, receiver) = if rate > Decimal::ZERO {
            (Side::Long, Side::Short)
        } else {
            (Side::Short, Side::Long)
        };
        let payer_oi = match payer {
            Side::Long => long_oi_usd,
            Side::Short => short_oi_usd,
        };
        let receiver_oi = match receiver {
            Side::Long => long_oi_usd,
            Side::Short => short_oi_usd,
        };

        // paying with nobody on the other side would leak value into nowhere
        if payer_oi > Decimal::ZERO && receiver_oi > Decimal::ZERO {
            let per_size_paid = rate.abs() * elapsed;
            let total_paid_usd = per_size_paid * payer_oi;
            paid[side_idx(payer)] = per_size_paid;
            received[side_idx(receiver)] = total_paid_usd / receiver_oi;
        }
    }

    NextFunding {
        factor_per_second: factor,
        longs_pay_shorts: factor > Decimal::ZERO,
        paid_delta_per_size: paid,
        received_delta_per_size: received,
        at: now,
    }
}

impl NextFunding {
    pub fn apply(&self, state: &mut FundingState) {
        state.saved_factor_per_second = self.factor_per_second;
        for i in 0..2 {
            state.cumulative_paid_per_size[i] += self.paid_delta_per_size[i];
            state.cumulative_received_per_size[i] += self.received_delta_per_size[i];
        }
        state.last_update = self.at;
    }
}

// 6.2: settlement. funding owed by a position since its last snapshot,
// and funding receivable (always routed through the claimable ledger,
// never netted in-place).
pub fn position_funding_fee_usd(
    state: &FundingState,
    side: Side,
    snapshot_paid_per_size: Decimal,
    size_in_usd: Usd,
) -> Usd {
    let delta = state.paid_per_size(side) - snapshot_paid_per_size;
    debug_assert!(delta >= Decimal::ZERO, "paid-per-size regressed");
    size_in_usd.mul(delta)
}

pub fn position_claimable_funding_usd(
    state: &FundingState,
    side: Side,
    snapshot_received_per_size: Decimal,
    size_in_usd: Usd,
) -> Usd {
    let delta = state.received_per_size(side) - snapshot_received_per_size;
    debug_assert!(delta >= Decimal::ZERO, "received-per-size regressed");
    size_in_usd.mul(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> FundingParams {
        FundingParams {
            increase_factor_per_second: dec!(0.000001),
            decrease_factor_per_second: dec!(0.00000002),
            threshold_for_stable_funding: dec!(0.05),
            threshold_for_decrease_funding: dec!(0.03),
            min_factor_per_second: Decimal::ZERO,
            max_factor_per_second: dec!(1),
        }
    }

    #[test]
    fn rate_ramps_under_sustained_imbalance() {
        // 106k long vs 94k short: ratio = 12k / 200k = 6%, above the 5%
        // stable threshold. after 600s the rate is 6% * 1e-6 * 600.
        let rate = next_funding_factor_per_second(
            &params(),
            Decimal::ZERO,
            dec!(12_000),
            dec!(200_000),
            dec!(600),
        );
        assert_eq!(rate, dec!(0.000036));
    }

    #[test]
    fn rate_holds_between_thresholds() {
        // ratio 4%: between decrease (3%) and stable (5%) thresholds
        let rate = next_funding_factor_per_second(
            &params(),
            dec!(0.00001),
            dec!(8_000),
            dec!(200_000),
            dec!(600),
        );
        assert_eq!(rate, dec!(0.00001));
    }

    #[test]
    fn rate_decays_when_balanced_and_can_flip() {
        // ratio 1%: below the decrease threshold, decay at 2e-8/s
        let rate = next_funding_factor_per_second(
            &params(),
            dec!(0.00001),
            dec!(2_000),
            dec!(200_000),
            dec!(100),
        );
        assert_eq!(rate, dec!(0.000008));

        // long enough decay crosses zero and flips the payer side
        let flipped = next_funding_factor_per_second(
            &params(),
            dec!(0.00001),
            dec!(2_000),
            dec!(200_000),
            dec!(1000),
        );
        assert_eq!(flipped, dec!(-0.00001));
    }

    #[test]
    fn rate_moves_toward_skew_when_sign_disagrees() {
        // shorts are heavy but the saved rate still says longs pay:
        // moves toward the short side even though ratio < stable threshold
        let rate = next_funding_factor_per_second(
            &params(),
            dec!(0.00001),
            dec!(-8_000),
            dec!(200_000),
            dec!(600),
        );
        assert!(rate < dec!(0.00001));
    }

    #[test]
    fn rate_clamped_at_max() {
        let mut p = params();
        p.max_factor_per_second = dec!(0.00002);
        let rate = next_funding_factor_per_second(
            &p,
            dec!(0.000019),
            dec!(100_000),
            dec!(200_000),
            dec!(10_000),
        );
        assert_eq!(rate, dec!(0.00002));
    }

    #[test]
    fn accrual_conserves_usd_between_sides() {
        let mut state = FundingState::new(Timestamp::from_secs(0));
        state.saved_factor_per_second = dec!(0.00001); // longs pay

        let long_oi = dec!(150_000);
        let short_oi = dec!(50_000);
        let next = next_funding(
            &params(),
            &state,
            long_oi,
            short_oi,
            long_oi - short_oi,
            long_oi + short_oi,
            Timestamp::from_secs(1000),
        );

        let paid_total = next.paid_delta_per_size[0] * long_oi;
        let received_total = next.received_delta_per_size[1] * short_oi;
        assert_eq!(paid_total, received_total);
        assert_eq!(paid_total, dec!(0.00001) * dec!(1000) * long_oi);
    }

    #[test]
    fn no_accrual_without_counterparty() {
        let mut state = FundingState::new(Timestamp::from_secs(0));
        state.saved_factor_per_second = dec!(0.00001);

        let next = next_funding(
            &params(),
            &state,
            dec!(150_000),
            Decimal::ZERO,
            dec!(150_000),
            dec!(150_000),
            Timestamp::from_secs(1000),
        );
        assert_eq!(next.paid_delta_per_size, [Decimal::ZERO, Decimal::ZERO]);
        assert_eq!(next.received_delta_per_size, [Decimal::ZERO, Decimal::ZERO]);
    }

    #[test]
    fn settlement_uses_snapshots() {
        let mut state = FundingState::new(Timestamp::from_secs(0));
        state.saved_factor_per_second = dec!(0.00001);

        let next = next_funding(
            &params(),
            &state,
            dec!(100_000),
            dec!(100_000),
            Decimal::ZERO,
            dec!(200_000),
            Timestamp::from_secs(3600),
        );
        next.apply(&mut state);

        // long position of 50k opened at snapshot zero
        let fee = position_funding_fee_usd(&state, Side::Long, Decimal::ZERO, Usd::new(dec!(50_000)));
        assert_eq!(fee.value(), dec!(0.00001) * dec!(3600) * dec!(50_000));

        // short side receives the matching claim
        let claim =
            position_claimable_funding_usd(&state, Side::Short, Decimal::ZERO, Usd::new(dec!(50_000)));
        assert_eq!(claim.value(), fee.value());
    }

    #[test]
    fn preview_does_not_persist() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let _ = next_funding(
            &params(),
            &state,
            dec!(150_000),
            dec!(50_000),
            dec!(100_000),
            dec!(200_000),
            Timestamp::from_secs(600),
        );
        assert_eq!(state.saved_factor_per_second, Decimal::ZERO);
        assert_eq!(state.last_update, Timestamp::from_secs(0));
    }
}
