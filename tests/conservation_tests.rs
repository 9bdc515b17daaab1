//! Token conservation across the whole engine.
//!
//! For each token, everything minted by `fund_account` must remain visible
//! somewhere: account balances, locked requests, position collateral, the
//! pool, the swap impact pool, claimable protocol fees, or a claims ledger.
//! The one deliberate exception is funding: what a payer-side position loses
//! to funding exists afterwards only as the claims-ledger liability that the
//! receiving side claims against.

use perp_pools::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const ETH: TokenId = TokenId(1);
const USDC: TokenId = TokenId(2);
const MARKET: MarketId = MarketId(1);

const ADMIN: AccountId = AccountId(1);
const KEEPER: AccountId = AccountId(2);
const LP: AccountId = AccountId(10);
const TRADER: AccountId = AccountId(11);
const HOLDING: AccountId = AccountId(99);

fn prices_at(t: i64, eth: Decimal) -> PriceContext {
    PriceContext::new(Timestamp::from_secs(t))
        .with_price(ETH, Price::exact(eth))
        .with_price(USDC, Price::exact(dec!(1)))
}

fn setup() -> Engine {
    let mut engine = Engine::new(EngineConfig {
        holding_account: Some(HOLDING),
        ..EngineConfig::default()
    });
    engine.grant_role(ADMIN, Role::Config);
    engine.grant_role(KEEPER, Role::Keeper);
    engine
        .register_market(ADMIN, MarketConfig::eth_usd(MARKET, ETH, USDC))
        .unwrap();
    engine
}

fn seed_pool(engine: &mut Engine) {
    engine
        .fund_account(LP, ETH, Amount::new(dec!(100)))
        .unwrap();
    engine
        .fund_account(LP, USDC, Amount::new(dec!(500_000)))
        .unwrap();
    let id = engine
        .create_deposit(
            LP,
            MARKET,
            Amount::new(dec!(100)),
            Amount::new(dec!(500_000)),
            Decimal::ZERO,
        )
        .unwrap();
    engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
}

/// Everywhere a token can sit, summed. Positions and claims are folded in
/// for the accounts this suite uses.
fn token_total(engine: &Engine, token: TokenId) -> Decimal {
    let slot = if token == ETH {
        PoolToken::LongToken
    } else {
        PoolToken::ShortToken
    };
    let pool = &engine.market(MARKET).unwrap().pool;
    let mut total = pool.pool_amount(slot).value()
        + pool.swap_impact_pool(slot).value()
        + pool.claimable_fee(slot).value();
    for account in [ADMIN, KEEPER, LP, TRADER, HOLDING] {
        total += engine.balance(account, token).value();
        total += engine.claimable_funding(account, MARKET, token).value();
    }
    for (_, position) in engine.positions_iter() {
        if position.key.collateral_token == token {
            total += position.collateral_amount.value();
        }
    }
    total
}

fn long_key() -> PositionKey {
    PositionKey {
        account: TRADER,
        market: MARKET,
        collateral_token: USDC,
        side: Side::Long,
    }
}

#[test]
fn deposit_and_withdrawal_conserve_both_tokens() {
    let mut engine = setup();
    seed_pool(&mut engine);
    assert_eq!(token_total(&engine, ETH), dec!(100));
    assert_eq!(token_total(&engine, USDC), dec!(500_000));

    let shares = engine.share_balance(LP, MARKET);
    let id = engine
        .create_withdrawal(LP, MARKET, shares / dec!(3), Amount::zero(), Amount::zero())
        .unwrap();
    engine
        .execute_withdrawal(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    assert_eq!(token_total(&engine, ETH), dec!(100));
    assert_eq!(token_total(&engine, USDC), dec!(500_000));
}

#[test]
fn cancelled_requests_refund_exactly() {
    let mut engine = setup();
    seed_pool(&mut engine);
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(10_000)))
        .unwrap();

    let deposit = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(4000)),
            Decimal::ZERO,
        )
        .unwrap();
    let increase = engine
        .create_increase(
            TRADER,
            MARKET,
            USDC,
            Side::Long,
            Usd::new(dec!(20_000)),
            Amount::new(dec!(5000)),
            None,
        )
        .unwrap();
    // locked inputs are out of the balance but still in the system
    assert_eq!(engine.balance(TRADER, USDC).value(), dec!(1000));

    engine.cancel_request(TRADER, deposit).unwrap();
    engine.cancel_request(TRADER, increase).unwrap();
    assert_eq!(engine.balance(TRADER, USDC).value(), dec!(10_000));
    assert_eq!(token_total(&engine, USDC), dec!(510_000));
}

#[test]
fn flat_round_trip_conserves_collateral_token() {
    let mut engine = setup();
    seed_pool(&mut engine);
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(10_000)))
        .unwrap();

    let id = engine
        .create_increase(
            TRADER,
            MARKET,
            USDC,
            Side::Long,
            Usd::new(dec!(50_000)),
            Amount::new(dec!(10_000)),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
    assert_eq!(token_total(&engine, USDC), dec!(510_000));

    // same price, same timestamp: no pnl, no funding, no borrowing
    let id = engine
        .create_decrease(long_key(), Usd::new(dec!(50_000)), Amount::zero(), None)
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    assert_eq!(token_total(&engine, USDC), dec!(510_000));
    // fees were paid, so the trader ends strictly below the funded amount
    assert!(engine.balance(TRADER, USDC).value() < dec!(10_000));
    assert!(engine.position(&long_key()).is_none());
}

#[test]
fn trader_loss_lands_in_the_pool() {
    let mut engine = setup();
    seed_pool(&mut engine);
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(10_000)))
        .unwrap();

    let id = engine
        .create_increase(
            TRADER,
            MARKET,
            USDC,
            Side::Long,
            Usd::new(dec!(50_000)),
            Amount::new(dec!(10_000)),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    let pool_before = engine
        .market(MARKET)
        .unwrap()
        .pool
        .pool_amount(PoolToken::ShortToken)
        .value();
    let id = engine
        .create_decrease(long_key(), Usd::new(dec!(50_000)), Amount::zero(), None)
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(4800)))
        .unwrap();
    let pool_after = engine
        .market(MARKET)
        .unwrap()
        .pool
        .pool_amount(PoolToken::ShortToken)
        .value();

    // a ~$2000 loss plus fees flowed into the pool's collateral slot
    assert!(pool_after > pool_before + dec!(1900));
    assert_eq!(token_total(&engine, USDC), dec!(510_000));
}

#[test]
fn trader_profit_comes_out_of_the_pool() {
    let mut engine = setup();
    seed_pool(&mut engine);
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(10_000)))
        .unwrap();

    let id = engine
        .create_increase(
            TRADER,
            MARKET,
            USDC,
            Side::Long,
            Usd::new(dec!(50_000)),
            Amount::new(dec!(10_000)),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    let id = engine
        .create_decrease(long_key(), Usd::new(dec!(50_000)), Amount::zero(), None)
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5500)))
        .unwrap();

    // profit was real tokens out of the pool, never minted from thin air
    assert!(engine.balance(TRADER, USDC).value() > dec!(14_000));
    assert_eq!(token_total(&engine, USDC), dec!(510_000));
}

#[test]
fn first_deposit_burn_shares_stay_accounted() {
    let mut engine = setup();
    engine
        .fund_account(LP, ETH, Amount::new(dec!(10)))
        .unwrap();
    engine
        .fund_account(LP, USDC, Amount::new(dec!(50_000)))
        .unwrap();
    let id = engine
        .create_deposit(
            LP,
            MARKET,
            Amount::new(dec!(10)),
            Amount::new(dec!(50_000)),
            Decimal::ZERO,
        )
        .unwrap();
    engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    let pool = &engine.market(MARKET).unwrap().pool;
    let lp = engine.share_balance(LP, MARKET);
    let burned = engine.share_balance(AccountId::BURN, MARKET);
    // every minted share is held by someone; the burn account's stake is
    // permanently unredeemable but still backed by pool value
    assert_eq!(lp + burned, pool.share_supply);
    assert!(burned.is_positive());
    assert_eq!(token_total(&engine, ETH), dec!(10));
    assert_eq!(token_total(&engine, USDC), dec!(50_000));
}

#[test]
fn insolvent_liquidation_conserves_tokens_and_books_the_shortfall() {
    let mut engine = setup();
    seed_pool(&mut engine);
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(2000)))
        .unwrap();

    let id = engine
        .create_increase(
            TRADER,
            MARKET,
            USDC,
            Side::Long,
            Usd::new(dec!(50_000)),
            Amount::new(dec!(2000)),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    // a gap through the bankruptcy price: the loss exceeds the collateral
    let outcome = engine
        .liquidate(KEEPER, &long_key(), &prices_at(0, dec!(4700)))
        .unwrap()
        .executed()
        .unwrap();
    assert!(outcome.insolvent_shortfall_usd.is_positive());

    // the shortfall is a claims-ledger liability assigned to the holding
    // account, not tokens; physical tokens stay conserved
    assert_eq!(token_total(&engine, USDC), dec!(502_000));
    assert!(engine.position(&long_key()).is_none());
}

#[test]
fn funding_paid_is_exactly_the_claimable_pot() {
    let mut engine = setup();
    seed_pool(&mut engine);
    for (account, side, size, collateral) in [
        (TRADER, Side::Long, dec!(400_000), dec!(100_000)),
        (LP, Side::Short, dec!(100_000), dec!(50_000)),
    ] {
        engine
            .fund_account(account, USDC, Amount::new(collateral))
            .unwrap();
        let id = engine
            .create_increase(
                account,
                MARKET,
                USDC,
                side,
                Usd::new(size),
                Amount::new(collateral),
                None,
            )
            .unwrap();
        engine
            .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
            .unwrap();
    }

    let before = token_total(&engine, USDC);
    // let the skewed market accrue a funding rate, then accrue against it
    engine.advance_time(4 * 3600);
    let id = engine
        .create_decrease(
            PositionKey {
                account: LP,
                market: MARKET,
                collateral_token: USDC,
                side: Side::Short,
            },
            Usd::new(dec!(1)),
            Amount::zero(),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(4 * 3600, dec!(5000)))
        .unwrap();
    engine.advance_time(4 * 3600);
    let id = engine
        .create_decrease(long_key(), Usd::new(dec!(400_000)), Amount::zero(), None)
        .unwrap();
    let outcome = engine
        .execute_position(KEEPER, id, &prices_at(8 * 3600, dec!(5000)))
        .unwrap();
    assert!(outcome.is_executed());
    // settle the short too, so its receivable lands in the claims ledger
    let id = engine
        .create_decrease(
            PositionKey {
                account: LP,
                market: MARKET,
                collateral_token: USDC,
                side: Side::Short,
            },
            Usd::new(dec!(100_000)),
            Amount::zero(),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(8 * 3600, dec!(5000)))
        .unwrap();

    // funding the long paid left its collateral and now exists only as the
    // short side's claimable balance, which token_total already counts
    let after = token_total(&engine, USDC);
    assert!((after - before).abs() < dec!(0.01));
    assert!(engine
        .claimable_funding(LP, MARKET, USDC)
        .is_positive());

    // claiming moves it to the balance without changing the total
    engine.claim_funding(LP, MARKET, USDC).unwrap();
    assert!((token_total(&engine, USDC) - before).abs() < dec!(0.01));
}

#[test]
fn funding_claims_convert_at_settlement_prices() {
    let mut engine = setup();
    seed_pool(&mut engine);
    // heavy long side pays; the short receiver posts ETH collateral so the
    // credited token amount depends on which ETH price converts it
    for (account, token, side, size, collateral) in [
        (TRADER, USDC, Side::Long, dec!(400_000), dec!(100_000)),
        (LP, ETH, Side::Short, dec!(100_000), dec!(10)),
    ] {
        engine
            .fund_account(account, token, Amount::new(collateral))
            .unwrap();
        let id = engine
            .create_increase(
                account,
                MARKET,
                token,
                side,
                Usd::new(size),
                Amount::new(collateral),
                None,
            )
            .unwrap();
        engine
            .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
            .unwrap();
    }

    // a touch at 4h persists the ratcheted rate; funding then accrues
    // against it over the second window
    engine.advance_time(4 * 3600);
    let id = engine
        .create_decrease(long_key(), Usd::new(dec!(1)), Amount::zero(), None)
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(4 * 3600, dec!(5000)))
        .unwrap();

    // settle the short at a higher ETH price than held while accruing
    engine.advance_time(4 * 3600);
    let short_key = PositionKey {
        account: LP,
        market: MARKET,
        collateral_token: ETH,
        side: Side::Short,
    };
    let id = engine
        .create_decrease(short_key, Usd::new(dec!(100_000)), Amount::zero(), None)
        .unwrap();
    let outcome = engine
        .execute_position(KEEPER, id, &prices_at(8 * 3600, dec!(5500)))
        .unwrap();
    assert!(outcome.is_executed());

    let received_per_size = engine
        .market(MARKET)
        .unwrap()
        .pool
        .funding
        .received_per_size(Side::Short);
    assert!(received_per_size.is_positive());

    // the USD receivable converts to ETH at the settlement-time max price,
    // not at any price seen while the accumulator grew
    let receivable_usd = received_per_size * dec!(100_000);
    assert_eq!(
        engine.claimable_funding(LP, MARKET, ETH).value(),
        receivable_usd / dec!(5500)
    );
}

#[test]
fn protocol_fee_claim_conserves_tokens() {
    let mut engine = setup();
    seed_pool(&mut engine);

    let claimed = engine.claim_protocol_fees(ADMIN, MARKET, ADMIN).unwrap();
    let total: Decimal = claimed
        .iter()
        .filter(|(token, _)| *token == USDC)
        .map(|(_, amount)| amount.value())
        .sum();
    assert!(total.is_positive());
    assert_eq!(engine.balance(ADMIN, USDC).value(), total);
    assert_eq!(token_total(&engine, USDC), dec!(500_000));
}
