//! End-to-end tests of the two-phase request lifecycle: create locks inputs,
//! execute applies effects at keeper prices, cancel refunds, and every id is
//! single-use.

use perp_pools::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const ETH: TokenId = TokenId(1);
const USDC: TokenId = TokenId(2);
const MARKET: MarketId = MarketId(1);
const SIBLING: MarketId = MarketId(2);
const VAULT: VaultId = VaultId(1);

const ADMIN: AccountId = AccountId(1);
const KEEPER: AccountId = AccountId(2);
const LP: AccountId = AccountId(10);
const TRADER: AccountId = AccountId(11);
const STRANGER: AccountId = AccountId(12);
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
    engine
}

fn open_long(engine: &mut Engine, size: Decimal, collateral: Decimal) -> PositionKey {
    engine
        .fund_account(TRADER, USDC, Amount::new(collateral))
        .unwrap();
    let id = engine
        .create_increase(
            TRADER,
            MARKET,
            USDC,
            Side::Long,
            Usd::new(size),
            Amount::new(collateral),
            None,
        )
        .unwrap();
    let outcome = engine
        .execute_position(KEEPER, id, &prices_at(engine.time().as_secs(), dec!(5000)))
        .unwrap();
    assert!(outcome.is_executed());
    PositionKey {
        account: TRADER,
        market: MARKET,
        collateral_token: USDC,
        side: Side::Long,
    }
}

#[test]
fn request_ids_are_single_use() {
    let mut engine = setup();
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(5000)))
        .unwrap();
    let id = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(5000)),
            Decimal::ZERO,
        )
        .unwrap();

    assert!(engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .is_executed());
    // executed ids are gone
    assert!(matches!(
        engine.execute_deposit(KEEPER, id, &prices_at(0, dec!(5000))),
        Err(EngineError::Request(RequestError::RequestNotFound(_)))
    ));

    // cancelled ids are gone too
    let id = engine
        .create_withdrawal(
            TRADER,
            MARKET,
            engine.share_balance(TRADER, MARKET),
            Amount::zero(),
            Amount::zero(),
        )
        .unwrap();
    engine.cancel_request(TRADER, id).unwrap();
    assert!(engine
        .execute_withdrawal(KEEPER, id, &prices_at(0, dec!(5000)))
        .is_err());
    assert_eq!(engine.pending_requests(), 0);
}

#[test]
fn execution_requires_the_keeper_role() {
    let mut engine = setup();
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(5000)))
        .unwrap();
    let id = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(5000)),
            Decimal::ZERO,
        )
        .unwrap();

    assert!(matches!(
        engine.execute_deposit(TRADER, id, &prices_at(0, dec!(5000))),
        Err(EngineError::Unauthorized(..))
    ));
    // the failed attempt must not consume the request
    assert_eq!(engine.pending_requests(), 1);
    assert!(engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .is_executed());
}

#[test]
fn stale_prices_cancel_with_a_full_refund() {
    let mut engine = setup();
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(5000)))
        .unwrap();
    let id = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(5000)),
            Decimal::ZERO,
        )
        .unwrap();

    engine.advance_time(600); // prices observed at t=0, max age 60
    let outcome = engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
    assert_eq!(outcome.cancel_reason(), Some(CancelReason::StalePrices));
    assert_eq!(engine.balance(TRADER, USDC).value(), dec!(5000));
}

#[test]
fn only_the_owner_or_a_keeper_may_cancel() {
    let mut engine = setup();
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(5000)))
        .unwrap();
    let id = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(5000)),
            Decimal::ZERO,
        )
        .unwrap();

    assert!(matches!(
        engine.cancel_request(STRANGER, id),
        Err(EngineError::NotRequestOwner(_))
    ));
    assert_eq!(engine.pending_requests(), 1);
    engine.cancel_request(KEEPER, id).unwrap();
    assert_eq!(engine.balance(TRADER, USDC).value(), dec!(5000));
}

#[test]
fn paused_market_cancels_then_resume_executes() {
    let mut engine = setup();
    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(5000)))
        .unwrap();
    let id = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(5000)),
            Decimal::ZERO,
        )
        .unwrap();

    engine.pause_market(ADMIN, MARKET).unwrap();
    let outcome = engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
    assert_eq!(outcome.cancel_reason(), Some(CancelReason::MarketNotActive));

    engine.resume_market(ADMIN, MARKET).unwrap();
    let id = engine
        .create_deposit(
            TRADER,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(5000)),
            Decimal::ZERO,
        )
        .unwrap();
    assert!(engine
        .execute_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .is_executed());
}

#[test]
fn shift_lifecycle_moves_liquidity_between_markets() {
    let mut engine = setup();
    let mut sibling = MarketConfig::eth_usd(SIBLING, ETH, USDC);
    sibling.name = "ETH/USD [ETH-USDC] #2".to_string();
    engine.register_market(ADMIN, sibling).unwrap();

    let shares = engine.share_balance(LP, MARKET);
    let id = engine
        .create_shift(LP, MARKET, SIBLING, shares / dec!(2), Decimal::ZERO)
        .unwrap();
    // shares are locked while the request is pending
    assert_eq!(engine.share_balance(LP, MARKET), shares / dec!(2));

    let result = engine
        .execute_shift(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .executed()
        .unwrap();
    assert!(result.shares_minted.is_sign_positive());
    assert!(engine.share_balance(LP, SIBLING) > Decimal::ZERO);
    assert!(engine
        .market(SIBLING)
        .unwrap()
        .pool
        .pool_amount(PoolToken::LongToken)
        .is_positive());
}

#[test]
fn position_round_trip_through_requests() {
    let mut engine = setup();
    let key = open_long(&mut engine, dec!(50_000), dec!(10_000));
    assert!(engine.position(&key).is_some());

    engine.advance_time(30);
    let id = engine
        .create_decrease(key, Usd::new(dec!(50_000)), Amount::zero(), None)
        .unwrap();
    let outcome = engine
        .execute_position(KEEPER, id, &prices_at(30, dec!(5200)))
        .unwrap();
    let Some(PositionOutcome::Decreased(result)) = outcome.executed() else {
        panic!("expected a decrease");
    };
    assert!(result.closed);
    assert!(result.realized_pnl_usd.is_positive());
    assert!(engine.position(&key).is_none());
    // collateral plus profit landed back in the free balance
    assert!(engine.balance(TRADER, USDC).value() > dec!(11_000));
}

#[test]
fn unacceptable_price_cancels_an_increase() {
    let mut engine = setup();
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
            Some(dec!(4990)), // long wants at most $4,990
        )
        .unwrap();
    let outcome = engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
    assert_eq!(outcome.cancel_reason(), Some(CancelReason::UnacceptablePrice));
    assert_eq!(engine.balance(TRADER, USDC).value(), dec!(10_000));
}

#[test]
fn vault_deposit_and_withdrawal_round_trip() {
    let mut engine = setup();
    engine
        .register_vault(
            ADMIN,
            Vault::new(VAULT, "ETH-USDC vault".to_string(), ETH, USDC),
        )
        .unwrap();
    engine
        .add_vault_market(
            ADMIN,
            VAULT,
            MARKET,
            VaultMarketCaps {
                max_share_balance: dec!(10_000_000),
                max_balance_usd: dec!(10_000_000),
            },
        )
        .unwrap();

    engine
        .fund_account(TRADER, USDC, Amount::new(dec!(50_000)))
        .unwrap();
    let id = engine
        .create_vault_deposit(
            TRADER,
            VAULT,
            MARKET,
            Amount::zero(),
            Amount::new(dec!(50_000)),
            Decimal::ZERO,
        )
        .unwrap();
    let deposit = engine
        .execute_vault_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .executed()
        .unwrap();
    assert!(deposit.vault_shares_minted.is_sign_positive());

    let id = engine
        .create_vault_withdrawal(
            TRADER,
            VAULT,
            MARKET,
            deposit.vault_shares_minted,
            Amount::zero(),
            Amount::zero(),
        )
        .unwrap();
    let withdrawal = engine
        .execute_vault_withdrawal(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .executed()
        .unwrap();

    let recovered =
        withdrawal.long_token_out.value() * dec!(5000) + withdrawal.short_token_out.value();
    assert!(recovered < dec!(50_000)); // swap fees both ways
    assert!(recovered > dec!(49_000));
    assert_eq!(engine.vault_share_balance(TRADER, VAULT), Decimal::ZERO);
}

#[test]
fn shortfall_claims_are_gated_by_the_governance_factor() {
    let mut engine = setup();
    let key = open_long(&mut engine, dec!(50_000), dec!(2000));

    // gap through the bankruptcy price
    let outcome = engine
        .liquidate(KEEPER, &key, &prices_at(0, dec!(4700)))
        .unwrap()
        .executed()
        .unwrap();
    assert!(outcome.insolvent_shortfall_usd.is_positive());

    let bucket = TimeBucket::containing(engine.time());
    // factor starts at zero: the holding account cannot claim yet
    assert!(engine
        .claim_collateral(HOLDING, MARKET, USDC, bucket)
        .is_err());

    engine
        .set_claimable_collateral_factor(ADMIN, MARKET, USDC, bucket, dec!(1))
        .unwrap();
    let paid = engine
        .claim_collateral(HOLDING, MARKET, USDC, bucket)
        .unwrap();
    assert!(paid.is_positive());
    assert_eq!(engine.balance(HOLDING, USDC), paid);

    // a second claim at the same factor pays nothing more
    assert!(engine
        .claim_collateral(HOLDING, MARKET, USDC, bucket)
        .is_err());
}

#[test]
fn executions_leave_an_audit_trail() {
    let mut engine = setup();
    let key = open_long(&mut engine, dec!(50_000), dec!(10_000));
    let id = engine
        .create_decrease(key, Usd::new(dec!(50_000)), Amount::zero(), None)
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();

    let payloads: Vec<_> = engine
        .events()
        .iter()
        .map(|event| &event.payload)
        .collect();
    assert!(payloads
        .iter()
        .any(|p| matches!(p, EventPayload::DepositExecuted(_))));
    assert!(payloads
        .iter()
        .any(|p| matches!(p, EventPayload::PositionIncreased(_))));
    assert!(payloads
        .iter()
        .any(|p| matches!(p, EventPayload::PositionDecreased(_))));
}
