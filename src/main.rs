//! Perpetual DEX Pool Accounting Simulation.
//!
//! Demonstrates the full pool-first lifecycle: liquidity provision, leveraged
//! positions against the pool, funding and borrowing accrual, liquidation,
//! and vault-level aggregation.

use perp_pools::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const ETH: TokenId = TokenId(1);
const USDC: TokenId = TokenId(2);
const ETH_USD: MarketId = MarketId(1);

const ADMIN: AccountId = AccountId(1);
const KEEPER: AccountId = AccountId(2);
const LP: AccountId = AccountId(10);
const ALICE: AccountId = AccountId(11);
const BOB: AccountId = AccountId(12);

fn main() {
    println!("Perpetual DEX Pool Accounting Engine Simulation");
    println!("Two-Token Pools, Two-Phase Requests, Full Lifecycle\n");

    scenario_1_liquidity_bootstrap();
    scenario_2_long_lifecycle();
    scenario_3_funding_and_borrowing();
    scenario_4_liquidation();
    scenario_5_vault_aggregation();

    println!("\nAll simulations completed successfully.");
}

fn prices_at(t: i64, eth: Decimal) -> PriceContext {
    PriceContext::new(Timestamp::from_secs(t))
        .with_price(ETH, Price::exact(eth))
        .with_price(USDC, Price::exact(dec!(1)))
}

/// Engine with one ETH/USD market and a funded LP position in the pool.
fn setup(eth_price: Decimal) -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    engine.grant_role(ADMIN, Role::Config);
    engine.grant_role(KEEPER, Role::Keeper);
    engine
        .register_market(ADMIN, MarketConfig::eth_usd(ETH_USD, ETH, USDC))
        .unwrap();

    engine.fund_account(LP, ETH, Amount::new(dec!(100))).unwrap();
    engine
        .fund_account(LP, USDC, Amount::new(dec!(500_000)))
        .unwrap();
    let id = engine
        .create_deposit(
            LP,
            ETH_USD,
            Amount::new(dec!(100)),
            Amount::new(dec!(500_000)),
            Decimal::ZERO,
        )
        .unwrap();
    engine
        .execute_deposit(KEEPER, id, &prices_at(0, eth_price))
        .unwrap();
    engine
}

/// LP deposits both tokens, receives pool shares, withdraws half.
fn scenario_1_liquidity_bootstrap() {
    println!("Scenario 1: Liquidity Bootstrap\n");

    let mut engine = setup(dec!(5000));
    let shares = engine.share_balance(LP, ETH_USD);
    let pool = &engine.market(ETH_USD).unwrap().pool;
    println!("  LP deposits 100 ETH + 500,000 USDC at ETH=$5,000");
    println!("  Shares minted: {:.2}", shares);
    println!(
        "  Pool: {} ETH / {} USDC, supply {:.2}",
        pool.pool_amount(PoolToken::LongToken).value(),
        pool.pool_amount(PoolToken::ShortToken).value(),
        pool.share_supply
    );

    let id = engine
        .create_withdrawal(LP, ETH_USD, shares / dec!(2), Amount::zero(), Amount::zero())
        .unwrap();
    let result = engine
        .execute_withdrawal(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .executed()
        .unwrap();
    println!(
        "  Withdraw half: {:.4} ETH + {:.2} USDC returned\n",
        result.long_token_out.value(),
        result.short_token_out.value()
    );
}

/// Open a 5x long, ride a 10% rally, close at a profit paid by the pool.
fn scenario_2_long_lifecycle() {
    println!("Scenario 2: Leveraged Long Lifecycle\n");

    let mut engine = setup(dec!(5000));
    engine
        .fund_account(ALICE, USDC, Amount::new(dec!(10_000)))
        .unwrap();

    let id = engine
        .create_increase(
            ALICE,
            ETH_USD,
            USDC,
            Side::Long,
            Usd::new(dec!(50_000)),
            Amount::new(dec!(10_000)),
            None,
        )
        .unwrap();
    let outcome = engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
    if let Some(PositionOutcome::Increased(r)) = outcome.executed() {
        println!("  Alice opens $50,000 long with $10,000 collateral");
        println!(
            "  Execution price ${:.2}, impact ${:.4}, fees ${:.2}",
            r.execution_price,
            r.price_impact_usd.value(),
            r.fees_usd.value()
        );
    }

    let key = PositionKey {
        account: ALICE,
        market: ETH_USD,
        collateral_token: USDC,
        side: Side::Long,
    };
    engine.advance_time(3600);
    let marks = prices_at(3600, dec!(5500));
    let info = engine.position_info(&key, &marks).unwrap();
    println!(
        "  ETH rallies to $5,500: pnl ${:.2}, leverage {:.2}x",
        info.pnl_usd.value(),
        info.leverage.unwrap_or(Decimal::ZERO)
    );

    let id = engine
        .create_decrease(key, Usd::new(dec!(50_000)), Amount::zero(), None)
        .unwrap();
    let outcome = engine.execute_position(KEEPER, id, &marks).unwrap();
    if let Some(PositionOutcome::Decreased(r)) = outcome.executed() {
        println!(
            "  Full close: realized pnl ${:.2}, closed={}",
            r.realized_pnl_usd.value(),
            r.closed
        );
        for (token, amount) in &r.payouts {
            println!("  Payout: {:.4} of {:?}", amount.value(), token);
        }
    }
    println!();
}

/// A skewed market accrues borrowing on both sides and funding from the
/// heavy side to the light side.
fn scenario_3_funding_and_borrowing() {
    println!("Scenario 3: Funding and Borrowing Accrual\n");

    let mut engine = setup(dec!(5000));
    for (account, side, size) in [
        (ALICE, Side::Long, dec!(400_000)),
        (BOB, Side::Short, dec!(100_000)),
    ] {
        engine
            .fund_account(account, USDC, Amount::new(dec!(100_000)))
            .unwrap();
        let id = engine
            .create_increase(
                account,
                ETH_USD,
                USDC,
                side,
                Usd::new(size),
                Amount::new(dec!(100_000)),
                None,
            )
            .unwrap();
        engine
            .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
            .unwrap();
    }
    println!("  Alice long $400,000, Bob short $100,000 (4:1 skew)");

    let alice = PositionKey {
        account: ALICE,
        market: ETH_USD,
        collateral_token: USDC,
        side: Side::Long,
    };
    // the funding rate only persists on touches: trim a sliver after four
    // hours so the ratcheted rate applies over the second half
    engine.advance_time(4 * 3600);
    let id = engine
        .create_decrease(alice, Usd::new(dec!(1000)), Amount::zero(), None)
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(4 * 3600, dec!(5000)))
        .unwrap();
    engine.advance_time(4 * 3600);
    let marks = prices_at(8 * 3600, dec!(5000));
    let bob = PositionKey {
        account: BOB,
        market: ETH_USD,
        collateral_token: USDC,
        side: Side::Short,
    };
    let a = engine.position_info(&alice, &marks).unwrap();
    let b = engine.position_info(&bob, &marks).unwrap();
    println!(
        "  After 8h: Alice owes borrowing ${:.4}, funding ${:.4}",
        a.pending_borrowing_usd.value(),
        a.pending_funding_usd.value()
    );
    println!(
        "  After 8h: Bob owes borrowing ${:.4}, funding ${:.4}",
        b.pending_borrowing_usd.value(),
        b.pending_funding_usd.value()
    );

    let id = engine
        .create_decrease(bob, Usd::new(dec!(100_000)), Amount::zero(), None)
        .unwrap();
    engine.execute_position(KEEPER, id, &marks).unwrap();
    let claimable = engine.claimable_funding(BOB, ETH_USD, USDC);
    println!(
        "  Bob closes; claimable funding parked for him: {:.6} USDC\n",
        claimable.value()
    );
}

/// A 20x long gets margin-called by a 5% drop.
fn scenario_4_liquidation() {
    println!("Scenario 4: Liquidation\n");

    let mut engine = setup(dec!(5000));
    engine
        .fund_account(ALICE, USDC, Amount::new(dec!(2500)))
        .unwrap();
    let id = engine
        .create_increase(
            ALICE,
            ETH_USD,
            USDC,
            Side::Long,
            Usd::new(dec!(50_000)),
            Amount::new(dec!(2500)),
            None,
        )
        .unwrap();
    engine
        .execute_position(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap();
    println!("  Alice opens $50,000 long with $2,500 collateral (20x)");

    let key = PositionKey {
        account: ALICE,
        market: ETH_USD,
        collateral_token: USDC,
        side: Side::Long,
    };
    engine.advance_time(60);
    let healthy = prices_at(60, dec!(4950));
    println!(
        "  ETH at $4,950: liquidatable = {}",
        engine.is_liquidatable(&key, &healthy).unwrap()
    );

    let crashed = prices_at(60, dec!(4775));
    println!(
        "  ETH at $4,775: liquidatable = {}",
        engine.is_liquidatable(&key, &crashed).unwrap()
    );
    let outcome = engine
        .liquidate(KEEPER, &key, &crashed)
        .unwrap()
        .executed()
        .unwrap();
    println!(
        "  Liquidated ${:.2}, remaining collateral ${:.2}, shortfall ${:.2}\n",
        outcome.size_liquidated_usd.value(),
        outcome.remaining_collateral_usd.value(),
        outcome.insolvent_shortfall_usd.value()
    );
}

/// A vault spreads liquidity over two same-pair markets and rebalances.
fn scenario_5_vault_aggregation() {
    println!("Scenario 5: Vault Aggregation\n");

    let mut engine = setup(dec!(5000));
    let mut second = MarketConfig::eth_usd(MarketId(2), ETH, USDC);
    second.name = "ETH/USD [ETH-USDC] #2".to_string();
    engine.register_market(ADMIN, second).unwrap();
    engine
        .register_vault(
            ADMIN,
            Vault::new(VaultId(1), "ETH-USDC vault".to_string(), ETH, USDC),
        )
        .unwrap();
    let caps = VaultMarketCaps {
        max_share_balance: dec!(10_000_000),
        max_balance_usd: dec!(10_000_000),
    };
    for market in [ETH_USD, MarketId(2)] {
        engine
            .add_vault_market(ADMIN, VaultId(1), market, caps.clone())
            .unwrap();
    }

    engine
        .fund_account(BOB, USDC, Amount::new(dec!(200_000)))
        .unwrap();
    let id = engine
        .create_vault_deposit(
            BOB,
            VaultId(1),
            ETH_USD,
            Amount::zero(),
            Amount::new(dec!(200_000)),
            Decimal::ZERO,
        )
        .unwrap();
    let result = engine
        .execute_vault_deposit(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .executed()
        .unwrap();
    println!(
        "  Bob deposits $200,000 via the vault: {:.2} vault shares",
        result.vault_shares_minted
    );

    let held = engine.vault(VaultId(1)).unwrap().share_balance(ETH_USD);
    engine
        .shift_vault_market(
            KEEPER,
            VaultId(1),
            ETH_USD,
            MarketId(2),
            held / dec!(2),
            &prices_at(0, dec!(5000)),
        )
        .unwrap();
    let vault = engine.vault(VaultId(1)).unwrap();
    println!(
        "  Keeper rebalances half into market #2: {:.2} / {:.2} shares",
        vault.share_balance(ETH_USD),
        vault.share_balance(MarketId(2))
    );

    let shares = engine.vault_share_balance(BOB, VaultId(1));
    let id = engine
        .create_vault_withdrawal(
            BOB,
            VaultId(1),
            ETH_USD,
            shares / dec!(4),
            Amount::zero(),
            Amount::zero(),
        )
        .unwrap();
    let result = engine
        .execute_vault_withdrawal(KEEPER, id, &prices_at(0, dec!(5000)))
        .unwrap()
        .executed()
        .unwrap();
    println!(
        "  Bob redeems a quarter: {:.4} ETH + {:.2} USDC",
        result.long_token_out.value(),
        result.short_token_out.value()
    );
}
