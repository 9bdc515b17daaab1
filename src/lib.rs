// perp-pools: perpetual DEX pool accounting engine.
// pool-first architecture: every market is a two-token liquidity pool backing
// leveraged positions, and every monetary effect settles against that pool.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Usd, Amount, Side, Timestamp
//   2.x  prices.rs: min/max price pairs, per-call price context
//   3.x  market.rs: market config, pool state, open interest ledger
//   4.x  price_impact.rs: power-law impact for swaps and positions
//   5.x  fees.rs: borrowing index, position/swap fees, protocol split
//   6.x  funding.rs: velocity-based funding rate, per-size accumulators
//   7.x  pnl.rs: position/market pnl, capped pool valuation, share price
//   8.x  position.rs: position record and pure per-position math
//   9.x  liquidation.rs: margin floor and insolvency detection
//   10.x claims.rs: deferred payout ledgers (funding, collateral, fees)
//   11.x request.rs: two-phase request store and typed cancel reasons
//   12.x vault.rs: vault aggregator over same-pair markets
//   13.x events.rs: state transition events for audit
//   14.x engine/: orchestration: lifecycle, accrual, liquidity, positions,
//        liquidations, vault plumbing

// pool and pricing modules
pub mod fees;
pub mod funding;
pub mod market;
pub mod pnl;
pub mod price_impact;
pub mod prices;
pub mod types;

// position and settlement modules
pub mod claims;
pub mod liquidation;
pub mod position;

// lifecycle modules
pub mod engine;
pub mod events;
pub mod request;
pub mod vault;

// re exports for convenience
pub use claims::*;
pub use engine::*;
pub use events::*;
pub use fees::*;
pub use funding::*;
pub use liquidation::*;
pub use market::*;
pub use pnl::*;
pub use position::*;
pub use price_impact::*;
pub use prices::*;
pub use request::*;
pub use types::*;
pub use vault::{Vault, VaultError, VaultMarketCaps};
