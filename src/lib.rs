// margin-settle: settlement engine for leveraged, fixed-investment margin positions.
// money-safety first: every balance change is one atomic ledger transition.
// the engine itself is synchronous and deterministic given a clock.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: HolderId, PositionId, Direction, Price, Quote, Multiplier, Clock
//   2.x  math.rs: spread, volume, pnl, liquidation price, triggers, loss cap
//   3.x  position.rs: position record, revaluation, terminal settlement
//   4.x  balance.rs: holder balances with optimistic versions
//   5.x  idempotency.rs: explicit-key and fingerprint deduplication
//   6.x  ledger.rs: LedgerStore trait + in-memory store, atomic open/close
//   7.x  eligibility.rs: eligibility port + static tier policy
//   8.x  engine/: lifecycle controller: open, close, cancel, revalue, list
//   9.x  events.rs: audit events and sinks
//   10.x config.rs: service config, logging setup
//   11.x api/: warp routes, DTOs, status mapping

// core modules
pub mod balance;
pub mod engine;
pub mod idempotency;
pub mod ledger;
pub mod math;
pub mod position;
pub mod types;

// collaborator ports
pub mod eligibility;
pub mod events;

// service modules
pub mod api;
pub mod config;

// re exports for convenience
pub use balance::*;
pub use eligibility::*;
pub use engine::*;
pub use events::*;
pub use idempotency::*;
pub use ledger::*;
pub use math::{ValidatedOpen, ValidationError, MONEY_SCALE};
pub use position::*;
pub use types::*;
pub use api::{routes, ApiContext, ApiError};
pub use config::{ConfigError, LoggingConfig, SeedBalance, ServerConfig, ServiceConfig};
