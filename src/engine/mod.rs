// 8.0: position lifecycle controller. coordinates validation, deduplication,
// eligibility, the ledger transitions for open and close, and revaluation.
// synchronous and short; callers put it on a blocking pool if they need to.

mod closing;
mod config;
mod core;
mod opening;
mod results;
mod revaluation;

pub use config::{EngineConfig, SpreadTable};
pub use core::Engine;
pub use results::{
    CloseOutcome, CloseRequest, EngineError, FailedClose, ListOutcome, MarkOutcome, OpenOutcome, OpenRequest,
    Outcome, RevalueOutcome, TradeResult, TriggeredClose,
};
