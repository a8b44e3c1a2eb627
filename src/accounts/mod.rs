//! Per-account claiming.
//!
//! Every enabled account gets its own orchestrator task holding its filter
//! rules, rolling claim window, owned set and pending queue. The registry
//! fans classified entries out to all of them.

mod activity;
mod executor;
mod orchestrator;
mod registry;
mod state;

pub use activity::{ActivitySignal, ActivityTracker};
pub use executor::{
    ClaimError, ClaimExecutor, ClaimService, ExecutionResult, ExecutorConfig, MAX_BACKOFF,
};
pub use orchestrator::{AccountCommand, AccountHandle, AccountOrchestrator};
pub use registry::AccountRegistry;
pub use state::{AccountClaimState, ClaimWindow, CLAIM_WINDOW};
