//! Candidate selection: the strategy side of the orchestration boundary.
//!
//! A selector looks at trailing prices and its own parameters and returns two
//! ordered symbol lists. It never sees sessions, credentials, or the network.
//! Outputs are checked against the contract in `contract.rs` before anything
//! downstream consumes them.

mod contract;
mod momentum;

pub use contract::{run_checked, ContractViolation};
pub use momentum::MultiPeriodMomentum;

use crate::config::StrategyConfig;
use crate::prices::PriceFrame;

// ─── Error type ──────────────────────────────────────────────────────

/// Errors raised inside a selector.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("missing strategy parameter '{0}'")]
    MissingParam(String),

    #[error("invalid strategy parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("price frame has {rows} rows, strategy needs {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("{0}")]
    Other(String),
}

// ─── Selector trait ──────────────────────────────────────────────────

/// Trait for candidate selectors.
///
/// # Architecture invariant
/// `select` receives only a price frame and strategy parameters. Selectors that
/// need anything else (session state, positions, the engine) are out of contract.
pub trait CandidateSelector: Send + Sync {
    /// Registry name (e.g., "multi_period_momentum").
    fn name(&self) -> &str;

    /// Trailing minutes of history this selector reads.
    fn required_lookback(&self, params: &StrategyConfig) -> Result<u64, StrategyError>;

    /// Returns `(long_candidates, short_candidates)`, each in ranked order.
    fn select(
        &self,
        prices: &PriceFrame,
        params: &StrategyConfig,
    ) -> Result<(Vec<String>, Vec<String>), StrategyError>;
}

/// Look up a built-in selector by name.
pub fn builtin_selector(name: &str) -> Option<Box<dyn CandidateSelector>> {
    match name {
        "multi_period_momentum" => Some(Box::new(MultiPeriodMomentum)),
        _ => None,
    }
}
