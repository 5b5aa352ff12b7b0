//! StratDesk Core: configuration, weight allocation, strategy contract, session lifecycle.
//!
//! This crate holds everything that can be decided locally, before any network call:
//! - Typed configuration bundle (system, rebalancing, strategy, backtest sections)
//! - Fail-fast config validation into a normalized `ValidatedConfig`
//! - Weight allocation (`equal`, `split`, `custom`)
//! - Price frames and the candidate-selection strategy contract
//! - Pre-flight pipeline that ties validation, contract check, and allocation together
//! - Session state machine with an append-only transition history

pub mod candidates;
pub mod config;
pub mod preflight;
pub mod prices;
pub mod session;
pub mod strategy;
pub mod validate;
pub mod weights;

pub use candidates::{CandidateSet, Side};
pub use config::{
    BacktestSettings, ConfigBundle, ConfigError, RebalancingConfig, StrategyConfig, SystemConfig,
    TradeType,
};
pub use preflight::{preflight, preflight_static, Preflight, PreflightError};
pub use prices::{MissingSymbols, PriceFrame, PriceFrameError};
pub use session::{Session, SessionMode, SessionState, SessionTransition, TransitionError};
pub use strategy::{
    builtin_selector, run_checked, CandidateSelector, ContractViolation, MultiPeriodMomentum,
    StrategyError,
};
pub use validate::{validate, ValidatedConfig, ValidationError, ALLOWED_REBALANCING_HOURS};
pub use weights::{allocate, AllocationError, WeightAllocation, WeightMethod};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types that cross into the runner are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<ConfigBundle>();
        require_sync::<ConfigBundle>();
        require_send::<ValidatedConfig>();
        require_sync::<ValidatedConfig>();
        require_send::<WeightAllocation>();
        require_sync::<WeightAllocation>();
        require_send::<CandidateSet>();
        require_sync::<CandidateSet>();
        require_send::<PriceFrame>();
        require_sync::<PriceFrame>();
        require_send::<Session>();
        require_sync::<Session>();
        require_send::<Preflight>();
        require_sync::<Preflight>();
        require_send::<MultiPeriodMomentum>();
        require_sync::<MultiPeriodMomentum>();
    }

    /// Architecture contract: selectors see prices and parameters only.
    ///
    /// `select()` takes a `PriceFrame` and a `StrategyConfig`. It has no access to
    /// the session, credentials, or the remote engine.
    #[test]
    fn candidate_selector_has_no_session_parameter() {
        fn _check_trait_object_builds(
            sel: &dyn CandidateSelector,
            prices: &PriceFrame,
            params: &StrategyConfig,
        ) -> Result<(Vec<String>, Vec<String>), StrategyError> {
            sel.select(prices, params)
        }
    }
}
