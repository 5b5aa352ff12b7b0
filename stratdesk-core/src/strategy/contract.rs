//! Selector output contract.
//!
//! `run_checked` is the only way a selector's raw output becomes a `CandidateSet`.
//! A breach fails the run before any allocation is computed.

use thiserror::Error;

use super::{CandidateSelector, StrategyError};
use crate::candidates::{CandidateSet, Side};
use crate::config::StrategyConfig;
use crate::prices::PriceFrame;

/// Selector output or input that breaks the contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("{side} candidate '{symbol}' is not in the symbol universe")]
    NotInUniverse { symbol: String, side: Side },

    #[error("'{symbol}' is both a long and a short candidate")]
    Overlap { symbol: String },

    #[error("{side} candidate '{symbol}' is listed twice")]
    Duplicate { symbol: String, side: Side },

    #[error("price frame has {rows} rows, selector needs at least {required}")]
    InsufficientHistory { rows: usize, required: usize },

    #[error("selector '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },
}

/// Run a selector and check its output against the universe.
///
/// The price frame must hold at least `required_lookback + 1` rows so the
/// longest horizon has a reference price.
pub fn run_checked(
    selector: &dyn CandidateSelector,
    prices: &PriceFrame,
    params: &StrategyConfig,
    universe: &[String],
) -> Result<CandidateSet, ContractViolation> {
    let failed = |e: StrategyError| ContractViolation::StrategyFailed {
        strategy: selector.name().to_string(),
        reason: e.to_string(),
    };

    let lookback = selector.required_lookback(params).map_err(failed)?;
    let required = usize::try_from(lookback)
        .ok()
        .and_then(|n| n.checked_add(1))
        .ok_or_else(|| ContractViolation::InsufficientHistory {
            rows: prices.len(),
            required: usize::MAX,
        })?;
    if prices.len() < required {
        return Err(ContractViolation::InsufficientHistory {
            rows: prices.len(),
            required,
        });
    }

    let (long, short) = selector.select(prices, params).map_err(failed)?;
    CandidateSet::new(long, short, universe)
}
