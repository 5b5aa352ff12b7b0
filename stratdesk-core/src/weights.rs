//! Weight allocation: turn a universe and a candidate set into capital fractions.
//!
//! Three methods:
//! - `equal`: every universe symbol gets `1 / |universe|`
//! - `split`: half the book long, half short; `0.5 / L` per long, `0.5 / S` per short.
//!   When one side is empty the other side takes the whole book (`1 / L` or `1 / S`).
//! - `custom`: user-supplied weights, already validated to sum to 1.0, passed through.
//!
//! Every successful allocation sums to 1.0 and only names universe symbols.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tolerance for derived allocations (`equal`, `split`).
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Tolerance for user-supplied `custom` weights.
pub const CUSTOM_WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weighting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMethod {
    Equal,
    Split,
    Custom,
}

impl WeightMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightMethod::Equal => "equal",
            WeightMethod::Split => "split",
            WeightMethod::Custom => "custom",
        }
    }
}

impl fmt::Display for WeightMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeightMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(WeightMethod::Equal),
            "split" => Ok(WeightMethod::Split),
            "custom" => Ok(WeightMethod::Custom),
            other => Err(format!(
                "unknown weight method '{other}'. Valid: equal, split, custom"
            )),
        }
    }
}

/// Errors from weight allocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    #[error("cannot allocate over an empty symbol universe")]
    EmptyUniverse,

    #[error("split allocation needs at least one long or short candidate, both sides are empty")]
    NoCandidates,

    #[error("custom allocation requested without custom_weights")]
    MissingCustomWeights,

    #[error("symbol '{symbol}' is not in the configured universe")]
    UnknownSymbol { symbol: String },

    #[error("symbol '{symbol}' appears more than once among the candidates")]
    DuplicateCandidate { symbol: String },

    #[error("symbol '{symbol}' is both a long and a short candidate")]
    OverlappingCandidates { symbol: String },

    #[error("weights sum to {sum}, expected 1.0")]
    BadSum { sum: f64 },
}

/// Per-symbol capital fractions.
///
/// Backed by a `BTreeMap` so iteration and serialization are deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightAllocation {
    weights: BTreeMap<String, f64>,
}

impl WeightAllocation {
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.weights.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(s, w)| (s.as_str(), *w))
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }
}

/// Compute a weight allocation.
///
/// `long_candidates` / `short_candidates` are only consulted for `split`;
/// `custom_weights` only for `custom`.
pub fn allocate(
    symbols: &[String],
    method: WeightMethod,
    custom_weights: Option<&BTreeMap<String, f64>>,
    long_candidates: Option<&[String]>,
    short_candidates: Option<&[String]>,
) -> Result<WeightAllocation, AllocationError> {
    if symbols.is_empty() {
        return Err(AllocationError::EmptyUniverse);
    }
    let universe: HashSet<&str> = symbols.iter().map(|s| s.as_str()).collect();

    let (weights, tolerance) = match method {
        WeightMethod::Equal => {
            let w = 1.0 / symbols.len() as f64;
            let weights: BTreeMap<String, f64> = symbols.iter().map(|s| (s.clone(), w)).collect();
            (weights, WEIGHT_SUM_TOLERANCE)
        }
        WeightMethod::Split => (
            split_weights(
                &universe,
                long_candidates.unwrap_or(&[]),
                short_candidates.unwrap_or(&[]),
            )?,
            WEIGHT_SUM_TOLERANCE,
        ),
        WeightMethod::Custom => {
            let custom = custom_weights.ok_or(AllocationError::MissingCustomWeights)?;
            if let Some(unknown) = custom.keys().find(|s| !universe.contains(s.as_str())) {
                return Err(AllocationError::UnknownSymbol {
                    symbol: unknown.clone(),
                });
            }
            (custom.clone(), CUSTOM_WEIGHT_TOLERANCE)
        }
    };

    let allocation = WeightAllocation { weights };
    let sum = allocation.total();
    if (sum - 1.0).abs() > tolerance {
        return Err(AllocationError::BadSum { sum });
    }
    Ok(allocation)
}

fn split_weights(
    universe: &HashSet<&str>,
    longs: &[String],
    shorts: &[String],
) -> Result<BTreeMap<String, f64>, AllocationError> {
    if longs.is_empty() && shorts.is_empty() {
        return Err(AllocationError::NoCandidates);
    }

    // One side empty → the other side carries the full book.
    let (long_share, short_share) = match (longs.is_empty(), shorts.is_empty()) {
        (false, false) => (0.5, 0.5),
        (false, true) => (1.0, 0.0),
        _ => (0.0, 1.0),
    };

    let mut weights = BTreeMap::new();
    for (side, share) in [(longs, long_share), (shorts, short_share)] {
        if side.is_empty() {
            continue;
        }
        let w = share / side.len() as f64;
        for symbol in side {
            if !universe.contains(symbol.as_str()) {
                return Err(AllocationError::UnknownSymbol {
                    symbol: symbol.clone(),
                });
            }
            if weights.insert(symbol.clone(), w).is_some() {
                let in_longs = longs.iter().any(|s| s == symbol);
                let in_shorts = shorts.iter().any(|s| s == symbol);
                return Err(if in_longs && in_shorts {
                    AllocationError::OverlappingCandidates {
                        symbol: symbol.clone(),
                    }
                } else {
                    AllocationError::DuplicateCandidate {
                        symbol: symbol.clone(),
                    }
                });
            }
        }
    }
    Ok(weights)
}
