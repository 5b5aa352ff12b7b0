//! Pre-flight configuration validation.
//!
//! `validate()` is the single boundary where loosely-typed config sections become a
//! normalized `ValidatedConfig`. Checks run in a fixed order and stop at the first
//! violation:
//!
//! 0. universe is non-empty, symbols unique and non-blank
//! 1. `weight_method` is `equal`, `split`, or `custom`
//! 2. `custom` weights: present, keys in universe, values non-negative numbers, sum = 1.0 ± 1e-6
//! 3. `rebalancing_interval_hours` is one of 6, 12, 24, 72
//! 4. `0 <= minimum_candidates <= |universe|`
//! 5. system lookback covers the largest `minutes` field of the strategy
//! 6. leverage and capital are positive
//!
//! Nothing here touches the network or the filesystem.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::candidates::CandidateSet;
use crate::config::{RebalancingConfig, StrategyConfig, SystemConfig, TradeType};
use crate::weights::{
    allocate, AllocationError, WeightAllocation, WeightMethod, CUSTOM_WEIGHT_TOLERANCE,
};

/// Rebalancing intervals (hours) the remote engine schedules.
pub const ALLOWED_REBALANCING_HOURS: [u32; 4] = [6, 12, 24, 72];

/// Local configuration violations. Never sent to the network, never auto-corrected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("symbol universe is empty")]
    EmptyUniverse,

    #[error("symbol at position {index} is blank")]
    BlankSymbol { index: usize },

    #[error("symbol '{symbol}' appears more than once in the universe")]
    DuplicateSymbol { symbol: String },

    #[error("unknown weight_method '{value}' (expected equal, split, or custom)")]
    UnknownWeightMethod { value: String },

    #[error("weight_method is 'custom' but custom_weights is missing or empty")]
    MissingCustomWeights,

    #[error("custom_weights names '{symbol}', which is not in the symbol universe")]
    CustomWeightOutsideUniverse { symbol: String },

    #[error("custom weight for '{symbol}' is not a number: {value}")]
    CustomWeightNotNumeric { symbol: String, value: String },

    #[error("custom weight for '{symbol}' is negative: {weight}")]
    NegativeCustomWeight { symbol: String, weight: f64 },

    #[error("custom_weights sum to {sum} (off by {delta:+.6e} from 1.0, tolerance {tolerance:e})")]
    CustomWeightSum { sum: f64, delta: f64, tolerance: f64 },

    #[error("rebalancing_interval_hours = {hours} is not one of 6, 12, 24, 72")]
    RebalancingInterval { hours: i64 },

    #[error("minimum_candidates must be >= 0, got {value}")]
    NegativeMinimumCandidates { value: i64 },

    #[error("minimum_candidates = {minimum} exceeds the universe size {universe}")]
    MinimumCandidatesExceedUniverse { minimum: i64, universe: usize },

    #[error(transparent)]
    MalformedMinutesField(#[from] crate::config::MinutesFieldError),

    #[error("lookback_minutes = {lookback} is shorter than the {required} minutes required")]
    InsufficientLookback { lookback: u64, required: u64 },

    #[error("leverage must be positive and finite, got {0}")]
    NonPositiveLeverage(f64),

    #[error("capital must be positive and finite, got {0}")]
    NonPositiveCapital(f64),

    #[error("backtest start_date {start} is after end_date {end}")]
    InvertedBacktestWindow { start: String, end: String },
}

/// Normalized configuration, produced only by `validate()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedConfig {
    pub strategy_name: String,
    pub trade_type: TradeType,
    pub symbols: Vec<String>,
    pub product_type: String,
    pub margin_coin: String,
    pub timeframe: String,
    pub weight_method: WeightMethod,
    /// Present only when `weight_method` is `custom`.
    pub custom_weights: Option<BTreeMap<String, f64>>,
    pub leverage: f64,
    pub capital: f64,
    pub lookback_minutes: u64,
    pub rebalancing_interval_hours: u32,
    pub minimum_candidates: usize,
    pub strategy: StrategyConfig,
    /// Largest `minutes` value in the strategy parameters (0 if none).
    pub required_lookback: u64,
}

impl ValidatedConfig {
    pub fn universe(&self) -> &[String] {
        &self.symbols
    }

    /// Allocation for a given candidate set. `equal` and `custom` ignore the candidates.
    pub fn allocate_for(
        &self,
        candidates: &CandidateSet,
    ) -> Result<WeightAllocation, AllocationError> {
        allocate(
            &self.symbols,
            self.weight_method,
            self.custom_weights.as_ref(),
            Some(candidates.longs()),
            Some(candidates.shorts()),
        )
    }

    /// Allocation that does not depend on candidates, or `None` for `split`.
    pub fn static_allocation(&self) -> Result<Option<WeightAllocation>, AllocationError> {
        match self.weight_method {
            WeightMethod::Split => Ok(None),
            method => allocate(&self.symbols, method, self.custom_weights.as_ref(), None, None)
                .map(Some),
        }
    }
}

/// Validate the three config sections, failing on the first violation.
pub fn validate(
    system: &SystemConfig,
    rebalancing: &RebalancingConfig,
    strategy: &StrategyConfig,
) -> Result<ValidatedConfig, ValidationError> {
    // 0. Universe shape
    check_universe(&system.symbols)?;

    // 1. Weight method
    let weight_method: WeightMethod =
        system
            .weight_method
            .parse()
            .map_err(|_| ValidationError::UnknownWeightMethod {
                value: system.weight_method.clone(),
            })?;

    // 2. Custom weights
    let custom_weights = match weight_method {
        WeightMethod::Custom => Some(check_custom_weights(
            system.custom_weights.as_ref(),
            &system.symbols,
        )?),
        _ => None,
    };

    // 3. Rebalancing interval
    let interval = u32::try_from(rebalancing.rebalancing_interval_hours)
        .ok()
        .filter(|h| ALLOWED_REBALANCING_HOURS.contains(h))
        .ok_or(ValidationError::RebalancingInterval {
            hours: rebalancing.rebalancing_interval_hours,
        })?;

    // 4. Minimum candidates
    let minimum = rebalancing.minimum_candidates;
    if minimum < 0 {
        return Err(ValidationError::NegativeMinimumCandidates { value: minimum });
    }
    if minimum as u64 > system.symbols.len() as u64 {
        return Err(ValidationError::MinimumCandidatesExceedUniverse {
            minimum,
            universe: system.symbols.len(),
        });
    }

    // 5. Lookback covers the strategy's longest minutes field
    let required_lookback = strategy.max_minutes()?.unwrap_or(0);
    if system.lookback_minutes < required_lookback {
        return Err(ValidationError::InsufficientLookback {
            lookback: system.lookback_minutes,
            required: required_lookback,
        });
    }

    // 6. Sizing
    if !(system.leverage.is_finite() && system.leverage > 0.0) {
        return Err(ValidationError::NonPositiveLeverage(system.leverage));
    }
    if !(system.capital.is_finite() && system.capital > 0.0) {
        return Err(ValidationError::NonPositiveCapital(system.capital));
    }

    Ok(ValidatedConfig {
        strategy_name: system.strategy_name.clone(),
        trade_type: system.trade_type,
        symbols: system.symbols.clone(),
        product_type: system.product_type.clone(),
        margin_coin: system.margin_coin.clone(),
        timeframe: system.timeframe.clone(),
        weight_method,
        custom_weights,
        leverage: system.leverage,
        capital: system.capital,
        lookback_minutes: system.lookback_minutes,
        rebalancing_interval_hours: interval,
        minimum_candidates: minimum as usize,
        strategy: strategy.clone(),
        required_lookback,
    })
}

fn check_universe(symbols: &[String]) -> Result<(), ValidationError> {
    if symbols.is_empty() {
        return Err(ValidationError::EmptyUniverse);
    }
    let mut seen = HashSet::with_capacity(symbols.len());
    for (index, symbol) in symbols.iter().enumerate() {
        if symbol.trim().is_empty() {
            return Err(ValidationError::BlankSymbol { index });
        }
        if !seen.insert(symbol.as_str()) {
            return Err(ValidationError::DuplicateSymbol {
                symbol: symbol.clone(),
            });
        }
    }
    Ok(())
}

fn check_custom_weights(
    raw: Option<&BTreeMap<String, serde_json::Value>>,
    universe: &[String],
) -> Result<BTreeMap<String, f64>, ValidationError> {
    let raw = raw
        .filter(|w| !w.is_empty())
        .ok_or(ValidationError::MissingCustomWeights)?;

    let mut weights = BTreeMap::new();
    for (symbol, value) in raw {
        if !universe.iter().any(|s| s == symbol) {
            return Err(ValidationError::CustomWeightOutsideUniverse {
                symbol: symbol.clone(),
            });
        }
        let weight = numeric_weight(value).ok_or_else(|| ValidationError::CustomWeightNotNumeric {
            symbol: symbol.clone(),
            value: value.to_string(),
        })?;
        if weight < 0.0 {
            return Err(ValidationError::NegativeCustomWeight {
                symbol: symbol.clone(),
                weight,
            });
        }
        weights.insert(symbol.clone(), weight);
    }

    let sum: f64 = weights.values().sum();
    let delta = sum - 1.0;
    if delta.abs() > CUSTOM_WEIGHT_TOLERANCE {
        return Err(ValidationError::CustomWeightSum {
            sum,
            delta,
            tolerance: CUSTOM_WEIGHT_TOLERANCE,
        });
    }
    Ok(weights)
}

/// Numbers pass through; numeric strings ("0.5") are parsed.
fn numeric_weight(value: &serde_json::Value) -> Option<f64> {
    let w = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    w.is_finite().then_some(w)
}

/// Check a backtest date window.
pub fn validate_backtest_window(
    settings: &crate::config::BacktestSettings,
) -> Result<(), ValidationError> {
    if settings.start_date > settings.end_date {
        return Err(ValidationError::InvertedBacktestWindow {
            start: settings.start_date.to_string(),
            end: settings.end_date.to_string(),
        });
    }
    Ok(())
}
