//! Pre-flight pipeline: validate → select → check contract → allocate.
//!
//! Everything a submission needs that can be decided locally. A `Preflight`
//! value is proof that the bundle passed validation and the selector honoured
//! its contract, so the runner never uploads an unchecked configuration.

use serde::Serialize;
use thiserror::Error;

use crate::candidates::CandidateSet;
use crate::config::ConfigBundle;
use crate::prices::{MissingSymbols, PriceFrame};
use crate::strategy::{run_checked, CandidateSelector, ContractViolation};
use crate::validate::{ValidatedConfig, ValidationError};
use crate::weights::{AllocationError, WeightAllocation};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreflightError {
    #[error("configuration invalid: {0}")]
    Validation(#[from] ValidationError),

    #[error("strategy contract violated: {0}")]
    Contract(#[from] ContractViolation),

    #[error("weight allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    MissingPrices(#[from] MissingSymbols),
}

/// Locally checked inputs for one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preflight {
    pub config: ValidatedConfig,
    pub candidates: CandidateSet,
    pub allocation: WeightAllocation,
}

/// Run the full local pipeline.
///
/// Prices are projected onto the configured universe and trimmed to the
/// lookback (plus the reference row) before the selector sees them.
pub fn preflight(
    bundle: &ConfigBundle,
    selector: &dyn CandidateSelector,
    prices: &PriceFrame,
) -> Result<Preflight, PreflightError> {
    let config = bundle.validate()?;
    if let Some(settings) = &bundle.backtest {
        crate::validate::validate_backtest_window(settings)?;
    }

    let window = usize::try_from(config.lookback_minutes)
        .unwrap_or(usize::MAX)
        .saturating_add(1);
    let trailing = prices.select(&config.symbols)?.tail(window);

    let candidates = run_checked(selector, &trailing, &config.strategy, &config.symbols)?;
    let allocation = config.allocate_for(&candidates)?;

    Ok(Preflight {
        config,
        candidates,
        allocation,
    })
}

/// Validation and static allocation only, for configs whose weights do not
/// depend on candidates (`equal`, `custom`).
pub fn preflight_static(bundle: &ConfigBundle) -> Result<Preflight, PreflightError> {
    let config = bundle.validate()?;
    if let Some(settings) = &bundle.backtest {
        crate::validate::validate_backtest_window(settings)?;
    }
    let allocation = match config.static_allocation()? {
        Some(a) => a,
        // split needs candidates; allocate over an empty set to surface NoCandidates
        None => config.allocate_for(&CandidateSet::empty())?,
    };
    Ok(Preflight {
        config,
        candidates: CandidateSet::empty(),
        allocation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MultiPeriodMomentum;
    use chrono::{Duration, NaiveDate};

    const BUNDLE: &str = r#"
[system]
strategy_name = "multi_period_momentum"
symbols = ["BTCUSDT", "ETHUSDT", "XRPUSDT"]
weight_method = "split"
leverage = 10
capital = 200000
lookback_minutes = 10

[rebalancing]
rebalancing_interval_hours = 6

[strategy]
minutes = [5, 10]
long_maximum_candidates = 1
short_maximum_candidates = 1
"#;

    fn prices(rows: usize) -> PriceFrame {
        prices_for(&["BTCUSDT", "ETHUSDT", "XRPUSDT"], &[0.002, -0.002, 0.0005], rows)
    }

    fn prices_for(symbols: &[&str], rates: &[f64], rows: usize) -> PriceFrame {
        let start = NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let ts = (0..rows).map(|i| start + Duration::minutes(i as i64)).collect();
        let columns = rates
            .iter()
            .map(|r: &f64| (0..rows).map(|i| 50.0 * (1.0 + r).powi(i as i32)).collect())
            .collect();
        PriceFrame::new(ts, symbols.iter().map(|s| s.to_string()).collect(), columns).unwrap()
    }

    #[test]
    fn split_pipeline_produces_candidate_weights() {
        let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        // Longer history than needed; the pipeline trims it.
        let pf = preflight(&bundle, &MultiPeriodMomentum, &prices(40)).unwrap();
        assert_eq!(pf.candidates.longs(), &["BTCUSDT".to_string()]);
        assert_eq!(pf.candidates.shorts(), &["ETHUSDT".to_string()]);
        assert_eq!(pf.allocation.get("BTCUSDT"), Some(0.5));
        assert_eq!(pf.allocation.get("ETHUSDT"), Some(0.5));
        assert_eq!(pf.allocation.get("XRPUSDT"), None);
    }

    #[test]
    fn columns_outside_universe_are_ignored() {
        let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        // DOGE would rank first if the selector saw it.
        let frame = prices_for(
            &["DOGEUSDT", "BTCUSDT", "ETHUSDT", "XRPUSDT"],
            &[0.01, 0.002, -0.002, 0.0005],
            40,
        );
        let pf = preflight(&bundle, &MultiPeriodMomentum, &frame).unwrap();
        assert_eq!(pf.candidates.longs(), &["BTCUSDT".to_string()]);
        assert_eq!(pf.candidates.side_of("DOGEUSDT"), None);
    }

    #[test]
    fn universe_symbol_without_prices_is_rejected() {
        let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        let frame = prices_for(&["BTCUSDT", "ETHUSDT"], &[0.002, -0.002], 40);
        let err = preflight(&bundle, &MultiPeriodMomentum, &frame).unwrap_err();
        assert_eq!(
            err,
            PreflightError::MissingPrices(MissingSymbols {
                symbols: vec!["XRPUSDT".into()]
            })
        );
    }

    #[test]
    fn invalid_config_stops_before_selection() {
        let mut bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        bundle.rebalancing.rebalancing_interval_hours = 5;
        let err = preflight(&bundle, &MultiPeriodMomentum, &prices(40)).unwrap_err();
        assert!(matches!(err, PreflightError::Validation(_)));
    }

    #[test]
    fn short_history_is_contract_error() {
        let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        let err = preflight(&bundle, &MultiPeriodMomentum, &prices(5)).unwrap_err();
        assert!(matches!(
            err,
            PreflightError::Contract(ContractViolation::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn static_preflight_for_equal() {
        let mut bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        bundle.system.weight_method = "equal".into();
        let pf = preflight_static(&bundle).unwrap();
        assert_eq!(pf.allocation.len(), 3);
        assert!(pf.candidates.is_empty());
    }

    #[test]
    fn static_preflight_for_split_needs_candidates() {
        let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
        let err = preflight_static(&bundle).unwrap_err();
        assert_eq!(err, PreflightError::Allocation(AllocationError::NoCandidates));
    }
}
