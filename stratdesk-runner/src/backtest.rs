//! Backtest request payload and report persistence.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use stratdesk_core::{BacktestSettings, StrategyConfig, ValidatedConfig, WeightMethod};

use crate::credentials::Secret;

/// `strategy_config` section of the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyConfigPayload {
    pub rebalancing_config: RebalancingPayload,
    pub strategy_config: StrategyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebalancingPayload {
    pub rebalancing_interval_hours: u32,
    pub minimum_candidates: usize,
}

/// Body of `run/{trade_type}/backtest/`.
#[derive(Clone, PartialEq, Serialize)]
pub struct BacktestRequest {
    #[serde(serialize_with = "expose_secret")]
    pub data_apikey: Secret,
    /// Uploaded strategy file name, `{strategy_name}.py`.
    pub strategy: String,
    pub strategy_config: StrategyConfigPayload,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lookback_minutes: u64,
    pub capital: f64,
    pub leverage: f64,
    pub symbols: Vec<String>,
    pub calendar: String,
    pub frequency: String,
    pub weight_method: WeightMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_weights: Option<BTreeMap<String, f64>>,
    pub generate_pyfolio_report: bool,
}

fn expose_secret<S: serde::Serializer>(secret: &Secret, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose())
}

impl fmt::Debug for BacktestRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacktestRequest")
            .field("data_apikey", &"<REDACTED>")
            .field("strategy", &self.strategy)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("lookback_minutes", &self.lookback_minutes)
            .field("capital", &self.capital)
            .field("leverage", &self.leverage)
            .field("symbols", &self.symbols)
            .field("weight_method", &self.weight_method)
            .finish_non_exhaustive()
    }
}

impl BacktestRequest {
    /// Build from a validated config. Custom weights are only sent for `custom`.
    pub fn new(config: &ValidatedConfig, settings: &BacktestSettings, data_apikey: Secret) -> Self {
        Self {
            data_apikey,
            strategy: format!("{}.py", config.strategy_name),
            strategy_config: StrategyConfigPayload {
                rebalancing_config: RebalancingPayload {
                    rebalancing_interval_hours: config.rebalancing_interval_hours,
                    minimum_candidates: config.minimum_candidates,
                },
                strategy_config: config.strategy.clone(),
            },
            start_date: settings.start_date,
            end_date: settings.end_date,
            lookback_minutes: config.lookback_minutes,
            capital: config.capital,
            leverage: config.leverage,
            symbols: config.symbols.clone(),
            calendar: settings.calendar.clone(),
            frequency: settings.frequency.clone(),
            weight_method: config.weight_method,
            custom_weights: match config.weight_method {
                WeightMethod::Custom => config.custom_weights.clone(),
                _ => None,
            },
            generate_pyfolio_report: settings.generate_report,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.trim_end_matches(".py")
    }
}

/// `{%Y-%m-%d_%H-%M}_{strategy}_backtest_report.html`
pub fn report_file_name(strategy_name: &str, at: NaiveDateTime) -> String {
    format!(
        "{}_{}_backtest_report.html",
        at.format("%Y-%m-%d_%H-%M"),
        strategy_name
    )
}

/// Write an HTML report under `dir`, creating it if needed.
pub fn save_html_report(
    dir: &Path,
    strategy_name: &str,
    at: NaiveDateTime,
    html: &str,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(strategy_name, at));
    std::fs::write(&path, html)?;
    Ok(path)
}
