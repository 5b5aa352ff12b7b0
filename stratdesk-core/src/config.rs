//! Configuration bundle: system, rebalancing, strategy, and backtest sections.
//!
//! The bundle is stored as a single TOML file:
//!
//! ```toml
//! [system]
//! strategy_name = "multi_period_momentum"
//! symbols = ["BTCUSDT", "ETHUSDT", "XRPUSDT"]
//! weight_method = "equal"
//! leverage = 10
//! capital = 200000
//! lookback_minutes = 360
//!
//! [rebalancing]
//! rebalancing_interval_hours = 72
//! minimum_candidates = 0
//!
//! [strategy]
//! minutes = [60, 180, 360]
//! long_maximum_candidates = 2
//! short_maximum_candidates = 1
//! ```
//!
//! Fields here are deliberately loose (strings, signed integers, JSON values) so that
//! every invariant is checked in one place, `validate::validate`, with a precise error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::validate::{self, ValidatedConfig, ValidationError};

/// Errors loading a configuration bundle from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Market the strategy trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    #[default]
    Future,
    Spot,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Future => "future",
            TradeType::Spot => "spot",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System-level settings: universe, venue metadata, sizing, and weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub strategy_name: String,

    #[serde(default)]
    pub trade_type: TradeType,

    /// Ordered symbol universe. Must be non-empty and unique.
    pub symbols: Vec<String>,

    #[serde(default = "default_product_type")]
    pub product_type: String,

    #[serde(default = "default_margin_coin")]
    pub margin_coin: String,

    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// One of `equal`, `split`, `custom`. Checked by the validator.
    pub weight_method: String,

    /// Required when `weight_method = "custom"`. Values may be numbers or numeric strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_weights: Option<BTreeMap<String, serde_json::Value>>,

    pub leverage: f64,

    pub capital: f64,

    /// Trailing minutes of price history supplied to the strategy.
    pub lookback_minutes: u64,
}

fn default_product_type() -> String {
    "susdt-futures".into()
}

fn default_margin_coin() -> String {
    "susdt".into()
}

fn default_timeframe() -> String {
    "1min".into()
}

/// Rebalancing cadence and candidate floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancingConfig {
    pub rebalancing_interval_hours: i64,

    #[serde(default)]
    pub minimum_candidates: i64,
}

/// Error for a `minutes`-typed field that does not hold minute counts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("strategy parameter '{path}' is a minutes field but holds a non-integer or negative value")]
pub struct MinutesFieldError {
    pub path: String,
}

/// Strategy-specific parameters.
///
/// Opaque to the orchestrator except for keys containing `minute`, whose values
/// (an integer, a list of integers, or nested tables of those) determine how much
/// history the strategy needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyConfig(BTreeMap<String, serde_json::Value>);

impl StrategyConfig {
    pub fn new(params: BTreeMap<String, serde_json::Value>) -> Self {
        Self(params)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn params(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.0
    }

    /// Non-negative integer parameter, or `None` if absent or not an integer.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.0
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Largest value among every `minutes`-typed field, at any nesting depth.
    ///
    /// Returns `Ok(None)` when the strategy declares no minutes fields.
    pub fn max_minutes(&self) -> Result<Option<u64>, MinutesFieldError> {
        let mut max = None;
        for (key, value) in &self.0 {
            collect_minutes(key, value, false, &mut max)?;
        }
        Ok(max)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }
}

fn is_minutes_key(key: &str) -> bool {
    key.to_ascii_lowercase().contains("minute")
}

fn collect_minutes(
    path: &str,
    value: &serde_json::Value,
    inside_minutes: bool,
    max: &mut Option<u64>,
) -> Result<(), MinutesFieldError> {
    let leaf = path.rsplit('.').next().unwrap_or(path);
    let is_minutes = inside_minutes || is_minutes_key(leaf);

    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                collect_minutes(&format!("{path}.{k}"), v, is_minutes, max)?;
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_minutes(&format!("{path}[{i}]"), item, is_minutes, max)?;
            }
        }
        v if is_minutes => {
            let minutes = v.as_u64().ok_or_else(|| MinutesFieldError {
                path: path.to_string(),
            })?;
            *max = Some(max.map_or(minutes, |m: u64| m.max(minutes)));
        }
        _ => {}
    }
    Ok(())
}

/// Backtest window and report settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    #[serde(default = "default_calendar")]
    pub calendar: String,

    #[serde(default = "default_frequency")]
    pub frequency: String,

    /// Ask the engine for an HTML report in addition to logs.
    #[serde(default = "default_true")]
    pub generate_report: bool,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_calendar() -> String {
    "24/7".into()
}

fn default_frequency() -> String {
    "minute".into()
}

fn default_true() -> bool {
    true
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("backtest_reports")
}

/// Complete configuration bundle for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub system: SystemConfig,
    pub rebalancing: RebalancingConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest: Option<BacktestSettings>,
}

impl ConfigBundle {
    /// Load a bundle from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a bundle from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Run the full validator over this bundle.
    pub fn validate(&self) -> Result<ValidatedConfig, ValidationError> {
        validate::validate(&self.system, &self.rebalancing, &self.strategy)
    }
}
