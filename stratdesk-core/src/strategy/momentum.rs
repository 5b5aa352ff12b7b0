//! Multi-period momentum selector.
//!
//! For each symbol, at the last row `t`:
//!
//! ```text
//! score = mean over h in minutes of ( (p[t] / p[t-h])^(1/h) - 1 )
//! ```
//!
//! Symbols are ranked by score, highest first. The top `long_maximum_candidates`
//! go long; the bottom `short_maximum_candidates` go short, minus anything already
//! long. Symbols with a missing or non-positive price at any reference row are skipped.

use super::{CandidateSelector, StrategyError};
use crate::config::StrategyConfig;
use crate::prices::PriceFrame;

#[derive(Debug, Clone, Copy, Default)]
pub struct MultiPeriodMomentum;

impl MultiPeriodMomentum {
    fn horizons(params: &StrategyConfig) -> Result<Vec<usize>, StrategyError> {
        let raw = params
            .get("minutes")
            .ok_or_else(|| StrategyError::MissingParam("minutes".into()))?;
        let invalid = |reason: &str| StrategyError::InvalidParam {
            name: "minutes".into(),
            reason: reason.into(),
        };

        let items = raw
            .as_array()
            .ok_or_else(|| invalid("expected a list of minute counts"))?;
        if items.is_empty() {
            return Err(invalid("list is empty"));
        }
        items
            .iter()
            .map(|v| {
                v.as_u64()
                    .filter(|&m| m > 0)
                    .and_then(|m| usize::try_from(m).ok())
                    .ok_or_else(|| invalid("every entry must be a positive integer"))
            })
            .collect()
    }

    fn cap(params: &StrategyConfig, name: &str) -> Result<usize, StrategyError> {
        match params.get(name) {
            None => Ok(0),
            Some(_) => params
                .get_usize(name)
                .ok_or_else(|| StrategyError::InvalidParam {
                    name: name.into(),
                    reason: "expected a non-negative integer".into(),
                }),
        }
    }

    /// Momentum score for one column, or `None` if any reference price is unusable.
    fn score(column: &[f64], horizons: &[usize]) -> Option<f64> {
        let t = column.len().checked_sub(1)?;
        let last = column[t];
        if !(last.is_finite() && last > 0.0) {
            return None;
        }
        let mut total = 0.0;
        for &h in horizons {
            let reference = column[t.checked_sub(h)?];
            if !(reference.is_finite() && reference > 0.0) {
                return None;
            }
            total += (last / reference).powf(1.0 / h as f64) - 1.0;
        }
        Some(total / horizons.len() as f64)
    }
}

impl CandidateSelector for MultiPeriodMomentum {
    fn name(&self) -> &str {
        "multi_period_momentum"
    }

    fn required_lookback(&self, params: &StrategyConfig) -> Result<u64, StrategyError> {
        let horizons = Self::horizons(params)?;
        Ok(horizons.into_iter().max().unwrap_or(0) as u64)
    }

    fn select(
        &self,
        prices: &PriceFrame,
        params: &StrategyConfig,
    ) -> Result<(Vec<String>, Vec<String>), StrategyError> {
        let horizons = Self::horizons(params)?;
        let long_max = Self::cap(params, "long_maximum_candidates")?;
        let short_max = Self::cap(params, "short_maximum_candidates")?;

        let longest = horizons.iter().copied().max().unwrap_or(0);
        if prices.len() < longest + 1 {
            return Err(StrategyError::InsufficientData {
                rows: prices.len(),
                required: longest + 1,
            });
        }

        let mut scored: Vec<(&str, f64)> = prices
            .symbols()
            .iter()
            .filter_map(|symbol| {
                let column = prices.column(symbol)?;
                Self::score(column, &horizons).map(|s| (symbol.as_str(), s))
            })
            .collect();
        // Stable sort keeps column order among ties.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let long: Vec<String> = scored
            .iter()
            .take(long_max)
            .map(|(s, _)| s.to_string())
            .collect();
        let short: Vec<String> = scored
            .iter()
            .skip(scored.len().saturating_sub(short_max))
            .map(|(s, _)| s.to_string())
            .filter(|s| !long.contains(s))
            .collect();

        Ok((long, short))
    }
}
