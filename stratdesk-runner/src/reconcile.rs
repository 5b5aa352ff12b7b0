//! Post-termination position reconciliation.
//!
//! A confirmed terminate does not prove the book is flat. The reconciler reads
//! open positions and turns any residual exposure into a warning instead of
//! silently declaring success.

use std::fmt;

use crate::remote::{ApiError, RemoteEngine};
use crate::wire::PositionSnapshot;

/// Open exposure left behind after a session was terminated.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationWarning {
    pub session_id: Option<String>,
    pub positions: Vec<PositionSnapshot>,
}

impl ReconciliationWarning {
    pub fn symbols(&self) -> Vec<&str> {
        self.positions.iter().map(|p| p.symbol.as_str()).collect()
    }
}

impl fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} open position(s) remain after termination",
            self.positions.len()
        )?;
        if let Some(id) = &self.session_id {
            write!(f, " of session {id}")?;
        }
        f.write_str(":")?;
        for p in &self.positions {
            match p.quantity {
                Some(q) => write!(f, " {} {:+}", p.symbol, q)?,
                None => write!(f, " {} (size unknown)", p.symbol)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileReport {
    FullyLiquidated,
    ResidualExposure(ReconciliationWarning),
}

pub struct PositionReconciler<'a, E: RemoteEngine + ?Sized> {
    engine: &'a E,
}

impl<'a, E: RemoteEngine + ?Sized> PositionReconciler<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Open positions for the account. Margin coin is sent upper-cased.
    pub fn confirm(
        &self,
        user_key: &str,
        product_type: &str,
        margin_coin: &str,
    ) -> Result<Vec<PositionSnapshot>, ApiError> {
        let positions = self.engine.all_positions(
            user_key,
            product_type,
            &margin_coin.to_ascii_uppercase(),
        )?;
        Ok(positions.into_iter().filter(PositionSnapshot::is_open).collect())
    }
}

/// Classify a post-termination position read.
pub fn assess(session_id: Option<&str>, positions: Vec<PositionSnapshot>) -> ReconcileReport {
    if positions.is_empty() {
        ReconcileReport::FullyLiquidated
    } else {
        ReconcileReport::ResidualExposure(ReconciliationWarning {
            session_id: session_id.map(str::to_string),
            positions,
        })
    }
}
