//! Long/short candidate sets produced by a selector.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::strategy::ContractViolation;

/// Which side of the book a candidate sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

/// Ordered long and short candidates.
///
/// Only constructible through `new()`, which guarantees:
/// - every symbol belongs to the universe
/// - no symbol repeats within a side
/// - the two sides are disjoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CandidateSet {
    long: Vec<String>,
    short: Vec<String>,
}

impl CandidateSet {
    pub fn new(
        long: Vec<String>,
        short: Vec<String>,
        universe: &[String],
    ) -> Result<Self, ContractViolation> {
        let universe: HashSet<&str> = universe.iter().map(|s| s.as_str()).collect();

        let mut longs = HashSet::with_capacity(long.len());
        for symbol in &long {
            check_member(&universe, symbol, Side::Long)?;
            if !longs.insert(symbol.as_str()) {
                return Err(ContractViolation::Duplicate {
                    symbol: symbol.clone(),
                    side: Side::Long,
                });
            }
        }

        let mut shorts = HashSet::with_capacity(short.len());
        for symbol in &short {
            check_member(&universe, symbol, Side::Short)?;
            if longs.contains(symbol.as_str()) {
                return Err(ContractViolation::Overlap {
                    symbol: symbol.clone(),
                });
            }
            if !shorts.insert(symbol.as_str()) {
                return Err(ContractViolation::Duplicate {
                    symbol: symbol.clone(),
                    side: Side::Short,
                });
            }
        }

        Ok(Self { long, short })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn longs(&self) -> &[String] {
        &self.long
    }

    pub fn shorts(&self) -> &[String] {
        &self.short
    }

    pub fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }

    pub fn len(&self) -> usize {
        self.long.len() + self.short.len()
    }

    pub fn side_of(&self, symbol: &str) -> Option<Side> {
        if self.long.iter().any(|s| s == symbol) {
            Some(Side::Long)
        } else if self.short.iter().any(|s| s == symbol) {
            Some(Side::Short)
        } else {
            None
        }
    }
}

fn check_member(
    universe: &HashSet<&str>,
    symbol: &str,
    side: Side,
) -> Result<(), ContractViolation> {
    if universe.contains(symbol) {
        Ok(())
    } else {
        Err(ContractViolation::NotInUniverse {
            symbol: symbol.to_string(),
            side,
        })
    }
}
