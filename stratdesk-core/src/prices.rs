//! Minute-bar close prices in wide format: one timestamp column, one column per symbol.
//!
//! Timestamps must be strictly ascending with a fixed one-minute step. Missing
//! prices are allowed (stored as `NaN`) so selectors can skip incomplete symbols.

use chrono::{DateTime, NaiveDateTime};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bar spacing in seconds.
pub const BAR_SECONDS: i64 = 60;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Error)]
pub enum PriceFrameError {
    #[error("failed to open price file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("first column must be 'datetime', found '{found}'")]
    MissingDatetimeColumn { found: String },

    #[error("symbol column '{symbol}' appears more than once")]
    DuplicateSymbol { symbol: String },

    #[error("row {row}: unparseable timestamp '{value}'")]
    BadTimestamp { row: usize, value: String },

    #[error("row {row}: unparseable price '{value}' for {symbol}")]
    BadPrice {
        row: usize,
        symbol: String,
        value: String,
    },

    #[error("row {row}: expected {expected} columns, found {found}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row}: timestamp {at} is not after the previous row")]
    NotAscending { row: usize, at: NaiveDateTime },

    #[error("row {row}: gap of {seconds}s before {at} (expected 60s)")]
    Gap {
        row: usize,
        at: NaiveDateTime,
        seconds: i64,
    },

    #[error("price frame has no rows")]
    Empty,
}

/// Universe symbols with no price column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("price data has no column for {}", .symbols.join(", "))]
pub struct MissingSymbols {
    pub symbols: Vec<String>,
}

/// Aligned close prices for a symbol universe.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceFrame {
    timestamps: Vec<NaiveDateTime>,
    symbols: Vec<String>,
    /// `columns[i][row]` is the close of `symbols[i]` at `timestamps[row]`.
    columns: Vec<Vec<f64>>,
}

impl PriceFrame {
    /// Build a frame, checking column shape and the one-minute grid.
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        symbols: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, PriceFrameError> {
        if timestamps.is_empty() {
            return Err(PriceFrameError::Empty);
        }

        let mut seen = HashSet::new();
        for symbol in &symbols {
            if !seen.insert(symbol.as_str()) {
                return Err(PriceFrameError::DuplicateSymbol {
                    symbol: symbol.clone(),
                });
            }
        }

        if columns.len() != symbols.len() {
            return Err(PriceFrameError::RaggedRow {
                row: 0,
                expected: symbols.len(),
                found: columns.len(),
            });
        }
        for column in &columns {
            if column.len() != timestamps.len() {
                return Err(PriceFrameError::RaggedRow {
                    row: column.len().min(timestamps.len()),
                    expected: timestamps.len(),
                    found: column.len(),
                });
            }
        }

        check_grid(&timestamps)?;

        Ok(Self {
            timestamps,
            symbols,
            columns,
        })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, PriceFrameError> {
        let file = std::fs::File::open(path).map_err(|source| PriceFrameError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv_reader(file)
    }

    /// Parse `datetime,SYM1,SYM2,...` CSV. Empty cells become `NaN`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, PriceFrameError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let first = headers.get(0).unwrap_or_default();
        if !first.eq_ignore_ascii_case("datetime") {
            return Err(PriceFrameError::MissingDatetimeColumn {
                found: first.to_string(),
            });
        }
        let symbols: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        let width = headers.len();

        let mut timestamps = Vec::new();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); symbols.len()];

        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            // 1-based data row, header excluded
            let row = i + 1;
            if record.len() != width {
                return Err(PriceFrameError::RaggedRow {
                    row,
                    expected: width,
                    found: record.len(),
                });
            }

            let raw_ts = record.get(0).unwrap_or_default();
            let ts = parse_timestamp(raw_ts).ok_or_else(|| PriceFrameError::BadTimestamp {
                row,
                value: raw_ts.to_string(),
            })?;
            timestamps.push(ts);

            for (col, symbol) in symbols.iter().enumerate() {
                let cell = record.get(col + 1).unwrap_or_default();
                let price = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse::<f64>().map_err(|_| PriceFrameError::BadPrice {
                        row,
                        symbol: symbol.clone(),
                        value: cell.to_string(),
                    })?
                };
                columns[col].push(price);
            }
        }

        Self::new(timestamps, symbols, columns)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.columns[i].as_slice())
    }

    /// Only the columns for `symbols`, in that order. Extra columns are dropped;
    /// any requested symbol without a column is an error.
    pub fn select(&self, symbols: &[String]) -> Result<PriceFrame, MissingSymbols> {
        let missing: Vec<String> = symbols
            .iter()
            .filter(|s| self.column(s).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MissingSymbols { symbols: missing });
        }
        let columns = symbols
            .iter()
            .filter_map(|s| self.column(s).map(<[f64]>::to_vec))
            .collect();
        Ok(PriceFrame {
            timestamps: self.timestamps.clone(),
            symbols: symbols.to_vec(),
            columns,
        })
    }

    /// Trailing `n` rows (the whole frame if it is shorter).
    pub fn tail(&self, n: usize) -> PriceFrame {
        let start = self.len().saturating_sub(n);
        PriceFrame {
            timestamps: self.timestamps[start..].to_vec(),
            symbols: self.symbols.clone(),
            columns: self.columns.iter().map(|c| c[start..].to_vec()).collect(),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

fn check_grid(timestamps: &[NaiveDateTime]) -> Result<(), PriceFrameError> {
    for (i, pair) in timestamps.windows(2).enumerate() {
        let row = i + 2;
        let step = (pair[1] - pair[0]).num_seconds();
        if step <= 0 {
            return Err(PriceFrameError::NotAscending { row, at: pair[1] });
        }
        if step != BAR_SECONDS {
            return Err(PriceFrameError::Gap {
                row,
                at: pair[1],
                seconds: step,
            });
        }
    }
    Ok(())
}
