//! Wire types for the remote services.
//!
//! The services are loosely typed: booleans arrive as strings, numbers as
//! strings, and the run command answers in two different shapes. Everything is
//! normalized here so the controller only ever sees one form of each reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoints::Service;
use crate::remote::ApiError;

// ─── Health ──────────────────────────────────────────────────────────

/// Reachability of the three services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub backtest: bool,
    pub trading: bool,
    pub position: bool,
}

impl HealthStatus {
    pub fn all_up(&self) -> bool {
        self.backtest && self.trading && self.position
    }
}

// ─── Generic status replies ──────────────────────────────────────────

/// `{status, message}` acknowledgement used by upload, check, delete, and terminate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReply {
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub message: Value,
}

impl StatusReply {
    /// Anything but an explicit `false` or an `error`/`fail...` status counts as accepted.
    pub fn accepted(&self) -> bool {
        match &self.status {
            Value::Bool(b) => *b,
            Value::String(s) => {
                let s = s.to_ascii_lowercase();
                !(s == "error" || s.starts_with("fail"))
            }
            _ => true,
        }
    }

    /// Message as text; strings unquoted, other JSON rendered compactly.
    pub fn message_text(&self) -> String {
        value_text(&self.message)
    }

    /// Wrap a non-JSON body as a message.
    pub fn from_text(text: &str) -> Self {
        Self {
            status: Value::Null,
            message: Value::String(text.to_string()),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Run command ─────────────────────────────────────────────────────

/// Normalized answer to `command/run-system`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSystemReply {
    Started {
        session_id: Option<String>,
        dashboard_url: Option<String>,
        notice: Option<String>,
    },
    Rejected {
        message: String,
    },
}

impl RunSystemReply {
    /// Accepts both the flat `{session_id, dashboard_url}` shape and the nested
    /// `{message: {message, session_id, dashboard_url}}` shape.
    pub fn from_json(value: &Value) -> Self {
        let nested = value.get("message").filter(|m| m.is_object());
        let body = nested.unwrap_or(value);

        let text = |key: &str| {
            body.get(key)
                .map(value_text)
                .filter(|s| !s.is_empty())
        };
        let session_id = text("session_id");
        let dashboard_url = text("dashboard_url");
        let notice = if nested.is_some() {
            text("message")
        } else {
            value.get("message").map(value_text).filter(|s| !s.is_empty())
        };

        let explicit_failure = StatusReply {
            status: value.get("status").cloned().unwrap_or(Value::Null),
            message: Value::Null,
        };
        if !explicit_failure.accepted() || (session_id.is_none() && dashboard_url.is_none()) {
            return RunSystemReply::Rejected {
                message: notice.unwrap_or_else(|| value.to_string()),
            };
        }

        RunSystemReply::Started {
            session_id,
            dashboard_url,
            notice,
        }
    }
}

// ─── Backtest ────────────────────────────────────────────────────────

/// Reply to a backtest run.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BacktestReply {
    /// `html` when `html_content` carries a report, `logs_only` otherwise.
    #[serde(default)]
    pub report_type: Option<String>,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default, deserialize_with = "lines_or_text")]
    pub logs: Vec<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BacktestReply {
    pub fn html_report(&self) -> Option<&str> {
        match self.report_type.as_deref() {
            Some("html") | None => self.html_content.as_deref().filter(|h| !h.is_empty()),
            _ => None,
        }
    }
}

fn lines_or_text<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.lines().map(str::to_string).collect(),
        Value::Array(items) => items.iter().map(value_text).collect(),
        other => vec![other.to_string()],
    })
}

// ─── Positions ───────────────────────────────────────────────────────

/// One open position as reported by the position service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// `long` or `short` as reported.
    pub hold_side: String,
    /// Signed size, negative for shorts. `None` when no known size field is present.
    pub quantity: Option<f64>,
    pub margin_coin: Option<String>,
    pub margin_size: Option<f64>,
    pub leverage: Option<f64>,
    pub unrealized_pl: Option<f64>,
    /// Entry as received, for display and auditing.
    pub raw: Value,
}

impl PositionSnapshot {
    /// An entry must name its symbol; everything else is best effort.
    pub fn from_json(raw: &Value) -> Result<Self, ApiError> {
        let symbol = raw
            .get("symbol")
            .map(value_text)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::Decode {
                service: Service::Position,
                message: format!("position entry without a symbol: {raw}"),
            })?;
        let hold_side = raw
            .get("holdSide")
            .or_else(|| raw.get("hold_side"))
            .map(value_text)
            .unwrap_or_default();
        let size = ["total", "size", "quantity", "available"]
            .iter()
            .find_map(|k| raw.get(*k).and_then(number));
        let quantity = if hold_side.eq_ignore_ascii_case("short") {
            size.map(|s| -s.abs())
        } else {
            size
        };

        Ok(Self {
            symbol,
            hold_side,
            quantity,
            margin_coin: raw.get("marginCoin").map(value_text),
            margin_size: raw.get("marginSize").and_then(number),
            leverage: raw.get("leverage").and_then(number),
            unrealized_pl: raw.get("unrealizedPL").and_then(number),
            raw: raw.clone(),
        })
    }

    /// Anything but a reported size of exactly zero counts as exposure.
    pub fn is_open(&self) -> bool {
        self.quantity != Some(0.0)
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse the `{data: [...]}` envelope of the all-positions endpoint.
///
/// A reply without a `data` array (error envelopes, plain text) is a decode
/// error, never an empty book.
pub fn positions_from_json(value: &Value) -> Result<Vec<PositionSnapshot>, ApiError> {
    let items = value
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::Decode {
            service: Service::Position,
            message: format!("all-positions reply has no data list: {value}"),
        })?;
    let mut open = Vec::with_capacity(items.len());
    for item in items {
        let position = PositionSnapshot::from_json(item)?;
        if position.is_open() {
            open.push(position);
        }
    }
    Ok(open)
}

// ─── Logs ────────────────────────────────────────────────────────────

/// One page of session logs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub next_offset: u64,
    /// The session has stopped producing output.
    #[serde(default)]
    pub finished: bool,
}
