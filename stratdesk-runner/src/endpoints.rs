//! Service endpoints and timeouts.
//!
//! Three independent services, each addressed as `{base}/{user_key}/{path}`:
//! - backtest: strategy uploads and historical runs
//! - trading: live strategy/config uploads, run and terminate commands, logs
//! - position: exchange position snapshots
//!
//! Defaults can be overridden from an `[endpoints]` TOML section.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use stratdesk_core::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Backtest,
    Trading,
    Position,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Backtest => f.write_str("backtest"),
            Service::Trading => f.write_str("trading"),
            Service::Position => f.write_str("position"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub backtest_url: String,
    pub trading_url: String,
    pub position_url: String,
    /// Per-request timeout for every call except backtest runs.
    pub timeout_secs: u64,
    /// Timeout for a backtest run, which blocks until the report is ready.
    pub backtest_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            backtest_url: "https://zipline.fin.cloud.ainode.ai".into(),
            trading_url: "https://aifapbt.fin.cloud.ainode.ai".into(),
            position_url: "https://bitgettrader.fin.cloud.ainode.ai".into(),
            timeout_secs: 30,
            backtest_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EndpointsFile {
    #[serde(default)]
    endpoints: EndpointConfig,
}

impl EndpointConfig {
    /// Read the `[endpoints]` section of a TOML file; absent fields keep defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: EndpointsFile = toml::from_str(content)?;
        Ok(file.endpoints)
    }

    pub fn base(&self, service: Service) -> &str {
        match service {
            Service::Backtest => &self.backtest_url,
            Service::Trading => &self.trading_url,
            Service::Position => &self.position_url,
        }
    }

    /// `{base}/{user_key}/{path}` with exactly one slash at each join.
    pub fn url(&self, service: Service, user_key: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base(service).trim_end_matches('/'),
            user_key.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backtest_timeout(&self) -> Duration {
        Duration::from_secs(self.backtest_timeout_secs)
    }
}
