//! The remote engine boundary.
//!
//! `RemoteEngine` abstracts the three HTTP services so the controller can be
//! driven by a fake in tests. `HttpEngine` is the production implementation.

use thiserror::Error;

use stratdesk_core::TradeType;

use crate::artifacts::{Artifact, ArtifactKind};
use crate::backtest::BacktestRequest;
use crate::endpoints::Service;
use crate::wire::{
    BacktestReply, HealthStatus, LogBatch, PositionSnapshot, RunSystemReply, StatusReply,
};

/// Transport and protocol failures. Never retried automatically.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {service} failed: {message}")]
    Transport { service: Service, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode {service} response: {message}")]
    Decode { service: Service, message: String },

    #[error("{operation} is not supported by the {service} service")]
    Unsupported {
        service: Service,
        operation: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paged access to a running session's log output.
pub trait LogSource {
    fn poll_logs(&self, session_id: &str, offset: u64) -> Result<LogBatch, ApiError>;
}

/// Every operation the orchestrator issues against the remote services.
pub trait RemoteEngine: LogSource {
    /// Check that each service answers.
    fn health(&self) -> HealthStatus;

    /// Upload a strategy or config file. `trade_type` is required by the backtest service.
    fn upload_artifact(
        &self,
        service: Service,
        artifact: &Artifact,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError>;

    /// Ask whether `strategy_name` is present on `service`.
    fn check_strategy(
        &self,
        service: Service,
        strategy_name: &str,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError>;

    fn delete_artifact(
        &self,
        service: Service,
        kind: ArtifactKind,
        name: &str,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError>;

    /// Start a live session.
    fn run_system(&self, strategy_name: &str, method: &str) -> Result<RunSystemReply, ApiError>;

    /// Stop a live session.
    fn terminate(&self, session_id: &str) -> Result<StatusReply, ApiError>;

    /// Run a backtest to completion (blocking, long timeout).
    fn run_backtest(
        &self,
        trade_type: TradeType,
        request: &BacktestRequest,
    ) -> Result<BacktestReply, ApiError>;

    /// Open positions for the account.
    fn all_positions(
        &self,
        user_key: &str,
        product_type: &str,
        margin_coin: &str,
    ) -> Result<Vec<PositionSnapshot>, ApiError>;
}
