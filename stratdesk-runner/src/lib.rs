//! StratDesk Runner: remote session orchestration.
//!
//! This crate builds on `stratdesk-core` to provide:
//! - Credential and endpoint resolution
//! - The `RemoteEngine` boundary and its reqwest implementation
//! - Content-addressed artifact uploads
//! - Session control: submit, monitor, terminate, reconcile, backtest
//! - Session records on disk for follow-up commands

pub mod artifacts;
pub mod backtest;
pub mod controller;
pub mod credentials;
pub mod endpoints;
pub mod http;
pub mod monitor;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod wire;

pub use artifacts::{Artifact, ArtifactKind, UploadLedger};
pub use backtest::{report_file_name, save_html_report, BacktestRequest};
pub use controller::{
    BacktestOutcome, SessionController, SessionError, Submission, TerminateOutcome,
    DEFAULT_RUN_METHOD,
};
pub use credentials::{load_dotenv, Credentials, CredentialsError, Secret};
pub use endpoints::{EndpointConfig, Service};
pub use http::HttpEngine;
pub use monitor::{LogMonitor, MonitorExit, MonitorSummary};
pub use reconcile::{assess, PositionReconciler, ReconcileReport, ReconciliationWarning};
pub use remote::{ApiError, LogSource, RemoteEngine};
pub use store::{SessionStore, StoreError};
pub use wire::{
    positions_from_json, BacktestReply, HealthStatus, LogBatch, PositionSnapshot, RunSystemReply,
    StatusReply,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn http_engine_is_send_sync() {
        assert_send::<HttpEngine>();
        assert_sync::<HttpEngine>();
    }

    #[test]
    fn wire_types_are_send_sync() {
        assert_send::<RunSystemReply>();
        assert_sync::<RunSystemReply>();
        assert_send::<PositionSnapshot>();
        assert_sync::<PositionSnapshot>();
        assert_send::<BacktestReply>();
        assert_sync::<BacktestReply>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<Credentials>();
        assert_sync::<Credentials>();
        assert_send::<EndpointConfig>();
        assert_sync::<EndpointConfig>();
        assert_send::<BacktestRequest>();
        assert_sync::<BacktestRequest>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<ApiError>();
        assert_sync::<ApiError>();
        assert_send::<SessionError>();
        assert_sync::<SessionError>();
    }
}
