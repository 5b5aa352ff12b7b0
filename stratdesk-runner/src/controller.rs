//! Session controller: drives a `Session` through the remote engine.
//!
//! The controller owns the only code paths that change session state in
//! response to remote replies:
//! - `submit`: upload artifacts, then start a live session
//! - `monitor`: follow session logs (no state change)
//! - `terminate`: stop a live session; idempotent
//! - `reconcile`: confirm the book is flat after termination
//! - `run_backtest`: upload, run to completion, persist the report
//!
//! Nothing is retried. A failed step leaves the session in a state that says
//! exactly how far it got.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::{info, warn};

use stratdesk_core::{Preflight, Session, SessionMode, SessionState, TradeType, TransitionError};

use crate::artifacts::{Artifact, ArtifactKind, UploadLedger};
use crate::backtest::{save_html_report, BacktestRequest};
use crate::endpoints::Service;
use crate::monitor::{LogMonitor, MonitorSummary};
use crate::reconcile::{assess, PositionReconciler, ReconcileReport};
use crate::remote::{ApiError, RemoteEngine};
use crate::wire::{RunSystemReply, StatusReply};

/// Default `method` for the run command.
pub const DEFAULT_RUN_METHOD: &str = "rebalancing";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("upload of {artifact} rejected: {message}")]
    Upload { artifact: String, message: String },

    #[error("run command rejected: {message}")]
    Run { message: String },

    #[error("terminate of session {session_id} rejected: {message}")]
    Terminate { session_id: String, message: String },

    #[error("session has no remote id")]
    MissingSessionId,

    #[error("session is {state}, expected {expected}")]
    WrongState { state: String, expected: &'static str },

    #[error("{operation} requires a {expected} session")]
    WrongMode {
        operation: &'static str,
        expected: SessionMode,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// What a live submission needs.
#[derive(Debug, Clone)]
pub struct Submission {
    pub preflight: Preflight,
    pub strategy: Artifact,
    pub config: Option<Artifact>,
    pub method: String,
}

impl Submission {
    pub fn new(preflight: Preflight, strategy: Artifact) -> Self {
        Self {
            preflight,
            strategy,
            config: None,
            method: DEFAULT_RUN_METHOD.into(),
        }
    }

    pub fn with_config(mut self, config: Artifact) -> Self {
        self.config = Some(config);
        self
    }

    pub fn strategy_name(&self) -> &str {
        &self.preflight.config.strategy_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The engine confirmed the stop.
    Terminated { message: String },
    /// The session was already stopped; nothing changed remotely.
    AlreadyTerminated,
}

/// Result of a completed backtest call.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestOutcome {
    pub succeeded: bool,
    pub report_type: Option<String>,
    pub report_path: Option<PathBuf>,
    pub logs: Vec<String>,
    pub stdout: Option<String>,
    pub error: Option<String>,
}

pub struct SessionController<'a, E: RemoteEngine + ?Sized> {
    engine: &'a E,
    ledger: UploadLedger,
}

impl<'a, E: RemoteEngine + ?Sized> SessionController<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self {
            engine,
            ledger: UploadLedger::new(),
        }
    }

    pub fn ledger(&self) -> &UploadLedger {
        &self.ledger
    }

    // ── Uploads ──────────────────────────────────────────────────────

    /// Upload unless the ledger already holds this exact content.
    fn upload(
        &mut self,
        service: Service,
        artifact: &Artifact,
        trade_type: Option<TradeType>,
    ) -> Result<(), SessionError> {
        if self.ledger.is_current(service, artifact, trade_type) {
            info!(%service, file = %artifact.file_name, "artifact unchanged, skipping upload");
            return Ok(());
        }

        let rejected = |message: String| SessionError::Upload {
            artifact: artifact.file_name.clone(),
            message,
        };
        let reply = self
            .engine
            .upload_artifact(service, artifact, trade_type)
            .map_err(|e| rejected(e.to_string()))?;
        if !reply.accepted() {
            return Err(rejected(reply.message_text()));
        }

        info!(%service, file = %artifact.file_name, digest = artifact.short_digest(), "uploaded");
        self.ledger.record(service, artifact, trade_type);
        Ok(())
    }

    /// Move through `Uploading → Uploaded`, failing the session on any rejection.
    fn upload_all(
        &mut self,
        session: &mut Session,
        service: Service,
        artifacts: &[&Artifact],
        trade_type: Option<TradeType>,
    ) -> Result<(), SessionError> {
        session.transition(SessionState::Uploading, format!("uploading to {service}"))?;
        for artifact in artifacts {
            if let Err(e) = self.upload(service, artifact, trade_type) {
                warn!(error = %e, "upload failed");
                session.fail(e.to_string())?;
                return Err(e);
            }
        }
        session.transition(SessionState::Uploaded, "artifacts accepted")?;
        Ok(())
    }

    /// Presence check for a strategy on one service.
    pub fn check(
        &self,
        service: Service,
        strategy_name: &str,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, SessionError> {
        Ok(self
            .engine
            .check_strategy(service, strategy_name, trade_type)?)
    }

    /// Delete a remote artifact and forget its ledger entry.
    pub fn delete(
        &mut self,
        service: Service,
        kind: ArtifactKind,
        name: &str,
        trade_type: Option<TradeType>,
    ) -> Result<StatusReply, SessionError> {
        let reply = self.engine.delete_artifact(service, kind, name, trade_type)?;
        self.ledger.forget(service, kind, name);
        info!(%service, %kind, name, accepted = reply.accepted(), "delete");
        Ok(reply)
    }

    // ── Live sessions ────────────────────────────────────────────────

    /// Upload the strategy (and config) and start a live session.
    pub fn submit(
        &mut self,
        session: &mut Session,
        submission: &Submission,
    ) -> Result<(), SessionError> {
        if session.mode() != SessionMode::Live {
            return Err(SessionError::WrongMode {
                operation: "submit",
                expected: SessionMode::Live,
            });
        }

        let mut artifacts = vec![&submission.strategy];
        artifacts.extend(submission.config.as_ref());
        self.upload_all(session, Service::Trading, &artifacts, None)?;

        let reply = match self
            .engine
            .run_system(submission.strategy_name(), &submission.method)
        {
            Ok(reply) => reply,
            Err(e) => {
                session.fail(e.to_string())?;
                return Err(e.into());
            }
        };

        match reply {
            RunSystemReply::Started {
                session_id,
                dashboard_url,
                notice,
            } => {
                info!(
                    strategy = submission.strategy_name(),
                    session_id = session_id.as_deref().unwrap_or("-"),
                    "session started"
                );
                session.start_running(session_id, dashboard_url, notice)?;
                Ok(())
            }
            RunSystemReply::Rejected { message } => {
                warn!(strategy = submission.strategy_name(), %message, "run rejected");
                session.fail(message.clone())?;
                Err(SessionError::Run { message })
            }
        }
    }

    /// Follow a running session's logs. Never changes session state.
    pub fn monitor<F: FnMut(&str)>(
        &self,
        session: &Session,
        monitor: &LogMonitor,
        start_offset: u64,
        cancel: &AtomicBool,
        sink: F,
    ) -> Result<MonitorSummary, SessionError> {
        if session.state() != &SessionState::Running {
            return Err(SessionError::WrongState {
                state: session.state().to_string(),
                expected: "running",
            });
        }
        let id = session.session_id().ok_or(SessionError::MissingSessionId)?;
        Ok(monitor.run(self.engine, id, start_offset, cancel, sink)?)
    }

    /// Stop a live session. A second call is a no-op confirmation.
    pub fn terminate(&self, session: &mut Session) -> Result<TerminateOutcome, SessionError> {
        match session.state() {
            SessionState::Terminated | SessionState::Reconciled => {
                info!(session_id = session.session_id().unwrap_or("-"), "already terminated");
                return Ok(TerminateOutcome::AlreadyTerminated);
            }
            SessionState::Running => {}
            other => {
                return Err(SessionError::WrongState {
                    state: other.to_string(),
                    expected: "running",
                })
            }
        }
        if session.mode() != SessionMode::Live {
            return Err(SessionError::WrongMode {
                operation: "terminate",
                expected: SessionMode::Live,
            });
        }
        let session_id = session
            .session_id()
            .ok_or(SessionError::MissingSessionId)?
            .to_string();

        session.transition(SessionState::Terminating, "terminate requested")?;
        let reply = match self.engine.terminate(&session_id) {
            Ok(reply) => reply,
            Err(e) => {
                session.transition(SessionState::Running, format!("terminate failed: {e}"))?;
                return Err(e.into());
            }
        };

        let message = reply.message_text();
        let already = reports_already_stopped(&message);
        if reply.accepted() || already {
            session.transition(SessionState::Terminated, message.clone())?;
            info!(%session_id, %message, "session terminated");
            Ok(if already {
                TerminateOutcome::AlreadyTerminated
            } else {
                TerminateOutcome::Terminated { message }
            })
        } else {
            session.transition(SessionState::Running, format!("terminate rejected: {message}"))?;
            Err(SessionError::Terminate {
                session_id,
                message,
            })
        }
    }

    /// Confirm the account is flat after termination.
    ///
    /// Residual exposure is returned as a warning and leaves the session in
    /// `Terminated`; only an empty book moves it to `Reconciled`.
    pub fn reconcile(
        &self,
        session: &mut Session,
        user_key: &str,
        product_type: &str,
        margin_coin: &str,
    ) -> Result<ReconcileReport, SessionError> {
        match session.state() {
            SessionState::Reconciled => return Ok(ReconcileReport::FullyLiquidated),
            SessionState::Terminated => {}
            other => {
                return Err(SessionError::WrongState {
                    state: other.to_string(),
                    expected: "terminated",
                })
            }
        }

        let positions =
            PositionReconciler::new(self.engine).confirm(user_key, product_type, margin_coin)?;
        let report = assess(session.session_id(), positions);
        match &report {
            ReconcileReport::FullyLiquidated => {
                session.transition(SessionState::Reconciled, "no open positions")?;
                info!(session_id = session.session_id().unwrap_or("-"), "reconciled");
            }
            ReconcileReport::ResidualExposure(warning) => {
                warn!(symbols = ?warning.symbols(), "{warning}");
            }
        }
        Ok(report)
    }

    // ── Backtests ────────────────────────────────────────────────────

    /// Upload the strategy to the backtest service and run it to completion.
    ///
    /// An HTTP failure payload still completes the session (`Terminated`) with
    /// `succeeded = false`; a transport failure fails it.
    pub fn run_backtest(
        &mut self,
        session: &mut Session,
        strategy: &Artifact,
        trade_type: TradeType,
        request: &BacktestRequest,
        report_dir: &Path,
        at: NaiveDateTime,
    ) -> Result<BacktestOutcome, SessionError> {
        if session.mode() != SessionMode::Backtest {
            return Err(SessionError::WrongMode {
                operation: "run_backtest",
                expected: SessionMode::Backtest,
            });
        }

        self.upload_all(session, Service::Backtest, &[strategy], Some(trade_type))?;
        session.start_running(None, None, None)?;
        info!(strategy = request.strategy_name(), %trade_type, "backtest started");

        let reply = match self.engine.run_backtest(trade_type, request) {
            Ok(reply) => reply,
            Err(ApiError::Http { status, body }) => {
                let error = format!("HTTP {status}: {body}");
                warn!(status, "backtest failed");
                session.set_notice(error.clone());
                session.transition(SessionState::Terminated, "backtest failed")?;
                return Ok(BacktestOutcome {
                    succeeded: false,
                    report_type: None,
                    report_path: None,
                    logs: Vec::new(),
                    stdout: None,
                    error: Some(error),
                });
            }
            Err(e) => {
                session.fail(e.to_string())?;
                return Err(e.into());
            }
        };

        let report_path = match reply.html_report() {
            Some(html) => match save_html_report(report_dir, request.strategy_name(), at, html) {
                Ok(path) => {
                    info!(path = %path.display(), "backtest report saved");
                    session.attach_report(path.clone());
                    Some(path)
                }
                Err(e) => {
                    warn!(error = %e, "could not save backtest report");
                    None
                }
            },
            None => None,
        };

        let succeeded = reply.error.is_none();
        session.transition(
            SessionState::Terminated,
            if succeeded {
                "backtest completed"
            } else {
                "backtest completed with errors"
            },
        )?;

        Ok(BacktestOutcome {
            succeeded,
            report_type: reply.report_type,
            report_path,
            logs: reply.logs,
            stdout: reply.stdout,
            error: reply.error,
        })
    }
}

/// Phrases the trading service uses for a session that is no longer running.
const ALREADY_STOPPED: [&str; 4] = [
    "already terminated",
    "already stopped",
    "already finished",
    "not running",
];

/// Whether a terminate reply says the session was already down. Only these
/// phrases may turn an error status into a confirmation.
fn reports_already_stopped(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ALREADY_STOPPED.iter().any(|phrase| message.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_stopped_phrases() {
        assert!(reports_already_stopped("Session already terminated"));
        assert!(reports_already_stopped("strategy is not running"));
        assert!(!reports_already_stopped(
            "a terminate request is already in progress; retry later"
        ));
        assert!(!reports_already_stopped("unknown session"));
    }
}
