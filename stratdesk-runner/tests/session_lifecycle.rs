//! BDD tests for the session lifecycle against a scripted engine.
//!
//! Scenarios:
//! - live submit with both run-reply shapes
//! - upload rejection fails the session with the server message
//! - terminate twice: second call is a no-op with no network call
//! - rejected terminate rolls back to Running
//! - reconcile: empty book vs residual exposure
//! - unchanged artifacts are not uploaded twice
//! - backtest report saved; HTTP failure still completes the session

use chrono::NaiveDate;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use stratdesk_core::{
    preflight_static, ConfigBundle, Session, SessionMode, SessionState, TradeType,
};
use stratdesk_runner::{
    positions_from_json, ApiError, Artifact, ArtifactKind, BacktestReply, BacktestRequest,
    HealthStatus, LogBatch, LogMonitor, LogSource, MonitorExit, PositionSnapshot, ReconcileReport,
    RemoteEngine, RunSystemReply, Secret, Service, SessionController, SessionError, StatusReply,
    Submission, TerminateOutcome,
};

// ── Fake engine ──────────────────────────────────────────────────────

#[derive(Default)]
struct FakeEngine {
    upload_replies: RefCell<VecDeque<Result<StatusReply, ApiError>>>,
    run_reply: RefCell<Option<Value>>,
    terminate_replies: RefCell<VecDeque<Result<StatusReply, ApiError>>>,
    /// Raw all-positions reply; `None` means an empty `data` list.
    positions_reply: RefCell<Option<Value>>,
    backtest_reply: RefCell<Option<Result<BacktestReply, ApiError>>>,
    logs: RefCell<VecDeque<LogBatch>>,
    calls: RefCell<Vec<String>>,
}

impl FakeEngine {
    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    fn calls(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

fn ok(status: &str, message: &str) -> Result<StatusReply, ApiError> {
    Ok(StatusReply {
        status: json!(status),
        message: json!(message),
    })
}

impl LogSource for FakeEngine {
    fn poll_logs(&self, _session_id: &str, _offset: u64) -> Result<LogBatch, ApiError> {
        self.record("logs");
        Ok(self.logs.borrow_mut().pop_front().unwrap_or(LogBatch {
            lines: vec![],
            next_offset: 0,
            finished: true,
        }))
    }
}

impl RemoteEngine for FakeEngine {
    fn health(&self) -> HealthStatus {
        HealthStatus {
            backtest: true,
            trading: true,
            position: true,
        }
    }

    fn upload_artifact(
        &self,
        service: Service,
        artifact: &Artifact,
        _trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError> {
        self.record(format!("upload:{service}:{}", artifact.file_name));
        self.upload_replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ok("success", "uploaded"))
    }

    fn check_strategy(
        &self,
        _service: Service,
        _strategy_name: &str,
        _trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError> {
        self.record("check");
        ok("success", "present")
    }

    fn delete_artifact(
        &self,
        _service: Service,
        _kind: ArtifactKind,
        _name: &str,
        _trade_type: Option<TradeType>,
    ) -> Result<StatusReply, ApiError> {
        self.record("delete");
        ok("success", "deleted")
    }

    fn run_system(&self, strategy_name: &str, method: &str) -> Result<RunSystemReply, ApiError> {
        self.record(format!("run:{strategy_name}:{method}"));
        let value = self
            .run_reply
            .borrow()
            .clone()
            .unwrap_or_else(|| json!({"session_id": "sess-1", "dashboard_url": "https://dash/1"}));
        Ok(RunSystemReply::from_json(&value))
    }

    fn terminate(&self, session_id: &str) -> Result<StatusReply, ApiError> {
        self.record(format!("terminate:{session_id}"));
        self.terminate_replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ok("success", "session terminated"))
    }

    fn run_backtest(
        &self,
        trade_type: TradeType,
        _request: &BacktestRequest,
    ) -> Result<BacktestReply, ApiError> {
        self.record(format!("backtest:{trade_type}"));
        self.backtest_reply
            .borrow_mut()
            .take()
            .unwrap_or_else(|| Ok(BacktestReply::default()))
    }

    fn all_positions(
        &self,
        _user_key: &str,
        _product_type: &str,
        margin_coin: &str,
    ) -> Result<Vec<PositionSnapshot>, ApiError> {
        self.record(format!("positions:{margin_coin}"));
        let value = self
            .positions_reply
            .borrow()
            .clone()
            .unwrap_or_else(|| json!({"data": []}));
        positions_from_json(&value)
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

const BUNDLE: &str = r#"
[system]
strategy_name = "multi_period_momentum"
symbols = ["BTCUSDT", "ETHUSDT", "XRPUSDT"]
weight_method = "equal"
leverage = 10
capital = 200000
lookback_minutes = 360

[rebalancing]
rebalancing_interval_hours = 72

[strategy]
minutes = [60, 180, 360]
long_maximum_candidates = 1
short_maximum_candidates = 1

[backtest]
start_date = "2025-03-10"
end_date = "2025-03-20"
"#;

fn submission() -> Submission {
    let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
    let preflight = preflight_static(&bundle).unwrap();
    let strategy = Artifact::from_bytes(
        "multi_period_momentum.py",
        ArtifactKind::Strategy,
        b"class Strategy: pass".to_vec(),
    );
    let config = Artifact::from_bytes(
        "multi_period_momentum_config.py",
        ArtifactKind::Config,
        b"config = {}".to_vec(),
    );
    Submission::new(preflight, strategy).with_config(config)
}

fn running_session(engine: &FakeEngine) -> Session {
    let mut session = Session::new("multi_period_momentum", SessionMode::Live);
    SessionController::new(engine)
        .submit(&mut session, &submission())
        .unwrap();
    session
}

fn position(symbol: &str, side: &str, total: &str) -> Value {
    json!({"symbol": symbol, "holdSide": side, "total": total})
}

fn backtest_request() -> BacktestRequest {
    let bundle = ConfigBundle::from_toml(BUNDLE).unwrap();
    let config = bundle.validate().unwrap();
    BacktestRequest::new(&config, bundle.backtest.as_ref().unwrap(), Secret::new("data"))
}

// ── Live submit ──────────────────────────────────────────────────────

#[test]
fn bdd_scenario_submit_with_flat_run_reply() {
    // GIVEN an engine answering the run command in the flat shape
    let engine = FakeEngine::default();

    // WHEN a live submission is made
    let session = running_session(&engine);

    // THEN the session is Running with the returned id and dashboard
    assert_eq!(session.state(), &SessionState::Running);
    assert_eq!(session.session_id(), Some("sess-1"));
    assert_eq!(session.dashboard_reference(), Some("https://dash/1"));

    // AND both artifacts were uploaded before the run command
    assert_eq!(engine.calls("upload:trading"), 2);
    assert_eq!(engine.calls("run:multi_period_momentum:rebalancing"), 1);
}

#[test]
fn bdd_scenario_submit_with_nested_run_reply() {
    // GIVEN an engine answering in the nested shape
    let engine = FakeEngine::default();
    *engine.run_reply.borrow_mut() = Some(json!({
        "message": {
            "message": "system started",
            "session_id": "nested-7",
            "dashboard_url": "https://dash/7"
        }
    }));

    // WHEN submitted
    let session = running_session(&engine);

    // THEN the same fields are populated
    assert_eq!(session.session_id(), Some("nested-7"));
    assert_eq!(session.dashboard_reference(), Some("https://dash/7"));
    assert_eq!(session.server_notice(), Some("system started"));
}

#[test]
fn bdd_scenario_upload_rejection_fails_session() {
    // GIVEN the engine rejects the strategy upload
    let engine = FakeEngine::default();
    engine
        .upload_replies
        .borrow_mut()
        .push_back(ok("error", "syntax error on line 3"));
    let mut session = Session::new("multi_period_momentum", SessionMode::Live);

    // WHEN submitted
    let err = SessionController::new(&engine)
        .submit(&mut session, &submission())
        .unwrap_err();

    // THEN the session is Failed with the server message preserved
    assert!(matches!(err, SessionError::Upload { .. }));
    match session.state() {
        SessionState::Failed { reason } => assert!(reason.contains("syntax error on line 3")),
        other => panic!("expected Failed, got {other}"),
    }

    // AND no run command was issued
    assert_eq!(engine.calls("run:"), 0);
}

#[test]
fn bdd_scenario_rejected_run_command_fails_session() {
    // GIVEN a run reply with no session id
    let engine = FakeEngine::default();
    *engine.run_reply.borrow_mut() = Some(json!({"message": "strategy not registered"}));
    let mut session = Session::new("multi_period_momentum", SessionMode::Live);

    // WHEN submitted
    let err = SessionController::new(&engine)
        .submit(&mut session, &submission())
        .unwrap_err();

    // THEN the session fails with the server's message
    assert!(matches!(err, SessionError::Run { .. }));
    assert_eq!(
        session.state(),
        &SessionState::Failed {
            reason: "strategy not registered".into()
        }
    );
}

#[test]
fn bdd_scenario_unchanged_artifacts_upload_once() {
    // GIVEN one controller used for two submissions of the same files
    let engine = FakeEngine::default();
    let mut controller = SessionController::new(&engine);
    let sub = submission();

    // WHEN both are submitted
    let mut first = Session::new("multi_period_momentum", SessionMode::Live);
    controller.submit(&mut first, &sub).unwrap();
    let mut second = Session::new("multi_period_momentum", SessionMode::Live);
    controller.submit(&mut second, &sub).unwrap();

    // THEN the artifacts crossed the wire once, and both sessions run
    assert_eq!(engine.calls("upload:"), 2);
    assert_eq!(engine.calls("run:"), 2);
    assert_eq!(second.state(), &SessionState::Running);
}

// ── Monitor ──────────────────────────────────────────────────────────

#[test]
fn bdd_scenario_monitor_streams_logs_without_state_change() {
    // GIVEN a running session with two pages of logs
    let engine = FakeEngine::default();
    let session = running_session(&engine);
    engine.logs.borrow_mut().extend([
        LogBatch {
            lines: vec!["rebalance 1".into()],
            next_offset: 1,
            finished: false,
        },
        LogBatch {
            lines: vec!["rebalance 2".into()],
            next_offset: 2,
            finished: true,
        },
    ]);

    // WHEN monitored to completion
    let cancel = AtomicBool::new(false);
    let mut lines = Vec::new();
    let summary = SessionController::new(&engine)
        .monitor(
            &session,
            &LogMonitor::new(Duration::ZERO),
            0,
            &cancel,
            |l| lines.push(l.to_string()),
        )
        .unwrap();

    // THEN every line reached the sink and the session is still Running
    assert_eq!(summary.exit, MonitorExit::Completed);
    assert_eq!(lines, vec!["rebalance 1", "rebalance 2"]);
    assert_eq!(session.state(), &SessionState::Running);
}

// ── Terminate ────────────────────────────────────────────────────────

#[test]
fn bdd_scenario_double_terminate_is_noop() {
    // GIVEN a running live session
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    let controller = SessionController::new(&engine);

    // WHEN terminate is called twice
    let first = controller.terminate(&mut session).unwrap();
    let second = controller.terminate(&mut session).unwrap();

    // THEN the first confirms, the second is a no-op
    assert!(matches!(first, TerminateOutcome::Terminated { .. }));
    assert_eq!(second, TerminateOutcome::AlreadyTerminated);
    assert_eq!(session.state(), &SessionState::Terminated);

    // AND only one terminate request was sent
    assert_eq!(engine.calls("terminate:sess-1"), 1);
}

#[test]
fn bdd_scenario_server_reports_already_terminated() {
    // GIVEN a session the server already stopped
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    engine
        .terminate_replies
        .borrow_mut()
        .push_back(ok("error", "session already terminated"));

    // WHEN terminated
    let outcome = SessionController::new(&engine)
        .terminate(&mut session)
        .unwrap();

    // THEN it is treated as a confirmation
    assert_eq!(outcome, TerminateOutcome::AlreadyTerminated);
    assert_eq!(session.state(), &SessionState::Terminated);
}

#[test]
fn bdd_scenario_terminate_in_progress_is_not_a_confirmation() {
    // GIVEN the engine refuses because another terminate is pending
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    engine.terminate_replies.borrow_mut().push_back(ok(
        "error",
        "a terminate request is already in progress; retry later",
    ));

    // WHEN terminated
    let err = SessionController::new(&engine)
        .terminate(&mut session)
        .unwrap_err();

    // THEN the refusal surfaces and the session can be retried
    assert!(matches!(err, SessionError::Terminate { .. }));
    assert_eq!(session.state(), &SessionState::Running);
}

#[test]
fn bdd_scenario_rejected_terminate_rolls_back_to_running() {
    // GIVEN the engine refuses to terminate
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    engine
        .terminate_replies
        .borrow_mut()
        .push_back(ok("error", "unknown session"));

    // WHEN terminated
    let err = SessionController::new(&engine)
        .terminate(&mut session)
        .unwrap_err();

    // THEN the error carries the message and the session is Running again
    assert!(err.to_string().contains("unknown session"));
    assert_eq!(session.state(), &SessionState::Running);
    let last = session.history().last().unwrap();
    assert_eq!(last.from, SessionState::Terminating);
}

#[test]
fn bdd_scenario_transport_error_on_terminate_rolls_back() {
    // GIVEN the terminate request cannot reach the service
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    engine
        .terminate_replies
        .borrow_mut()
        .push_back(Err(ApiError::Transport {
            service: Service::Trading,
            message: "connection refused".into(),
        }));

    // WHEN terminated
    let err = SessionController::new(&engine)
        .terminate(&mut session)
        .unwrap_err();

    // THEN the session stays Running so the caller can retry
    assert!(matches!(err, SessionError::Api(_)));
    assert_eq!(session.state(), &SessionState::Running);
}

// ── Reconcile ────────────────────────────────────────────────────────

#[test]
fn bdd_scenario_reconcile_empty_book() {
    // GIVEN a terminated session and no open positions
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    let controller = SessionController::new(&engine);
    controller.terminate(&mut session).unwrap();

    // WHEN reconciled
    let report = controller
        .reconcile(&mut session, "user", "susdt-futures", "susdt")
        .unwrap();

    // THEN the session is Reconciled and the margin coin was upper-cased
    assert_eq!(report, ReconcileReport::FullyLiquidated);
    assert_eq!(session.state(), &SessionState::Reconciled);
    assert_eq!(engine.calls("positions:SUSDT"), 1);
}

#[test]
fn bdd_scenario_reconcile_residual_exposure_warns() {
    // GIVEN a terminated session with two positions still open
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    let controller = SessionController::new(&engine);
    controller.terminate(&mut session).unwrap();
    *engine.positions_reply.borrow_mut() = Some(json!({
        "data": [position("BTCUSDT", "long", "0.5"), position("ETHUSDT", "short", "3")]
    }));

    // WHEN reconciled
    let report = controller
        .reconcile(&mut session, "user", "susdt-futures", "susdt")
        .unwrap();

    // THEN a warning names both symbols and the session stays Terminated
    let ReconcileReport::ResidualExposure(warning) = report else {
        panic!("expected residual exposure");
    };
    assert_eq!(warning.symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    assert_eq!(warning.session_id.as_deref(), Some("sess-1"));
    assert_eq!(session.state(), &SessionState::Terminated);
}

#[test]
fn bdd_scenario_reconcile_error_envelope_is_not_a_flat_book() {
    // GIVEN the position service answers with an error envelope instead of a list
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    let controller = SessionController::new(&engine);
    controller.terminate(&mut session).unwrap();
    *engine.positions_reply.borrow_mut() = Some(json!({
        "code": "40009",
        "msg": "sign signature error",
        "data": null
    }));

    // WHEN reconciled
    let err = controller
        .reconcile(&mut session, "user", "susdt-futures", "susdt")
        .unwrap_err();

    // THEN it is a decode error and the session is not marked Reconciled
    assert!(matches!(
        err,
        SessionError::Api(ApiError::Decode { service: Service::Position, .. })
    ));
    assert_eq!(session.state(), &SessionState::Terminated);
}

#[test]
fn bdd_scenario_reconcile_plain_text_reply_is_not_a_flat_book() {
    // GIVEN a gateway page instead of JSON
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    let controller = SessionController::new(&engine);
    controller.terminate(&mut session).unwrap();
    *engine.positions_reply.borrow_mut() = Some(json!("502 Bad Gateway"));

    // WHEN reconciled
    let result = controller.reconcile(&mut session, "user", "susdt-futures", "susdt");

    // THEN nothing is declared liquidated
    assert!(result.is_err());
    assert_eq!(session.state(), &SessionState::Terminated);
}

#[test]
fn bdd_scenario_reconcile_unknown_size_counts_as_exposure() {
    // GIVEN a position whose size arrives under an unrecognized key
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);
    let controller = SessionController::new(&engine);
    controller.terminate(&mut session).unwrap();
    *engine.positions_reply.borrow_mut() = Some(json!({
        "data": [{"symbol": "BTCUSDT", "holdSide": "long", "openDelegateSize": "1.5"}]
    }));

    // WHEN reconciled
    let report = controller
        .reconcile(&mut session, "user", "susdt-futures", "susdt")
        .unwrap();

    // THEN the position is reported as residual exposure
    let ReconcileReport::ResidualExposure(warning) = report else {
        panic!("expected residual exposure");
    };
    assert_eq!(warning.symbols(), vec!["BTCUSDT"]);
    assert_eq!(session.state(), &SessionState::Terminated);
}

#[test]
fn bdd_scenario_reconcile_requires_termination() {
    // GIVEN a running session
    let engine = FakeEngine::default();
    let mut session = running_session(&engine);

    // WHEN reconcile is attempted
    let err = SessionController::new(&engine)
        .reconcile(&mut session, "user", "susdt-futures", "susdt")
        .unwrap_err();

    // THEN it is refused without a position call
    assert!(matches!(err, SessionError::WrongState { .. }));
    assert_eq!(engine.calls("positions:"), 0);
}

// ── Backtest ─────────────────────────────────────────────────────────

fn strategy_artifact() -> Artifact {
    Artifact::from_bytes(
        "multi_period_momentum.py",
        ArtifactKind::Strategy,
        b"class Strategy: pass".to_vec(),
    )
}

fn at() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 21)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap()
}

#[test]
fn bdd_scenario_backtest_saves_html_report() {
    // GIVEN a backtest service that returns an HTML report
    let engine = FakeEngine::default();
    *engine.backtest_reply.borrow_mut() = Some(Ok(BacktestReply {
        report_type: Some("html".into()),
        html_content: Some("<html>report</html>".into()),
        logs: vec!["done".into()],
        stdout: None,
        error: None,
    }));
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new("multi_period_momentum", SessionMode::Backtest);

    // WHEN the backtest runs
    let outcome = SessionController::new(&engine)
        .run_backtest(
            &mut session,
            &strategy_artifact(),
            TradeType::Future,
            &backtest_request(),
            dir.path(),
            at(),
        )
        .unwrap();

    // THEN the report is saved under the timestamped name and attached
    assert!(outcome.succeeded);
    let path = outcome.report_path.unwrap();
    assert!(path.ends_with("2025-03-21_10-30_multi_period_momentum_backtest_report.html"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html>report</html>");
    assert_eq!(session.report_path(), Some(path.as_path()));
    assert_eq!(session.state(), &SessionState::Terminated);
    assert_eq!(engine.calls("upload:backtest"), 1);
    assert_eq!(engine.calls("backtest:future"), 1);
}

#[test]
fn bdd_scenario_backtest_http_failure_still_completes() {
    // GIVEN a backtest service that answers 500
    let engine = FakeEngine::default();
    *engine.backtest_reply.borrow_mut() = Some(Err(ApiError::Http {
        status: 500,
        body: "engine crashed".into(),
    }));
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new("multi_period_momentum", SessionMode::Backtest);

    // WHEN the backtest runs
    let outcome = SessionController::new(&engine)
        .run_backtest(
            &mut session,
            &strategy_artifact(),
            TradeType::Future,
            &backtest_request(),
            dir.path(),
            at(),
        )
        .unwrap();

    // THEN the session completes with a failed outcome and no report
    assert!(!outcome.succeeded);
    assert_eq!(outcome.error.as_deref(), Some("HTTP 500: engine crashed"));
    assert!(outcome.report_path.is_none());
    assert_eq!(session.state(), &SessionState::Terminated);
}

#[test]
fn bdd_scenario_backtest_transport_failure_fails_session() {
    // GIVEN the backtest service is unreachable
    let engine = FakeEngine::default();
    *engine.backtest_reply.borrow_mut() = Some(Err(ApiError::Transport {
        service: Service::Backtest,
        message: "request timed out".into(),
    }));
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new("multi_period_momentum", SessionMode::Backtest);

    // WHEN the backtest runs
    let err = SessionController::new(&engine)
        .run_backtest(
            &mut session,
            &strategy_artifact(),
            TradeType::Future,
            &backtest_request(),
            dir.path(),
            at(),
        )
        .unwrap_err();

    // THEN the session is Failed
    assert!(matches!(err, SessionError::Api(ApiError::Transport { .. })));
    assert!(matches!(session.state(), SessionState::Failed { .. }));
}
