//! Session lifecycle state machine.
//!
//! ```text
//! Created → Uploading → Uploaded → Running → Terminating → Terminated → Reconciled
//!                                     │           │
//!                                     │           └─→ Running   (terminate rejected)
//!                                     └─→ Terminated            (backtest completion)
//!
//! any non-terminal state ─→ Failed { reason }
//! ```
//!
//! Every transition is appended to an audit history. Illegal transitions are
//! rejected and leave the session untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What kind of run the session tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Backtest,
    Live,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Backtest => f.write_str("backtest"),
            SessionMode::Live => f.write_str("live"),
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Uploading,
    Uploaded,
    Running,
    Terminating,
    Terminated,
    Reconciled,
    /// Terminal failure with the reason (server message preserved verbatim).
    Failed { reason: String },
}

impl SessionState {
    /// No transitions leave a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Reconciled | SessionState::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Uploading => "uploading",
            SessionState::Uploaded => "uploaded",
            SessionState::Running => "running",
            SessionState::Terminating => "terminating",
            SessionState::Terminated => "terminated",
            SessionState::Reconciled => "reconciled",
            SessionState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed { reason } => write!(f, "failed ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from} → {to} for a {mode} session")]
    Illegal {
        from: String,
        to: String,
        mode: SessionMode,
    },

    #[error("session is already in terminal state {0}")]
    AlreadyTerminal(String),
}

/// One entry in the session audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One remote run, tracked locally.
///
/// Fields are private; state changes only through `transition()` and the
/// helpers built on it, so the history always matches the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    session_id: Option<String>,
    strategy_name: String,
    mode: SessionMode,
    state: SessionState,
    dashboard_reference: Option<String>,
    server_notice: Option<String>,
    report_path: Option<PathBuf>,
    created_at: DateTime<Utc>,
    history: Vec<SessionTransition>,
}

impl Session {
    pub fn new(strategy_name: impl Into<String>, mode: SessionMode) -> Self {
        Self {
            session_id: None,
            strategy_name: strategy_name.into(),
            mode,
            state: SessionState::Created,
            dashboard_reference: None,
            server_notice: None,
            report_path: None,
            created_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Re-create a running live session for an id issued earlier.
    pub fn attach(session_id: impl Into<String>, strategy_name: impl Into<String>) -> Self {
        let mut session = Self::new(strategy_name, SessionMode::Live);
        session.session_id = Some(session_id.into());
        session.state = SessionState::Running;
        session.history.push(SessionTransition {
            from: SessionState::Created,
            to: SessionState::Running,
            reason: "attached to existing session".into(),
            at: session.created_at,
        });
        session
    }

    fn allowed(&self, to: &SessionState) -> bool {
        use SessionState::*;
        if self.state.is_terminal() {
            return false;
        }
        if matches!(to, Failed { .. }) {
            return true;
        }
        matches!(
            (&self.state, to, self.mode),
            (Created, Uploading, _)
                | (Uploading, Uploaded, _)
                | (Uploaded, Running, _)
                | (Running, Terminating, SessionMode::Live)
                | (Terminating, Terminated, SessionMode::Live)
                | (Terminating, Running, SessionMode::Live)
                | (Running, Terminated, SessionMode::Backtest)
                | (Terminated, Reconciled, SessionMode::Live)
        )
    }

    /// Move to `to`, recording `reason` in the history.
    pub fn transition(
        &mut self,
        to: SessionState,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.state.to_string()));
        }
        if !self.allowed(&to) {
            return Err(TransitionError::Illegal {
                from: self.state.to_string(),
                to: to.to_string(),
                mode: self.mode,
            });
        }
        let from = std::mem::replace(&mut self.state, to.clone());
        self.history.push(SessionTransition {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Move to `Failed`, keeping `reason` verbatim.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        let reason = reason.into();
        self.transition(
            SessionState::Failed {
                reason: reason.clone(),
            },
            reason,
        )
    }

    /// `Uploaded → Running`, recording what the engine returned.
    pub fn start_running(
        &mut self,
        session_id: Option<String>,
        dashboard_reference: Option<String>,
        server_notice: Option<String>,
    ) -> Result<(), TransitionError> {
        self.transition(SessionState::Running, "run command accepted")?;
        self.session_id = session_id;
        self.dashboard_reference = dashboard_reference;
        self.server_notice = server_notice;
        Ok(())
    }

    pub fn attach_report(&mut self, path: PathBuf) {
        self.report_path = Some(path);
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.server_notice = Some(notice.into());
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn dashboard_reference(&self) -> Option<&str> {
        self.dashboard_reference.as_deref()
    }

    pub fn server_notice(&self) -> Option<&str> {
        self.server_notice.as_deref()
    }

    pub fn report_path(&self) -> Option<&Path> {
        self.report_path.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn history(&self) -> &[SessionTransition] {
        &self.history
    }
}
