//! Session lifecycle as reported by the runtime's event stream.
//!
//! The machine never assigns itself a state: `observe` is fed every
//! state-changed event and answers with the action the frame loop must issue.
//! Rendering is gated only by `is_running`.

use tracing::{debug, info, warn};

use crate::engine::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Synchronized => "synchronized",
            Self::Visible => "visible",
            Self::Focused => "focused",
            Self::Stopping => "stopping",
            Self::LossPending => "loss-pending",
            Self::Exiting => "exiting",
        }
    }

    /// Edges of the session lifecycle graph.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (*self, next) {
            (Exiting, _) => false,
            (Unknown, Idle) => true,
            (Idle, Ready | Exiting) => true,
            (Ready, Synchronized) => true,
            (Synchronized, Visible | Stopping) => true,
            (Visible, Focused | Synchronized) => true,
            (Focused, Visible) => true,
            (Stopping, Idle) => true,
            (LossPending, Exiting) => true,
            (_, LossPending) => true,
            _ => false,
        }
    }
}

impl From<openxr::SessionState> for SessionState {
    fn from(state: openxr::SessionState) -> Self {
        match state {
            openxr::SessionState::IDLE => Self::Idle,
            openxr::SessionState::READY => Self::Ready,
            openxr::SessionState::SYNCHRONIZED => Self::Synchronized,
            openxr::SessionState::VISIBLE => Self::Visible,
            openxr::SessionState::FOCUSED => Self::Focused,
            openxr::SessionState::STOPPING => Self::Stopping,
            openxr::SessionState::LOSS_PENDING => Self::LossPending,
            openxr::SessionState::EXITING => Self::Exiting,
            _ => Self::Unknown,
        }
    }
}

/// What the frame loop has to do in response to an observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    None,
    /// Issue session-begin, then `set_running(true)`.
    Begin,
    /// Issue session-end, then `set_running(false)`.
    End,
    /// Leave the loop at the next loop top.
    Exit,
}

#[derive(Debug, Default)]
pub struct SessionStateMachine {
    state: SessionState,
    running: bool,
    exit_requested: bool,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn should_exit(&self) -> bool {
        self.exit_requested
    }

    pub fn set_running(&mut self, running: bool) {
        if self.running != running {
            info!("[Session] running = {running}");
        }
        self.running = running;
    }

    /// Record a runtime-reported state. Disallowed edges are rejected and the
    /// recorded state is left untouched.
    pub fn observe(&mut self, next: SessionState) -> EngineResult<SessionAction> {
        if next == self.state {
            debug!("[Session] duplicate state {}", next.as_str());
            return Ok(SessionAction::None);
        }

        if !self.state.can_transition_to(next) {
            warn!(
                "[Session] rejected transition {} -> {}",
                self.state.as_str(),
                next.as_str()
            );
            return Err(EngineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        info!("[Session] {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;

        let action = match next {
            SessionState::Ready => SessionAction::Begin,
            SessionState::Stopping => SessionAction::End,
            SessionState::Exiting => {
                self.exit_requested = true;
                SessionAction::Exit
            }
            SessionState::LossPending => {
                // Session is unrecoverable; stop rendering and leave.
                self.running = false;
                self.exit_requested = true;
                SessionAction::Exit
            }
            _ => SessionAction::None,
        };

        Ok(action)
    }

    /// The runtime announced the whole instance is going away.
    pub fn instance_loss_pending(&mut self) {
        warn!("[Session] instance loss pending");
        self.running = false;
        self.exit_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(machine: &mut SessionStateMachine, states: &[SessionState]) -> Vec<SessionAction> {
        states
            .iter()
            .map(|s| machine.observe(*s).unwrap())
            .collect()
    }

    #[test]
    fn full_lifecycle_produces_begin_end_exit() {
        use SessionState::*;

        let mut m = SessionStateMachine::new();
        let actions = drive(
            &mut m,
            &[Idle, Ready, Synchronized, Visible, Focused, Visible, Synchronized, Stopping, Idle, Exiting],
        );

        assert_eq!(actions[1], SessionAction::Begin);
        assert_eq!(actions[7], SessionAction::End);
        assert_eq!(actions[9], SessionAction::Exit);
        assert!(m.should_exit());
        assert_eq!(m.state(), Exiting);
    }

    #[test]
    fn running_flag_is_not_self_assigned() {
        let mut m = SessionStateMachine::new();
        drive(&mut m, &[SessionState::Idle, SessionState::Ready]);
        // The loop sets running only after session-begin succeeds.
        assert!(!m.is_running());
        m.set_running(true);
        assert!(m.is_running());
    }

    #[test]
    fn rejects_edges_outside_the_graph() {
        let mut m = SessionStateMachine::new();
        m.observe(SessionState::Idle).unwrap();

        let err = m.observe(SessionState::Focused).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: SessionState::Idle,
                to: SessionState::Focused
            }
        ));
        assert_eq!(m.state(), SessionState::Idle);

        assert!(m.observe(SessionState::Stopping).is_err());
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn exiting_is_terminal() {
        let mut m = SessionStateMachine::new();
        drive(&mut m, &[SessionState::Idle, SessionState::Exiting]);
        assert!(m.observe(SessionState::Idle).is_err());
        assert!(m.observe(SessionState::LossPending).is_err());
        assert_eq!(m.state(), SessionState::Exiting);
    }

    #[test]
    fn loss_pending_stops_and_exits() {
        let mut m = SessionStateMachine::new();
        drive(&mut m, &[SessionState::Idle, SessionState::Ready, SessionState::Synchronized]);
        m.set_running(true);

        assert_eq!(m.observe(SessionState::LossPending).unwrap(), SessionAction::Exit);
        assert!(!m.is_running());
        assert!(m.should_exit());
    }

    #[test]
    fn duplicate_state_is_ignored() {
        let mut m = SessionStateMachine::new();
        m.observe(SessionState::Idle).unwrap();
        assert_eq!(m.observe(SessionState::Idle).unwrap(), SessionAction::None);
    }

    #[test]
    fn every_allowed_edge_is_accepted() {
        use SessionState::*;
        let all = [Unknown, Idle, Ready, Synchronized, Visible, Focused, Stopping, LossPending, Exiting];

        for from in all {
            for to in all {
                if from == to {
                    continue;
                }
                let allowed = from.can_transition_to(to);
                let mut m = SessionStateMachine {
                    state: from,
                    ..Default::default()
                };
                assert_eq!(m.observe(to).is_ok(), allowed, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn maps_openxr_states() {
        assert_eq!(SessionState::from(openxr::SessionState::READY), SessionState::Ready);
        assert_eq!(SessionState::from(openxr::SessionState::EXITING), SessionState::Exiting);
        assert_eq!(SessionState::from(openxr::SessionState::UNKNOWN), SessionState::Unknown);
    }
}
