use std::fmt;

/// Lifecycle of one producer or consumer process.
///
/// ```text
/// Idle ─▶ ClaimingRole ─▶ Rejected
///   │           │
///   └───────────┴─▶ Connecting ─▶ AwaitingConnection ─▶ Running ─▶ Stopping ─▶ Terminated
/// ```
///
/// `Stopping` is reachable from every non-terminal state once the running flag
/// clears or a fatal error occurs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ClaimingRole,
    Rejected,
    Connecting,
    AwaitingConnection,
    Running,
    Stopping,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Rejected | SessionState::Terminated)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, ClaimingRole) | (Idle, Connecting) => true,
            (ClaimingRole, Rejected) | (ClaimingRole, Connecting) => true,
            (Connecting, AwaitingConnection) => true,
            (AwaitingConnection, Running) => true,
            (Stopping, Terminated) => true,
            (from, Stopping) => !from.is_terminal() && from != Stopping,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
