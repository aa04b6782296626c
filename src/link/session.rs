//! Per-connection state machine on the server side.
//!
//! A session covers exactly one request/response exchange:
//!
//! ```text
//! AwaitingRequest -> Executing -> SendingResponse -> Closed
//! ```
//!
//! A failed read skips straight to `SendingResponse` so the peer still gets
//! an error reply.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, request not yet reassembled.
    AwaitingRequest,
    /// Request resolved, handler running.
    Executing,
    /// Reply is being framed onto the socket.
    SendingResponse,
    /// Exchange finished, connection about to be dropped.
    Closed,
}

/// One accepted connection.
#[derive(Debug)]
pub struct Session {
    /// Remote address of the DUT.
    pub peer: SocketAddr,
    /// Current session state.
    pub state: SessionState,
    opened: Instant,
}

impl Session {
    /// Create a session in its initial state.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: SessionState::AwaitingRequest,
            opened: Instant::now(),
        }
    }

    pub fn start_executing(&mut self) {
        debug_assert_eq!(self.state, SessionState::AwaitingRequest);
        self.transition(SessionState::Executing);
    }

    pub fn start_sending(&mut self) {
        debug_assert!(matches!(
            self.state,
            SessionState::AwaitingRequest | SessionState::Executing
        ));
        self.transition(SessionState::SendingResponse);
    }

    /// Mark the exchange finished.
    pub fn close(&mut self) {
        self.transition(SessionState::Closed);
    }

    /// Time since the connection was accepted.
    pub fn elapsed(&self) -> Duration {
        self.opened.elapsed()
    }

    fn transition(&mut self, next: SessionState) {
        debug!(peer = %self.peer, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_session_state_transitions() {
        let mut session = Session::new(peer());
        assert_eq!(session.state, SessionState::AwaitingRequest);

        session.start_executing();
        assert_eq!(session.state, SessionState::Executing);

        session.start_sending();
        assert_eq!(session.state, SessionState::SendingResponse);

        session.close();
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn test_failed_read_goes_straight_to_sending() {
        let mut session = Session::new(peer());

        session.start_sending();
        assert_eq!(session.state, SessionState::SendingResponse);

        session.close();
        assert_eq!(session.state, SessionState::Closed);
    }
}
