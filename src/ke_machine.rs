// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE per-connection state machine.
//!
//! A key-establishment connection moves through a fixed sequence of phases;
//! the I/O drivers ([`crate::ke_client`], [`crate::ke_server`]) perform the
//! work of each phase and feed the completion event back in. The machine
//! itself holds no sockets or sessions, so every transition is directly
//! testable.
//!
//! Client: `WaitConnect → Handshake → Send → Receive → Shutdown → Closed`.
//! Server (socket already connected on accept):
//! `Handshake → Receive → Send → Shutdown → Closed`.
//!
//! A timeout, fatal I/O error, ALPN mismatch, or malformed message moves any
//! state to `Closed`, as does an event the current state cannot accept.

/// Role of a key-establishment connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeMode {
    /// Accepted connection on the NTS-KE listener.
    Server,
    /// Outgoing connection to an NTS-KE server.
    Client,
}

/// Phase of a key-establishment connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeState {
    /// Waiting for the TCP connect to finish (client only).
    WaitConnect,
    /// Running the TLS handshake.
    Handshake,
    /// Draining the message buffer into the TLS session.
    Send,
    /// Accumulating TLS records until a full message validates.
    Receive,
    /// Issuing the TLS close notify.
    Shutdown,
    /// Connection torn down; terminal.
    Closed,
}

/// Completion events fed to the machine by the I/O driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeEvent {
    /// The TCP connect finished without a socket error.
    ConnectFinished,
    /// The TLS handshake finished; `alpn_ok` is whether `ntske/1` was
    /// negotiated.
    HandshakeFinished {
        /// Whether the negotiated ALPN protocol matched.
        alpn_ok: bool,
    },
    /// Every buffered byte has been written to the TLS session.
    MessageSent,
    /// A complete, well-formed message has been received.
    MessageComplete,
    /// The TLS close notify completed.
    ShutdownFinished,
    /// The connection timer fired.
    TimedOut,
    /// A fatal TLS or socket error occurred.
    Fatal,
}

/// State machine for one key-establishment connection.
#[derive(Debug)]
pub struct KeMachine {
    mode: KeMode,
    state: KeState,
}

impl KeMachine {
    /// Machine for an outgoing client connection, starting at `WaitConnect`.
    pub fn client() -> Self {
        KeMachine {
            mode: KeMode::Client,
            state: KeState::WaitConnect,
        }
    }

    /// Machine for an accepted server connection, starting at `Handshake`.
    pub fn server() -> Self {
        KeMachine {
            mode: KeMode::Server,
            state: KeState::Handshake,
        }
    }

    /// The connection role.
    pub fn mode(&self) -> KeMode {
        self.mode
    }

    /// The current phase.
    pub fn state(&self) -> KeState {
        self.state
    }

    /// Whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.state == KeState::Closed
    }

    /// Apply an event, returning the new state.
    ///
    /// An event the current state cannot accept closes the connection.
    pub fn advance(&mut self, event: KeEvent) -> KeState {
        self.state = match (self.state, event) {
            (_, KeEvent::TimedOut) | (_, KeEvent::Fatal) => KeState::Closed,
            (_, KeEvent::HandshakeFinished { alpn_ok: false }) => KeState::Closed,

            (KeState::WaitConnect, KeEvent::ConnectFinished) => KeState::Handshake,

            (KeState::Handshake, KeEvent::HandshakeFinished { alpn_ok: true }) => {
                match self.mode {
                    // The client sends its request first; the server waits
                    // for it.
                    KeMode::Client => KeState::Send,
                    KeMode::Server => KeState::Receive,
                }
            }

            (KeState::Send, KeEvent::MessageSent) => match self.mode {
                KeMode::Client => KeState::Receive,
                KeMode::Server => KeState::Shutdown,
            },

            (KeState::Receive, KeEvent::MessageComplete) => match self.mode {
                KeMode::Client => KeState::Shutdown,
                KeMode::Server => KeState::Send,
            },

            (KeState::Shutdown, KeEvent::ShutdownFinished) => KeState::Closed,

            _ => KeState::Closed,
        };
        self.state
    }
}

/// Apply an event and require the expected resulting state.
///
/// The I/O drivers use this to assert the exchange is sequencing as
/// designed; a mismatch means the connection must be torn down.
pub(crate) fn advance_expect(
    machine: &mut KeMachine,
    event: KeEvent,
    want: KeState,
) -> Result<(), crate::error::KeError> {
    if machine.advance(event) != want {
        return Err(crate::error::KeError::UnexpectedState);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpn_ok() -> KeEvent {
        KeEvent::HandshakeFinished { alpn_ok: true }
    }

    #[test]
    fn test_client_full_lifecycle() {
        let mut m = KeMachine::client();
        assert_eq!(m.state(), KeState::WaitConnect);
        assert_eq!(m.advance(KeEvent::ConnectFinished), KeState::Handshake);
        assert_eq!(m.advance(alpn_ok()), KeState::Send);
        assert_eq!(m.advance(KeEvent::MessageSent), KeState::Receive);
        assert_eq!(m.advance(KeEvent::MessageComplete), KeState::Shutdown);
        assert_eq!(m.advance(KeEvent::ShutdownFinished), KeState::Closed);
        assert!(m.is_closed());
    }

    #[test]
    fn test_server_full_lifecycle() {
        let mut m = KeMachine::server();
        assert_eq!(m.state(), KeState::Handshake);
        assert_eq!(m.advance(alpn_ok()), KeState::Receive);
        assert_eq!(m.advance(KeEvent::MessageComplete), KeState::Send);
        assert_eq!(m.advance(KeEvent::MessageSent), KeState::Shutdown);
        assert_eq!(m.advance(KeEvent::ShutdownFinished), KeState::Closed);
    }

    #[test]
    fn test_alpn_mismatch_closes() {
        let mut m = KeMachine::server();
        assert_eq!(
            m.advance(KeEvent::HandshakeFinished { alpn_ok: false }),
            KeState::Closed
        );
    }

    #[test]
    fn test_timeout_closes_from_any_state() {
        for build in [KeMachine::client, KeMachine::server] {
            let mut m = build();
            // Walk one step in, then time out.
            if m.mode() == KeMode::Client {
                m.advance(KeEvent::ConnectFinished);
            }
            m.advance(alpn_ok());
            assert_eq!(m.advance(KeEvent::TimedOut), KeState::Closed);
        }
    }

    #[test]
    fn test_fatal_error_closes() {
        let mut m = KeMachine::client();
        m.advance(KeEvent::ConnectFinished);
        assert_eq!(m.advance(KeEvent::Fatal), KeState::Closed);
    }

    #[test]
    fn test_unexpected_event_closes() {
        // A server never sees ConnectFinished.
        let mut m = KeMachine::server();
        assert_eq!(m.advance(KeEvent::ConnectFinished), KeState::Closed);

        // MessageComplete before the handshake is out of order.
        let mut m = KeMachine::client();
        assert_eq!(m.advance(KeEvent::MessageComplete), KeState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut m = KeMachine::client();
        m.advance(KeEvent::Fatal);
        assert_eq!(m.advance(KeEvent::ConnectFinished), KeState::Closed);
        assert_eq!(m.advance(alpn_ok()), KeState::Closed);
    }
}
