use crate::ws::ServerEvent;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a socket connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// Transport is being opened (initial connect or a scheduled retry)
    Connecting,
    /// Transport open, no token to authenticate with yet
    Open,
    /// Auth frame sent, waiting for `auth success`
    Authenticating,
    /// Authenticated with the daemon
    Ready,
    /// Not connected and not retrying
    Closed,
    /// Retries exhausted
    Errored,
}

impl ConnectionPhase {
    /// True when frames can be written to the transport.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionPhase::Open | ConnectionPhase::Authenticating | ConnectionPhase::Ready
        )
    }
}

/// How a transport close is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseKind {
    /// Clean close (1000). No retry.
    Normal,
    /// Reserved rejection/conflict code. No retry.
    Fatal,
    /// Anything else. Retried while the budget lasts.
    Transient,
}

/// Events published by a socket connection to its subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketEvent {
    /// Transport opened (initial connect or reconnect)
    Open,
    /// A reconnect was scheduled
    Reconnecting { attempt: u32 },
    /// Transport closed
    Closed {
        code: u16,
        reason: String,
        kind: CloseKind,
    },
    /// Retries exhausted; the connection will not try again
    ConnectError,
    /// Transport reported an error. The close that follows drives retries.
    TransportError(String),
    /// Decoded daemon event
    Server(ServerEvent),
}
