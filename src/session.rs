//! Per-session state owned by the connection manager.

use std::fmt;

use crate::sequence::SequenceTracker;

/// Lifecycle status of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
        })
    }
}

/// Credentials that reattach a dropped transport to its session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResumeInfo {
    pub connection_id: String,
    pub reconnection_token: String,
}

/// One logical client/server conversation.
#[derive(Debug)]
pub(crate) struct Session<S> {
    pub(crate) status: ConnectionStatus,
    pub(crate) connection_id: Option<String>,
    pub(crate) user_id: Option<String>,
    pub(crate) resume: Option<ResumeInfo>,
    pub(crate) sequence: SequenceTracker<S>,
    /// Reason from the server's disconnected frame, reported on the next
    /// `Disconnected` event.
    pub(crate) disconnect_reason: Option<String>,
}

impl<S: Clone + Ord + Default> Session<S> {
    pub(crate) fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            connection_id: None,
            user_id: None,
            resume: None,
            sequence: SequenceTracker::new(),
            disconnect_reason: None,
        }
    }

    /// Clear identity and checkpoint ahead of a fresh session.
    pub(crate) fn reset(&mut self, status: ConnectionStatus) {
        *self = Self::new();
        self.status = status;
    }
}
