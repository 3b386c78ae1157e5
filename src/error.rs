//! Error types for the reliable client.
//!
//! `ClientError` covers lifecycle operations (`connect`, `send_event`
//! registration). `AckError` is the per-send outcome delivered through an
//! [`AckFuture`](crate::AckFuture).

use std::fmt;

use crate::negotiate::NegotiateError;

/// Failure of a lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiateError),
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("websocket connect failed: {0}")]
    Transport(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket connect timed out after {0}s")]
    ConnectTimeout(u64),
    #[error("ack id {0} is already pending")]
    DuplicateAckId(String),
    #[error("frame codec error: {0}")]
    Codec(#[from] frames::CodecError),
    #[error("connect superseded by a newer connect or close")]
    Cancelled,
}

/// Failure outcome of a single sent event.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    /// The transport dropped (or the ack deadline passed) before an ack arrived.
    #[error("timed out waiting for ack")]
    Timeout,
    /// The client was closed or the transport replaced by an explicit connect.
    #[error("client closed")]
    Closed,
    /// No transport was open when the event was sent.
    #[error("not connected")]
    NotConnected,
    /// A later event was acknowledged first.
    #[error("superseded by a later ack")]
    Superseded,
    /// The server rejected the event.
    #[error("rejected: {name}")]
    Rejected { name: String, message: Option<String> },
}

/// Successful outcome of a sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acked<A> {
    pub ack_id: A,
    /// The server reported the event as already applied.
    pub duplicate: bool,
}

impl<A: fmt::Display> fmt::Display for Acked<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.duplicate {
            write!(f, "ack {} (duplicate)", self.ack_id)
        } else {
            write!(f, "ack {}", self.ack_id)
        }
    }
}
