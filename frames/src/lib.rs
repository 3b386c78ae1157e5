//! Shared frame model and codecs for the reliable pubsub transport.
//!
//! This crate owns the wire representation used by the client core and the
//! CLI. Each protocol variant is a [`Codec`]: it classifies raw transport
//! messages into [`Inbound`] frames, serializes [`Outbound`] frames, and
//! declares the capabilities the connection state machine depends on
//! (ack/sequence ordering, resumability, credential placement).
//!
//! VARIANTS
//! ========
//! - [`JsonCodec`]: `json.reliable.webpubsub.azure.v1`, text frames, resumable.
//! - [`ProtobufCodec`]: `protobuf.reliable.webpubsub.azure.v1`, binary frames, resumable.
//! - [`ChatCodec`]: `realtime.looki.v1`, binary frames, string ids, not resumable.

pub mod chat;
pub mod json;
pub mod protobuf;

use std::fmt;
use std::time::Duration;

pub use chat::{ChatCodec, ChatMessage};
pub use json::JsonCodec;
pub use protobuf::ProtobufCodec;

/// Error returned by [`Codec::encode`] and [`Codec::decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf message.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The text frame is not valid JSON for this subprotocol.
    #[error("invalid json frame: {0}")]
    Json(#[from] serde_json::Error),
    /// A binary payload carried inside a JSON frame is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The transport delivered a text frame to a binary subprotocol or vice versa.
    #[error("unexpected {0} frame for this subprotocol")]
    UnexpectedKind(&'static str),
    /// The frame decoded but carries no message body.
    #[error("frame carries no message")]
    Empty,
    /// The payload shape does not match its declared data type.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
}

/// A single transport message, before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Human-readable transport kind, used in logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Where the negotiated credential travels during the transport handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Credential {
    /// Appended to the endpoint as `?<name>=<credential>`.
    Query(&'static str),
    /// Offered as an extra subprotocol `<prefix><credential>`.
    SubprotocolPrefix(&'static str),
}

/// Failure detail attached to a negative acknowledgment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckFailure {
    pub name: String,
    pub message: Option<String>,
}

impl AckFailure {
    /// Error name the server uses when the event was already applied.
    pub const DUPLICATE: &'static str = "Duplicate";

    #[must_use]
    pub fn new(name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            message,
        }
    }

    /// Whether the server reported the event as already applied.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.name == Self::DUPLICATE
    }
}

impl fmt::Display for AckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) if !message.is_empty() => write!(f, "{}: {message}", self.name),
            _ => f.write_str(&self.name),
        }
    }
}

/// Classification of one server→client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound<A, S, P> {
    /// Control frame establishing the session identity.
    Connected {
        connection_id: String,
        user_id: Option<String>,
        reconnection_token: Option<String>,
    },
    /// Control frame announcing the server is ending the session.
    Disconnected { reason: String },
    /// Acknowledgment of a client event.
    Ack {
        ack_id: A,
        success: bool,
        error: Option<AckFailure>,
    },
    /// Application data, optionally sequenced for resumption.
    Data { sequence_id: Option<S>, payload: P },
    /// A sequence acknowledgment reflected back by the server.
    SequenceAck { sequence_id: S },
}

/// One client→server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound<A, S, E> {
    /// Application event awaiting acknowledgment under `ack_id`.
    Event { ack_id: A, event: E },
    /// Cumulative acknowledgment of server data up to `sequence_id`.
    SequenceAck { sequence_id: S },
}

/// A protocol variant: frame classification plus the capability set the
/// connection state machine is parameterized by.
pub trait Codec: Send + Sync + 'static {
    /// Identifier correlating an event with its ack. Its `Ord` is the
    /// protocol's ack ordering used by the cumulative-failure rule.
    type AckId: Clone + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static;
    /// Server data sequence number. `Default` means "nothing received".
    type SequenceId: Clone + Ord + Default + fmt::Debug + Send + Sync + 'static;
    /// Outbound application event body.
    type Event: Send + 'static;
    /// Inbound application payload delivered to the caller.
    type Payload: fmt::Debug + Send + 'static;

    /// WebSocket subprotocol offered during the handshake.
    const SUBPROTOCOL: &'static str;
    /// Whether a dropped transport may be reattached to the same session.
    const RESUMABLE: bool;
    /// Placement of the negotiated credential.
    const CREDENTIAL: Credential;
    /// How long a sent event may go unacknowledged before the transport is
    /// reset. `None` waits until the transport drops.
    const ACK_TIMEOUT: Option<Duration>;

    /// Derive an ack id from a monotonically increasing seed. Ids derived from
    /// larger seeds must order after ids derived from smaller ones.
    fn ack_id(seed: u64) -> Self::AckId;

    /// Serialize an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the event cannot be represented on this wire.
    fn encode(&self, frame: OutboundFrame<Self>) -> Result<WireMessage, CodecError>;

    /// Classify a transport message.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for frames that are malformed or unknown to this
    /// subprotocol.
    fn decode(&self, message: &WireMessage) -> Result<InboundFrame<Self>, CodecError>;
}

/// Inbound frame type for codec `C`.
pub type InboundFrame<C> =
    Inbound<<C as Codec>::AckId, <C as Codec>::SequenceId, <C as Codec>::Payload>;

/// Outbound frame type for codec `C`.
pub type OutboundFrame<C> =
    Outbound<<C as Codec>::AckId, <C as Codec>::SequenceId, <C as Codec>::Event>;

// =============================================================================
// WEBPUBSUB PAYLOADS
// =============================================================================

/// Application data carried by the two webpubsub subprotocols.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageData {
    Text(String),
    Json(serde_json::Value),
    Binary(Vec<u8>),
    Protobuf(prost_types::Any),
}

impl MessageData {
    /// The `dataType` label used on the JSON wire.
    #[must_use]
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Binary(_) => "binary",
            Self::Protobuf(_) => "protobuf",
        }
    }
}

/// Outbound webpubsub event: a named event with its data.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    pub event: String,
    pub data: MessageData,
}

impl EventMessage {
    #[must_use]
    pub fn new(event: impl Into<String>, data: MessageData) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Inbound webpubsub data message.
#[derive(Clone, Debug, PartialEq)]
pub struct DataMessage {
    /// `"server"` or `"group"`.
    pub from: String,
    pub group: Option<String>,
    pub data: MessageData,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
