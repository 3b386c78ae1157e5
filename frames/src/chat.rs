//! Chat binary protocol (`realtime.looki.v1`).
//!
//! DESIGN
//! ======
//! String ack ids and sequence ids. Ordering is plain lexicographic string
//! order, so generated ack ids are zero-padded to a fixed width to keep that
//! order equal to generation order. An empty `seq_id` on the wire means the
//! event is unsequenced.
//!
//! The server does not support session resumption, and the credential is
//! offered as a second subprotocol instead of a query parameter.

use std::time::Duration;

use prost::Message;

use crate::{
    AckFailure, Codec, CodecError, Credential, Inbound, InboundFrame, Outbound, OutboundFrame,
    WireMessage,
};

/// Width of generated ack ids.
const ACK_ID_WIDTH: usize = 20;

/// Codec for the chat protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChatCodec;

/// A chat line, sent as an event body and delivered as a data payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub content: String,
    /// Milliseconds since the Unix epoch, as stamped by the sender.
    pub sent_at_ms: i64,
}

impl ChatMessage {
    /// Outbound line. The server fills in `from`.
    #[must_use]
    pub fn text(content: impl Into<String>, sent_at_ms: i64) -> Self {
        Self {
            from: String::new(),
            content: content.into(),
            sent_at_ms,
        }
    }
}

impl Codec for ChatCodec {
    type AckId = String;
    type SequenceId = String;
    type Event = ChatMessage;
    type Payload = ChatMessage;

    const SUBPROTOCOL: &'static str = "realtime.looki.v1";
    const RESUMABLE: bool = false;
    const CREDENTIAL: Credential = Credential::SubprotocolPrefix("looki-jwt-");
    const ACK_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

    fn ack_id(seed: u64) -> String {
        format!("{seed:0width$}", width = ACK_ID_WIDTH)
    }

    fn encode(&self, frame: OutboundFrame<Self>) -> Result<WireMessage, CodecError> {
        let message = match frame {
            Outbound::Event { ack_id, event } => user::Message::Event(UserEventWire {
                ack_id,
                text: Some(TextWire::from(event)),
            }),
            Outbound::SequenceAck { sequence_id } => {
                user::Message::SeqAck(SeqAckWire { seq_id: sequence_id })
            }
        };
        let wire = UserWire {
            message: Some(message),
        };
        Ok(WireMessage::Binary(wire.encode_to_vec()))
    }

    fn decode(&self, message: &WireMessage) -> Result<InboundFrame<Self>, CodecError> {
        let WireMessage::Binary(bytes) = message else {
            return Err(CodecError::UnexpectedKind(message.kind()));
        };

        let wire = ServerWire::decode(bytes.as_slice())?;
        match wire.message.ok_or(CodecError::Empty)? {
            server::Message::Ack(ack) => Ok(Inbound::Ack {
                ack_id: ack.ack_id,
                success: ack.success,
                error: ack.error.map(|e| {
                    let message = (!e.message.is_empty()).then_some(e.message);
                    AckFailure::new(e.name, message)
                }),
            }),
            server::Message::Event(event) => {
                let sequence_id = (!event.seq_id.is_empty()).then_some(event.seq_id);
                match event.payload.ok_or(CodecError::Empty)? {
                    server_event::Payload::Connected(connected) => Ok(Inbound::Connected {
                        connection_id: connected.connection_id,
                        user_id: None,
                        reconnection_token: None,
                    }),
                    server_event::Payload::Text(text) => Ok(Inbound::Data {
                        sequence_id,
                        payload: ChatMessage::from(text),
                    }),
                }
            }
            server::Message::SeqAck(ack) => Ok(Inbound::SequenceAck {
                sequence_id: ack.seq_id,
            }),
        }
    }
}

impl From<ChatMessage> for TextWire {
    fn from(message: ChatMessage) -> Self {
        Self {
            from: message.from,
            content: message.content,
            sent_at: message.sent_at_ms,
        }
    }
}

impl From<TextWire> for ChatMessage {
    fn from(wire: TextWire) -> Self {
        Self {
            from: wire.from,
            content: wire.content,
            sent_at_ms: wire.sent_at,
        }
    }
}

// =============================================================================
// WIRE SCHEMA
// =============================================================================

#[derive(Clone, PartialEq, Message)]
struct ServerWire {
    #[prost(oneof = "server::Message", tags = "1, 2, 3")]
    message: Option<server::Message>,
}

mod server {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Message {
        #[prost(message, tag = "1")]
        Ack(super::AckWire),
        #[prost(message, tag = "2")]
        Event(super::ServerEventWire),
        #[prost(message, tag = "3")]
        SeqAck(super::SeqAckWire),
    }
}

#[derive(Clone, PartialEq, Message)]
struct AckWire {
    #[prost(string, tag = "1")]
    ack_id: String,
    #[prost(bool, tag = "2")]
    success: bool,
    #[prost(message, optional, tag = "3")]
    error: Option<AckErrorWire>,
}

#[derive(Clone, PartialEq, Message)]
struct AckErrorWire {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(string, tag = "2")]
    message: String,
}

#[derive(Clone, PartialEq, Message)]
struct ServerEventWire {
    #[prost(string, tag = "1")]
    seq_id: String,
    #[prost(oneof = "server_event::Payload", tags = "2, 3")]
    payload: Option<server_event::Payload>,
}

mod server_event {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Payload {
        #[prost(message, tag = "2")]
        Connected(super::ConnectedWire),
        #[prost(message, tag = "3")]
        Text(super::TextWire),
    }
}

#[derive(Clone, PartialEq, Message)]
struct ConnectedWire {
    #[prost(string, tag = "1")]
    connection_id: String,
}

#[derive(Clone, PartialEq, Message)]
struct TextWire {
    #[prost(string, tag = "1")]
    from: String,
    #[prost(string, tag = "2")]
    content: String,
    #[prost(int64, tag = "3")]
    sent_at: i64,
}

#[derive(Clone, PartialEq, Message)]
struct SeqAckWire {
    #[prost(string, tag = "1")]
    seq_id: String,
}

#[derive(Clone, PartialEq, Message)]
struct UserWire {
    #[prost(oneof = "user::Message", tags = "1, 2")]
    message: Option<user::Message>,
}

mod user {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Message {
        #[prost(message, tag = "1")]
        Event(super::UserEventWire),
        #[prost(message, tag = "2")]
        SeqAck(super::SeqAckWire),
    }
}

#[derive(Clone, PartialEq, Message)]
struct UserEventWire {
    #[prost(string, tag = "1")]
    ack_id: String,
    #[prost(message, optional, tag = "2")]
    text: Option<TextWire>,
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
