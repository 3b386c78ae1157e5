//! Protobuf reliable subprotocol (`protobuf.reliable.webpubsub.azure.v1`).
//!
//! Binary frames carrying `UpstreamMessage` / `DownstreamMessage`. Only the
//! messages the reliable client exchanges are modelled; other oneof arms
//! (group join/leave, send-to-group) decode as unknown fields and surface as
//! [`CodecError::Empty`].

use std::time::Duration;

use prost::Message;

use crate::{
    AckFailure, Codec, CodecError, Credential, DataMessage, EventMessage, Inbound, InboundFrame,
    MessageData, Outbound, OutboundFrame, WireMessage,
};

/// Codec for the resumable protobuf subprotocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtobufCodec;

impl Codec for ProtobufCodec {
    type AckId = u64;
    type SequenceId = u64;
    type Event = EventMessage;
    type Payload = DataMessage;

    const SUBPROTOCOL: &'static str = "protobuf.reliable.webpubsub.azure.v1";
    const RESUMABLE: bool = true;
    const CREDENTIAL: Credential = Credential::Query("access_token");
    const ACK_TIMEOUT: Option<Duration> = None;

    fn ack_id(seed: u64) -> u64 {
        seed
    }

    fn encode(&self, frame: OutboundFrame<Self>) -> Result<WireMessage, CodecError> {
        let message = match frame {
            Outbound::Event { ack_id, event } => upstream::Message::EventMessage(EventWire {
                event: event.event,
                data: Some(data_to_wire(event.data)?),
                ack_id: Some(ack_id),
            }),
            Outbound::SequenceAck { sequence_id } => {
                upstream::Message::SequenceAckMessage(SequenceAckWire { sequence_id })
            }
        };
        let wire = UpstreamWire {
            message: Some(message),
        };
        Ok(WireMessage::Binary(wire.encode_to_vec()))
    }

    fn decode(&self, message: &WireMessage) -> Result<InboundFrame<Self>, CodecError> {
        let WireMessage::Binary(bytes) = message else {
            return Err(CodecError::UnexpectedKind(message.kind()));
        };

        let wire = DownstreamWire::decode(bytes.as_slice())?;
        match wire.message.ok_or(CodecError::Empty)? {
            downstream::Message::AckMessage(ack) => Ok(Inbound::Ack {
                ack_id: ack.ack_id,
                success: ack.success,
                error: ack
                    .error
                    .map(|e| AckFailure::new(e.name, non_empty(e.message))),
            }),
            downstream::Message::DataMessage(data) => Ok(Inbound::Data {
                sequence_id: data.sequence_id,
                payload: DataMessage {
                    from: data.from,
                    group: data.group,
                    data: data_from_wire(data.data.ok_or(CodecError::Empty)?)?,
                },
            }),
            downstream::Message::SystemMessage(system) => {
                match system.message.ok_or(CodecError::Empty)? {
                    system::Message::ConnectedMessage(connected) => Ok(Inbound::Connected {
                        connection_id: connected.connection_id,
                        user_id: non_empty(connected.user_id),
                        reconnection_token: non_empty(connected.reconnection_token),
                    }),
                    system::Message::DisconnectedMessage(disconnected) => {
                        Ok(Inbound::Disconnected {
                            reason: disconnected.reason,
                        })
                    }
                }
            }
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn data_to_wire(data: MessageData) -> Result<MessageDataWire, CodecError> {
    let data = match data {
        MessageData::Text(text) => message_data::Data::TextData(text),
        MessageData::Binary(bytes) => message_data::Data::BinaryData(bytes),
        MessageData::Protobuf(any) => message_data::Data::ProtobufData(any),
        MessageData::Json(value) => message_data::Data::JsonData(serde_json::to_string(&value)?),
    };
    Ok(MessageDataWire { data: Some(data) })
}

fn data_from_wire(wire: MessageDataWire) -> Result<MessageData, CodecError> {
    match wire.data.ok_or(CodecError::Empty)? {
        message_data::Data::TextData(text) => Ok(MessageData::Text(text)),
        message_data::Data::BinaryData(bytes) => Ok(MessageData::Binary(bytes)),
        message_data::Data::ProtobufData(any) => Ok(MessageData::Protobuf(any)),
        message_data::Data::JsonData(json) => Ok(MessageData::Json(serde_json::from_str(&json)?)),
    }
}

// =============================================================================
// WIRE SCHEMA
// =============================================================================

#[derive(Clone, PartialEq, Message)]
struct UpstreamWire {
    #[prost(oneof = "upstream::Message", tags = "5, 8")]
    message: Option<upstream::Message>,
}

mod upstream {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Message {
        #[prost(message, tag = "5")]
        EventMessage(super::EventWire),
        #[prost(message, tag = "8")]
        SequenceAckMessage(super::SequenceAckWire),
    }
}

#[derive(Clone, PartialEq, Message)]
struct EventWire {
    #[prost(string, tag = "1")]
    event: String,
    #[prost(message, optional, tag = "2")]
    data: Option<MessageDataWire>,
    #[prost(uint64, optional, tag = "3")]
    ack_id: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
struct SequenceAckWire {
    #[prost(uint64, tag = "1")]
    sequence_id: u64,
}

#[derive(Clone, PartialEq, Message)]
struct DownstreamWire {
    #[prost(oneof = "downstream::Message", tags = "1, 2, 3")]
    message: Option<downstream::Message>,
}

mod downstream {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Message {
        #[prost(message, tag = "1")]
        AckMessage(super::AckWire),
        #[prost(message, tag = "2")]
        DataMessage(super::DataWire),
        #[prost(message, tag = "3")]
        SystemMessage(super::SystemWire),
    }
}

#[derive(Clone, PartialEq, Message)]
struct AckWire {
    #[prost(uint64, tag = "1")]
    ack_id: u64,
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
struct DataWire {
    #[prost(string, tag = "1")]
    from: String,
    #[prost(string, optional, tag = "2")]
    group: Option<String>,
    #[prost(message, optional, tag = "3")]
    data: Option<MessageDataWire>,
    #[prost(uint64, optional, tag = "4")]
    sequence_id: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
struct SystemWire {
    #[prost(oneof = "system::Message", tags = "1, 2")]
    message: Option<system::Message>,
}

mod system {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Message {
        #[prost(message, tag = "1")]
        ConnectedMessage(super::ConnectedWire),
        #[prost(message, tag = "2")]
        DisconnectedMessage(super::DisconnectedWire),
    }
}

#[derive(Clone, PartialEq, Message)]
struct ConnectedWire {
    #[prost(string, tag = "1")]
    connection_id: String,
    #[prost(string, tag = "2")]
    user_id: String,
    #[prost(string, tag = "3")]
    reconnection_token: String,
}

#[derive(Clone, PartialEq, Message)]
struct DisconnectedWire {
    #[prost(string, tag = "2")]
    reason: String,
}

#[derive(Clone, PartialEq, Message)]
struct MessageDataWire {
    #[prost(oneof = "message_data::Data", tags = "1, 2, 3, 4")]
    data: Option<message_data::Data>,
}

mod message_data {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Data {
        #[prost(string, tag = "1")]
        TextData(String),
        #[prost(bytes = "vec", tag = "2")]
        BinaryData(Vec<u8>),
        #[prost(message, tag = "3")]
        ProtobufData(prost_types::Any),
        #[prost(string, tag = "4")]
        JsonData(String),
    }
}

#[cfg(test)]
#[path = "protobuf_test.rs"]
mod tests;
