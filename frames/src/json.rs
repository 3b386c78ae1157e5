//! JSON reliable subprotocol (`json.reliable.webpubsub.azure.v1`).
//!
//! Text frames tagged by `type`. Binary and protobuf payloads travel as
//! base64 strings next to a `dataType` discriminator.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AckFailure, Codec, CodecError, Credential, DataMessage, EventMessage, Inbound, InboundFrame,
    MessageData, Outbound, OutboundFrame, WireMessage,
};

/// Codec for the resumable JSON subprotocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type AckId = u64;
    type SequenceId = u64;
    type Event = EventMessage;
    type Payload = DataMessage;

    const SUBPROTOCOL: &'static str = "json.reliable.webpubsub.azure.v1";
    const RESUMABLE: bool = true;
    const CREDENTIAL: Credential = Credential::Query("access_token");
    const ACK_TIMEOUT: Option<Duration> = None;

    fn ack_id(seed: u64) -> u64 {
        seed
    }

    fn encode(&self, frame: OutboundFrame<Self>) -> Result<WireMessage, CodecError> {
        let upstream = match frame {
            Outbound::Event { ack_id, event } => {
                let data_type = event.data.data_type();
                Upstream::Event {
                    event: event.event,
                    data_type,
                    data: data_to_json(event.data),
                    ack_id,
                }
            }
            Outbound::SequenceAck { sequence_id } => Upstream::SequenceAck { sequence_id },
        };
        Ok(WireMessage::Text(serde_json::to_string(&upstream)?))
    }

    fn decode(&self, message: &WireMessage) -> Result<InboundFrame<Self>, CodecError> {
        let WireMessage::Text(text) = message else {
            return Err(CodecError::UnexpectedKind(message.kind()));
        };

        let frame = match serde_json::from_str::<Downstream>(text)? {
            Downstream::System(SystemEvent::Connected {
                user_id,
                connection_id,
                reconnection_token,
            }) => Inbound::Connected {
                connection_id,
                user_id: user_id.and_then(user_id_string),
                reconnection_token: reconnection_token.filter(|token| !token.is_empty()),
            },
            Downstream::System(SystemEvent::Disconnected { message }) => {
                Inbound::Disconnected { reason: message }
            }
            Downstream::Ack {
                ack_id,
                success,
                error,
            } => Inbound::Ack {
                ack_id,
                success,
                error: error.map(|e| AckFailure::new(e.name, e.message)),
            },
            Downstream::Message {
                from,
                group,
                data_type,
                data,
                sequence_id,
            } => Inbound::Data {
                sequence_id,
                payload: DataMessage {
                    from,
                    group,
                    data: data_from_json(data_type, data)?,
                },
            },
            Downstream::SequenceAck { sequence_id } => Inbound::SequenceAck { sequence_id },
        };
        Ok(frame)
    }
}

// =============================================================================
// WIRE SHAPES
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Upstream {
    #[serde(rename_all = "camelCase")]
    Event {
        event: String,
        data_type: &'static str,
        data: Value,
        ack_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    SequenceAck { sequence_id: u64 },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Downstream {
    System(SystemEvent),
    #[serde(rename_all = "camelCase")]
    Ack {
        ack_id: u64,
        success: bool,
        #[serde(default)]
        error: Option<AckErrorBody>,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        #[serde(default)]
        from: String,
        #[serde(default)]
        group: Option<String>,
        data_type: DataType,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        sequence_id: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SequenceAck { sequence_id: u64 },
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum SystemEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        #[serde(default)]
        user_id: Option<Value>,
        connection_id: String,
        #[serde(default)]
        reconnection_token: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        message: String,
    },
}

#[derive(Deserialize)]
struct AckErrorBody {
    name: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DataType {
    Json,
    Text,
    Binary,
    Protobuf,
}

/// `userId` is a string or a number depending on the issuer.
fn user_id_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn data_to_json(data: MessageData) -> Value {
    match data {
        MessageData::Text(text) => Value::String(text),
        MessageData::Json(value) => value,
        MessageData::Binary(bytes) => Value::String(STANDARD.encode(bytes)),
        MessageData::Protobuf(any) => Value::String(STANDARD.encode(any.encode_to_vec())),
    }
}

fn data_from_json(data_type: DataType, data: Value) -> Result<MessageData, CodecError> {
    match data_type {
        DataType::Json => Ok(MessageData::Json(data)),
        DataType::Text => match data {
            Value::String(text) => Ok(MessageData::Text(text)),
            _ => Err(CodecError::InvalidPayload("text data must be a string")),
        },
        DataType::Binary => Ok(MessageData::Binary(base64_field(&data)?)),
        DataType::Protobuf => {
            let bytes = base64_field(&data)?;
            Ok(MessageData::Protobuf(prost_types::Any::decode(bytes.as_slice())?))
        }
    }
}

fn base64_field(data: &Value) -> Result<Vec<u8>, CodecError> {
    let encoded = data
        .as_str()
        .ok_or(CodecError::InvalidPayload("binary data must be a base64 string"))?;
    Ok(STANDARD.decode(encoded)?)
}

#[cfg(test)]
#[path = "json_test.rs"]
mod tests;
