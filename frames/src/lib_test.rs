use super::*;

#[test]
fn wire_message_kind_labels() {
    assert_eq!(WireMessage::Text(String::new()).kind(), "text");
    assert_eq!(WireMessage::Binary(Vec::new()).kind(), "binary");
}

#[test]
fn duplicate_ack_failure_is_recognized() {
    assert!(AckFailure::new("Duplicate", None).is_duplicate());
    assert!(!AckFailure::new("InternalServerError", None).is_duplicate());
}

#[test]
fn ack_failure_display_includes_message_when_present() {
    let with_message = AckFailure::new("Forbidden", Some("not in group".to_owned()));
    assert_eq!(with_message.to_string(), "Forbidden: not in group");

    let bare = AckFailure::new("Forbidden", Some(String::new()));
    assert_eq!(bare.to_string(), "Forbidden");
}

#[test]
fn message_data_type_labels_match_json_wire() {
    assert_eq!(MessageData::Text(String::new()).data_type(), "text");
    assert_eq!(MessageData::Json(serde_json::Value::Null).data_type(), "json");
    assert_eq!(MessageData::Binary(Vec::new()).data_type(), "binary");
    assert_eq!(
        MessageData::Protobuf(prost_types::Any::default()).data_type(),
        "protobuf"
    );
}

#[test]
fn webpubsub_variants_share_numeric_ack_ids() {
    assert_eq!(JsonCodec::ack_id(17), 17);
    assert_eq!(ProtobufCodec::ack_id(17), 17);
    assert!(JsonCodec::RESUMABLE && ProtobufCodec::RESUMABLE);
    assert_eq!(JsonCodec::CREDENTIAL, Credential::Query("access_token"));
    assert_eq!(JsonCodec::ACK_TIMEOUT, None);
    assert_eq!(ProtobufCodec::ACK_TIMEOUT, None);
}

#[test]
fn codec_errors_render_readable_messages() {
    assert_eq!(
        CodecError::UnexpectedKind("binary").to_string(),
        "unexpected binary frame for this subprotocol"
    );
    assert_eq!(CodecError::Empty.to_string(), "frame carries no message");
}
