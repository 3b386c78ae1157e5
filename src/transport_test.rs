use super::*;
use frames::{ChatCodec, JsonCodec, ProtobufCodec};

fn protocol_header(request: &Request) -> &str {
    request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .expect("subprotocol header")
}

#[test]
fn parse_endpoint_accepts_websocket_schemes() {
    assert!(parse_endpoint("ws://localhost:8080/ws").is_ok());
    assert!(parse_endpoint("wss://hub.example/client").is_ok());
}

#[test]
fn parse_endpoint_rejects_other_schemes_and_garbage() {
    let err = parse_endpoint("https://hub.example").expect_err("http scheme");
    assert!(matches!(err, ClientError::InvalidEndpoint { ref reason, .. } if reason.contains("https")));
    assert!(parse_endpoint("not a url").is_err());
}

#[test]
fn query_credential_is_appended_as_access_token() {
    let url = parse_endpoint("wss://hub.example/client/hubs/chat").expect("url");
    let request = handshake_request::<JsonCodec>(&url, Some("abc")).expect("request");
    assert_eq!(
        request.uri().to_string(),
        "wss://hub.example/client/hubs/chat?access_token=abc"
    );
    assert_eq!(protocol_header(&request), "json.reliable.webpubsub.azure.v1");
}

#[test]
fn missing_credential_leaves_url_untouched() {
    let url = parse_endpoint("ws://localhost/ws?awps_connection_id=c").expect("url");
    let request = handshake_request::<ProtobufCodec>(&url, None).expect("request");
    assert_eq!(request.uri().to_string(), "ws://localhost/ws?awps_connection_id=c");
    assert_eq!(
        protocol_header(&request),
        "protobuf.reliable.webpubsub.azure.v1"
    );
}

#[test]
fn subprotocol_credential_is_offered_as_second_protocol() {
    let url = parse_endpoint("wss://chat.example/ws").expect("url");
    let request = handshake_request::<ChatCodec>(&url, Some("jwt123")).expect("request");
    assert_eq!(request.uri().to_string(), "wss://chat.example/ws");
    assert_eq!(
        protocol_header(&request),
        "realtime.looki.v1, looki-jwt-jwt123"
    );
}

#[test]
fn header_unsafe_credential_is_rejected() {
    let url = parse_endpoint("wss://chat.example/ws").expect("url");
    let err = handshake_request::<ChatCodec>(&url, Some("bad\ntoken")).expect_err("newline");
    assert!(matches!(err, ClientError::InvalidEndpoint { .. }));
}

#[test]
fn wire_messages_convert_both_ways() {
    let text = to_ws(WireMessage::Text("hi".to_owned()));
    assert_eq!(from_ws(&text), Some(WireMessage::Text("hi".to_owned())));

    let binary = to_ws(WireMessage::Binary(vec![1, 2]));
    assert_eq!(from_ws(&binary), Some(WireMessage::Binary(vec![1, 2])));

    assert_eq!(from_ws(&Message::Ping(Vec::new().into())), None);
}

#[test]
fn close_message_carries_code() {
    let Message::Close(frame) = close_message(3001) else {
        panic!("expected close message");
    };
    assert_eq!(close_code(frame.as_ref()), Some(3001));
    assert_eq!(close_code(None), None);
}
