//! Websocket handshake and message conversion.
//!
//! Credential placement and the offered subprotocol come from the codec; this
//! module only turns them into a handshake request and bounds the open.

use std::time::Duration;

use frames::{Codec, Credential, WireMessage};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parse a negotiated endpoint.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    let url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint {
        url: endpoint.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ClientError::InvalidEndpoint {
            url: endpoint.to_owned(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

/// Build the handshake for `url`, placing `credential` where codec `C`
/// expects it.
pub(crate) fn handshake_request<C: Codec>(
    url: &Url,
    credential: Option<&str>,
) -> Result<Request, ClientError> {
    let mut url = url.clone();
    let mut protocols = C::SUBPROTOCOL.to_owned();
    match (C::CREDENTIAL, credential) {
        (Credential::Query(name), Some(token)) => {
            url.query_pairs_mut().append_pair(name, token);
        }
        (Credential::SubprotocolPrefix(prefix), Some(token)) => {
            protocols = format!("{protocols}, {prefix}{token}");
        }
        (_, None) => {}
    }

    let invalid = |reason: String| ClientError::InvalidEndpoint {
        url: url.to_string(),
        reason,
    };
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    let protocols = HeaderValue::from_str(&protocols).map_err(|e| invalid(e.to_string()))?;
    request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocols);
    Ok(request)
}

/// Open a websocket, bounded by `timeout`.
pub(crate) async fn open(request: Request, timeout: Duration) -> Result<WsStream, ClientError> {
    let connect = tokio_tungstenite::connect_async(request);
    let (stream, _response) = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| ClientError::ConnectTimeout(timeout.as_secs()))?
        .map_err(Box::new)?;
    Ok(stream)
}

pub(crate) fn to_ws(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text.into()),
        WireMessage::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

/// Application-level content of a websocket message. Control frames yield
/// `None`.
pub(crate) fn from_ws(message: &Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => Some(WireMessage::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(WireMessage::Binary(bytes.to_vec())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

pub(crate) fn close_message(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}

/// Close code carried by a close frame, if any.
pub(crate) fn close_code(frame: Option<&CloseFrame>) -> Option<u16> {
    frame.map(|f| u16::from(f.code))
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
