//! Reconnection policy: which closes resume the session, and how a resume
//! handshake addresses the server.
//!
//! DESIGN
//! ======
//! The policy is a pure function of the close code, who initiated the close,
//! and what the session holds. The connection manager owns the timing (fixed
//! delay, unbounded retries) and applies the decision.
//!
//! CLOSE CODES
//! ===========
//! - `1000`: normal. Sent by `close()` and when a fresh connect replaces a link.
//! - `1008`: the server refuses resumption. Always terminal.
//! - `3001`: client forced reset (`abort()`), used by the ack deadline.

use reqwest::Url;

use crate::session::ResumeInfo;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_CLIENT_ABORT: u16 = 3001;

/// Code reported when the transport dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Query parameters a resume handshake carries.
pub const RESUME_CONNECTION_ID: &str = "awps_connection_id";
pub const RESUME_TOKEN: &str = "awps_reconnection_token";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseDecision {
    /// Keep the session and reattach after the reconnect delay.
    Resume,
    /// Drop to `Disconnected` and surface the close.
    Disconnect,
}

/// Decide what a transport close means for the session.
#[must_use]
pub fn decide(
    code: u16,
    closed_by_client: bool,
    resumable: bool,
    has_resume: bool,
) -> CloseDecision {
    if closed_by_client || code == CLOSE_POLICY_VIOLATION || !resumable || !has_resume {
        CloseDecision::Disconnect
    } else {
        CloseDecision::Resume
    }
}

/// Address of a resume handshake: the negotiated endpoint with its query
/// replaced by the session's resume credentials.
#[must_use]
pub fn resume_url(endpoint: &Url, resume: &ResumeInfo) -> Url {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair(RESUME_CONNECTION_ID, &resume.connection_id)
        .append_pair(RESUME_TOKEN, &resume.reconnection_token);
    url
}

/// Human-readable reason for a close, reported with `Disconnected`.
#[must_use]
pub fn describe_close(code: u16) -> String {
    match code {
        CLOSE_NORMAL => "connection closed".to_owned(),
        CLOSE_POLICY_VIOLATION => "server refused to resume the session (1008)".to_owned(),
        CLOSE_CLIENT_ABORT => "connection reset by client (3001)".to_owned(),
        CLOSE_ABNORMAL => "connection lost".to_owned(),
        other => format!("connection closed with code {other}"),
    }
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
