//! Endpoint negotiation providers.
//!
//! A [`Negotiator`] is called before every fresh connect (never before a
//! resume) and yields the websocket endpoint plus the credential that goes
//! with it. Credential placement is decided by the codec, not here.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;

/// Result of a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    /// Websocket endpoint, without resume parameters.
    pub endpoint: String,
    /// Access credential, when the endpoint does not already embed one.
    pub credential: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiateError {
    #[error("negotiate request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("negotiate response missing `{0}`")]
    MissingField(&'static str),
}

/// Source of connection endpoints and credentials.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn negotiate(&self) -> Result<Negotiated, NegotiateError>;
}

// =============================================================================
// HTTP
// =============================================================================

/// Negotiates by calling an HTTP endpoint with an optional bearer token.
///
/// Accepts either `{"baseUrl": "...", "token": "..."}` or a ready-made
/// `{"url": "..."}` response body.
#[derive(Clone, Debug)]
pub struct HttpNegotiator {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateBody {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl HttpNegotiator {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            bearer: None,
        }
    }

    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn negotiate(&self) -> Result<Negotiated, NegotiateError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            request = request.header(AUTHORIZATION, value);
        }

        let body = request
            .send()
            .await?
            .error_for_status()?
            .json::<NegotiateBody>()
            .await?;
        negotiated_from_body(body)
    }
}

fn negotiated_from_body(body: NegotiateBody) -> Result<Negotiated, NegotiateError> {
    match (body.base_url, body.url) {
        (Some(endpoint), _) => Ok(Negotiated {
            endpoint,
            credential: Some(body.token.ok_or(NegotiateError::MissingField("token"))?),
        }),
        (None, Some(endpoint)) => Ok(Negotiated {
            endpoint,
            credential: body.token,
        }),
        (None, None) => Err(NegotiateError::MissingField("baseUrl")),
    }
}

// =============================================================================
// STATIC
// =============================================================================

/// Fixed endpoint and credential, for deployments that hand out a long-lived
/// token up front.
#[derive(Clone, Debug)]
pub struct StaticNegotiator {
    negotiated: Negotiated,
}

impl StaticNegotiator {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            negotiated: Negotiated {
                endpoint: endpoint.into(),
                credential,
            },
        }
    }
}

#[async_trait]
impl Negotiator for StaticNegotiator {
    async fn negotiate(&self) -> Result<Negotiated, NegotiateError> {
        Ok(self.negotiated.clone())
    }
}

#[cfg(test)]
#[path = "negotiate_test.rs"]
mod tests;
