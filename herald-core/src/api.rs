//! Shared HTTP plumbing for the provider's endpoints.
//!
//! This module provides:
//! - [`ApiConfig`] - Endpoint URLs, browser-like headers and the request timeout
//! - [`ApiClient`] - A configured `reqwest` client plus a stable device id
//! - [`ContentError`] - Failure taxonomy for data-API calls
//! - GraphQL request/response envelopes and auth-failure classification

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::auth::TokenError;
use crate::error::HeraldError;

/// Cookie carrying the long-lived secret.
pub const SECRET_COOKIE: &str = "refreshToken2";

/// Cookie carrying the short-lived session token.
pub const SESSION_COOKIE: &str = "accessToken2";

/// HTTP statuses from the data API that drop the cached session token.
const INVALIDATING_STATUSES: [u16; 4] = [400, 401, 403, 500];

/// Error type for data-API operations.
#[derive(Debug, Error)]
pub enum ContentError {
    /// No valid session token could be obtained.
    #[error("session unavailable: {0}")]
    Token(#[from] TokenError),

    /// Connection failure or timeout.
    #[error("network error: {message}")]
    Network { message: String },

    /// The API answered with a non-success status.
    #[error("data API returned HTTP {status}")]
    Http { status: u16 },

    /// The API reported application-level errors.
    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    /// The API rejected the session token.
    #[error("session rejected by the provider: {message}; the stored refresh token needs replacing")]
    Auth { message: String },

    /// The caller's subscription does not grant access to this content.
    #[error("content {content_id} is not available with the current subscription")]
    Unavailable { content_id: String },

    /// The response body could not be decoded.
    #[error("malformed API response: {message}")]
    Decode { message: String },

    /// The session token carries no subject claim.
    #[error("session token has no subject claim")]
    MissingSubject,
}

impl ContentError {
    /// Whether the provider rejected the credentials.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth { .. } => true,
            Self::Http { status } => matches!(*status, 401 | 403),
            _ => false,
        }
    }

    /// Whether the cached session token should be dropped after this error.
    pub fn invalidates_session(&self) -> bool {
        match self {
            Self::Auth { .. } => true,
            Self::Http { status } => INVALIDATING_STATUSES.contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ContentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode {
                message: e.to_string(),
            }
        } else {
            Self::Network {
                message: e.to_string(),
            }
        }
    }
}

/// Provider endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// GraphQL data API endpoint.
    pub graphql_url: String,

    /// Session refresh (rotation) endpoint.
    pub refresh_url: String,

    /// `Origin` header sent with every request.
    pub origin: String,

    /// `Referer` header sent with every request.
    pub referer: String,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            graphql_url: "https://svc-prod.herohero.co/graphql/".to_string(),
            refresh_url: "https://svc-prod.herohero.co/auth/v1/oauth/refresh".to_string(),
            origin: "https://herohero.co".to_string(),
            referer: "https://herohero.co/".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
            timeout_secs: 15,
        }
    }
}

impl ApiConfig {
    /// Point both endpoints at a different base URL (used against mock servers).
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            graphql_url: format!("{}/graphql/", base),
            refresh_url: format!("{}/auth/v1/oauth/refresh", base),
            ..Self::default()
        }
    }
}

/// HTTP client for the provider.
///
/// Cheap to share behind an `Arc`; the refresher and both resolvers use
/// the same instance so they present one device id.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ApiConfig,
    graphql_url: Url,
    refresh_url: Url,
    device_id: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Build a client from configuration.
    pub fn new(config: ApiConfig) -> Result<Self, HeraldError> {
        let graphql_url = parse_endpoint("graphql_url", &config.graphql_url)?;
        let refresh_url = parse_endpoint("refresh_url", &config.refresh_url)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HeraldError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            graphql_url,
            refresh_url,
            device_id: URL_SAFE_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes()),
            http,
        })
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Device id sent as `X-Device-Id`; stable for the life of the client.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn with_common_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(ACCEPT, "*/*")
            .header(ORIGIN, &self.config.origin)
            .header(REFERER, &self.config.referer)
            .header(USER_AGENT, &self.config.user_agent)
            .header("X-Device-Id", &self.device_id)
    }

    /// Build the rotation request for a secret.
    pub(crate) fn refresh_request(&self, secret: &str) -> RequestBuilder {
        self.with_common_headers(self.http.post(self.refresh_url.clone()))
            .header(COOKIE, format!("{}={}", SECRET_COOKIE, secret))
            .header(CONTENT_LENGTH, "0")
    }

    /// Run a GraphQL operation authenticated with a session token.
    ///
    /// Non-success statuses become [`ContentError::Http`]; application-level
    /// errors are left in the envelope for [`GraphQlResponse::into_data`].
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        session: &str,
        operation_name: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<GraphQlResponse<T>, ContentError> {
        let body = GraphQlRequest {
            operation_name,
            query,
            variables,
        };

        let response = self
            .with_common_headers(self.http.post(self.graphql_url.clone()))
            .header(CONTENT_TYPE, "application/json")
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, session))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{} failed with HTTP {}", operation_name, status);
            return Err(ContentError::Http {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

fn parse_endpoint(field: &str, value: &str) -> Result<Url, HeraldError> {
    Url::parse(value).map_err(|e| HeraldError::Config {
        message: format!("invalid {} {:?}: {}", field, value, e),
    })
}

/// GraphQL request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a> {
    operation_name: &'a str,
    query: &'a str,
    variables: serde_json::Value,
}

/// GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    /// Operation result.
    pub data: Option<T>,

    /// Application-level errors, if any.
    #[serde(default)]
    pub errors: Option<Vec<GraphQlErrorItem>>,
}

impl<T> GraphQlResponse<T> {
    /// Turn the envelope into its data, classifying any reported errors.
    ///
    /// An error whose message mentions "auth" or whose code is
    /// `UNAUTHENTICATED` becomes [`ContentError::Auth`]; any other error list
    /// becomes [`ContentError::GraphQl`] with the first message.
    pub fn into_data(self) -> Result<Option<T>, ContentError> {
        let errors = self.errors.unwrap_or_default();
        if errors.is_empty() {
            return Ok(self.data);
        }

        if let Some(auth) = errors.iter().find(|e| e.is_auth_failure()) {
            return Err(ContentError::Auth {
                message: auth.message.clone().unwrap_or_default(),
            });
        }

        Err(ContentError::GraphQl {
            message: errors[0].message.clone().unwrap_or_default(),
        })
    }
}

/// A single entry of a GraphQL `errors` list.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorItem {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub extensions: Option<GraphQlErrorExtensions>,
}

/// The `extensions` object of a GraphQL error.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl GraphQlErrorItem {
    fn is_auth_failure(&self) -> bool {
        let by_message = self
            .message
            .as_deref()
            .map(|m| m.to_lowercase().contains("auth"))
            .unwrap_or(false);
        let by_code = self
            .extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            == Some("UNAUTHENTICATED");

        by_message || by_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: serde_json::Value) -> GraphQlResponse<serde_json::Value> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_into_data_without_errors() {
        let data = envelope(serde_json::json!({"data": {"x": 1}, "errors": null}))
            .into_data()
            .unwrap();
        assert_eq!(data.unwrap()["x"], 1);
    }

    #[test]
    fn test_auth_error_by_message() {
        let err = envelope(serde_json::json!({
            "data": null,
            "errors": [{"message": "Not Authorized"}]
        }))
        .into_data()
        .unwrap_err();
        assert!(matches!(err, ContentError::Auth { .. }));
        assert!(err.invalidates_session());
    }

    #[test]
    fn test_auth_error_by_code() {
        let err = envelope(serde_json::json!({
            "errors": [
                {"message": "boom"},
                {"message": "denied", "extensions": {"code": "UNAUTHENTICATED"}}
            ]
        }))
        .into_data()
        .unwrap_err();
        assert!(matches!(err, ContentError::Auth { message } if message == "denied"));
    }

    #[test]
    fn test_generic_error_uses_first_message() {
        let err = envelope(serde_json::json!({
            "errors": [{"message": "first"}, {"message": "second"}]
        }))
        .into_data()
        .unwrap_err();
        assert!(matches!(&err, ContentError::GraphQl { message } if message == "first"));
        assert!(!err.invalidates_session());
    }

    #[test]
    fn test_status_classification() {
        assert!(ContentError::Http { status: 500 }.invalidates_session());
        assert!(!ContentError::Http { status: 500 }.is_auth());
        assert!(ContentError::Http { status: 401 }.is_auth());
        assert!(ContentError::Http { status: 400 }.invalidates_session());
        assert!(!ContentError::Http { status: 404 }.invalidates_session());
        assert!(!ContentError::Http { status: 502 }.invalidates_session());
    }

    #[test]
    fn test_client_rejects_bad_endpoint() {
        let config = ApiConfig {
            graphql_url: "not a url".to_string(),
            ..ApiConfig::default()
        };
        assert!(matches!(ApiClient::new(config), Err(HeraldError::Config { .. })));
    }

    #[test]
    fn test_device_id_is_base64url_of_16_bytes() {
        let client = ApiClient::new(ApiConfig::default()).unwrap();
        assert_eq!(client.device_id().len(), 22);
        assert!(
            client
                .device_id()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
