//! Connection authentication.
//!
//! Tokens arrive as the `token` query parameter of the upgrade request and
//! are verified before the upgrade is accepted, so a rejected peer never
//! reaches the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::AuthConfig;

/// Verified identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated user.
    pub user_id: String,
}

impl Identity {
    /// Creates an identity for `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token on the request.
    #[error("missing token")]
    MissingToken,

    /// The provider rejected the token.
    #[error("invalid token")]
    InvalidToken,

    /// The provider could not be reached or answered unexpectedly.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl AuthError {
    /// HTTP status returned instead of the upgrade.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// A source of truth for tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Verifies `token` and returns the identity it belongs to.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Verifies tokens against an HTTP endpoint.
///
/// The token is sent as `Authorization: Bearer <token>`. A 2xx answer must
/// carry `{"userId": "..."}`; 401 and 403 mean the token is invalid.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    verify_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(rename = "userId", alias = "user_id")]
    user_id: String,
}

impl HttpIdentityProvider {
    /// Creates a provider with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(verify_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            verify_url: verify_url.into(),
        })
    }

    /// Returns the verification endpoint.
    #[must_use]
    pub fn verify_url(&self) -> &str {
        &self.verify_url
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .get(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            return Err(AuthError::ProviderUnavailable(format!(
                "unexpected status {}",
                status.as_u16()
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(e.to_string()))?;

        if body.user_id.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(Identity::new(body.user_id))
    }
}

/// Fixed token to user mapping.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    /// Creates a provider from `(token, user)` pairs.
    #[must_use]
    pub fn new<I, T, U>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token.into(), user.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .map(Identity::new)
            .ok_or(AuthError::InvalidToken)
    }
}

/// Authenticates upgrade requests through one [`IdentityProvider`].
#[derive(Clone)]
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator backed by `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Builds the provider described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP provider cannot be constructed.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let provider: Arc<dyn IdentityProvider> = match config {
            AuthConfig::Http {
                verify_url,
                timeout_ms,
            } => Arc::new(HttpIdentityProvider::new(
                verify_url.clone(),
                Duration::from_millis(*timeout_ms),
            )?),
            AuthConfig::Static { tokens } => Arc::new(StaticTokenProvider::new(tokens.clone())),
        };
        Ok(Self::new(provider))
    }

    /// Verifies the token carried by an upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingToken`] for an absent or blank token
    /// without consulting the provider, otherwise the provider's verdict.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let identity = self.provider.verify(token).await?;
        debug!(user_id = %identity.user_id, "token verified");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;

    #[derive(Debug, Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        async fn verify(&self, _token: &str) -> Result<Identity, AuthError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Identity::new("counted"))
        }
    }

    async fn verify_endpoint(headers: HeaderMap) -> axum::response::Response {
        use axum::response::IntoResponse;

        match headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        {
            Some("Bearer good") => Json(serde_json::json!({"userId": "alice"})).into_response(),
            Some("Bearer snake") => Json(serde_json::json!({"user_id": "bob"})).into_response(),
            Some("Bearer broken") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Some("Bearer banned") => StatusCode::FORBIDDEN.into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    async fn spawn_identity_service() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = Router::new().route("/verify", get(verify_endpoint));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/verify")
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(AuthError::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::ProviderUnavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new([("t1", "u1")]);
        assert_eq!(provider.verify("t1").await, Ok(Identity::new("u1")));
        assert_eq!(provider.verify("t2").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_authenticator_rejects_missing_token_without_provider() {
        let provider = Arc::new(CountingProvider::default());
        let auth = Authenticator::new(Arc::clone(&provider) as Arc<dyn IdentityProvider>);

        assert_eq!(auth.authenticate(None).await, Err(AuthError::MissingToken));
        assert_eq!(auth.authenticate(Some("  ")).await, Err(AuthError::MissingToken));
        assert_eq!(provider.calls.load(Ordering::Relaxed), 0);

        assert!(auth.authenticate(Some("x")).await.is_ok());
        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_authenticator_from_static_config() {
        let config = AuthConfig::Static {
            tokens: BTreeMap::from([("secret".to_string(), "carol".to_string())]),
        };
        let auth = Authenticator::from_config(&config).expect("authenticator");
        let identity = auth.authenticate(Some("secret")).await.expect("identity");
        assert_eq!(identity.user_id, "carol");
    }

    #[tokio::test]
    async fn test_http_provider_accepts_valid_token() {
        let url = spawn_identity_service().await;
        let provider = HttpIdentityProvider::new(url, Duration::from_secs(2)).expect("provider");

        assert_eq!(provider.verify("good").await, Ok(Identity::new("alice")));
        assert_eq!(provider.verify("snake").await, Ok(Identity::new("bob")));
    }

    #[tokio::test]
    async fn test_http_provider_rejects_invalid_token() {
        let url = spawn_identity_service().await;
        let provider = HttpIdentityProvider::new(url, Duration::from_secs(2)).expect("provider");

        assert_eq!(provider.verify("nope").await, Err(AuthError::InvalidToken));
        assert_eq!(provider.verify("banned").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_http_provider_unavailable() {
        let url = spawn_identity_service().await;
        let provider = HttpIdentityProvider::new(url, Duration::from_secs(2)).expect("provider");
        let err = provider.verify("broken").await.expect_err("error");
        assert!(matches!(err, AuthError::ProviderUnavailable(_)));

        let provider = HttpIdentityProvider::new("http://127.0.0.1:1/verify", Duration::from_secs(2))
            .expect("provider");
        let err = provider.verify("good").await.expect_err("error");
        assert!(matches!(err, AuthError::ProviderUnavailable(_)));
    }
}
