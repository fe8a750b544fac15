use std::collections::HashMap;

use chrono::{TimeDelta, Utc};
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use url::Url;
use uuid::Uuid;

use crate::api::{self, Endpoint};
use crate::error::{Error, Result};
use crate::scope;
use crate::types::{TokenErrorResponse, TokenRecord, TokenResponse};

pub const DEFAULT_BASE_URL: &str = "https://developer.home-connect.com";
pub const DEFAULT_REDIRECT_URL: &str = "https://apiclient.home-connect.com/o2c.html";
pub const DEFAULT_SCOPE: &str = "IdentifyAppliance Monitor";

/// Body handed back for `204 No Content` replies, so callers always get JSON.
pub const NO_CONTENT_BODY: &str = r#"{"data":"OK"}"#;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Static configuration of a [`Session`].
///
/// ```rust,ignore
/// let config = SessionConfig::new("my-client-id")
///     .with_base_url("https://simulator.home-connect.com")
///     .with_scope("IdentifyAppliance Monitor *-Control");
/// let session = Session::new(config)?;
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    client_id: String,
    base_url: String,
    redirect_url: String,
    scope: String,
    http: Option<reqwest::Client>,
}

impl SessionConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            http: None,
        }
    }

    /// Base URL without the trailing `/`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = redirect_url.into();
        self
    }

    /// Space separated scopes, checked when the session is created.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Use a custom HTTP client, e.g. one with request timeouts.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }
}

/// Where the session stands in the OAuth2 flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    /// An authorization URL (and its nonce) has been handed out
    Authorizing,
    /// An authorization code was received but not exchanged yet
    TokenPending,
    Authenticated,
    Refreshing,
}

/// Lifecycle notifications emitted by a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TokensAvailable(TokenRecord),
    TokensInvalid,
}

#[derive(Debug, Default)]
struct AuthData {
    access_token: Option<String>,
    refresh_token: Option<String>,
    nonce: Option<String>,
    state: AuthState,
}

enum Grant<'a> {
    Code(&'a str),
    Refresh(&'a str),
}

enum Reply {
    Body(String),
    Unauthorized(Value),
}

/// OAuth2 session against the Home Connect API.
///
/// Owns the tokens and is the only way appliance operations reach the
/// network. Share it as `Arc<Session>`.
pub struct Session {
    http: reqwest::Client,
    client_id: String,
    base_url: String,
    redirect_url: String,
    scope: String,
    auth: RwLock<AuthData>,
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let scope = scope::validate(&config.scope)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            http: config.http.unwrap_or_default(),
            client_id: config.client_id,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            redirect_url: config.redirect_url,
            scope,
            auth: RwLock::new(AuthData::default()),
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Receive token lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn auth_state(&self) -> AuthState {
        self.auth.read().await.state
    }

    pub async fn access_token(&self) -> Option<String> {
        self.auth.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.auth.read().await.refresh_token.clone()
    }

    /// Use tokens obtained earlier, e.g. loaded from disk.
    pub async fn set_tokens(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        let mut auth = self.auth.write().await;
        auth.access_token = Some(access_token.into());
        auth.refresh_token = Some(refresh_token.into());
        auth.state = AuthState::Authenticated;
    }

    /// Absolute URL of an endpoint with its placeholders filled in.
    pub fn endpoint_url(&self, endpoint: Endpoint, params: &[(&str, &str)]) -> String {
        format!("{}{}", self.base_url, api::expand_url(endpoint.template, params))
    }

    /// Build the URL the user has to visit to grant access.
    ///
    /// Every call issues a new `state` nonce and forgets the previous one.
    pub async fn authorization_url(&self) -> Result<String> {
        let nonce = Uuid::new_v4().simple().to_string();
        let mut url = Url::parse(&format!("{}{}", self.base_url, api::AUTHORIZE_PATH))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scope)
            .append_pair("state", &nonce);

        let mut auth = self.auth.write().await;
        auth.nonce = Some(nonce);
        auth.state = AuthState::Authorizing;
        Ok(url.into())
    }

    /// Run the authorization round trip and return the authorization code.
    ///
    /// Without `auth_url` the URL from [`Session::authorization_url`] is used.
    /// Redirects are followed and the code is read from the final URL.
    pub async fn authorize(&self, auth_url: Option<&str>) -> Result<String> {
        let url = match auth_url {
            Some(url) => url.to_string(),
            None => self.authorization_url().await?,
        };

        debug!("Requesting authorization code");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            self.auth.write().await.state = AuthState::Unauthenticated;
            return Err(Error::AuthorizationFailed(format!("Invalid response {}", status)));
        }

        let params: HashMap<String, String> = response.url().query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            self.auth.write().await.state = AuthState::Unauthenticated;
            let detail = match params.get("error_description") {
                Some(description) => format!("{} ({})", error, description),
                None => error.clone(),
            };
            return Err(Error::AuthorizationFailed(detail));
        }

        let code = match params.get("code") {
            Some(code) => code.clone(),
            None => {
                self.auth.write().await.state = AuthState::Unauthenticated;
                return Err(Error::AuthorizationFailed(format!(
                    "No authorization code in redirect to {}",
                    response.url()
                )));
            }
        };

        let mut auth = self.auth.write().await;
        if let Some(expected) = auth.nonce.take() {
            let received = params.get("state").cloned();
            if received.as_deref() != Some(expected.as_str()) {
                warn!("Authorization state mismatch, discarding code");
                auth.state = AuthState::Unauthenticated;
                return Err(Error::InvalidState { expected, received });
            }
        }
        auth.state = AuthState::TokenPending;

        debug!("Authorization code received");
        Ok(code)
    }

    /// Exchange an authorization code for access and refresh tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord> {
        self.request_tokens(Grant::Code(code)).await
    }

    /// Authorize and exchange the code in one go.
    pub async fn login(&self, auth_url: Option<&str>) -> Result<TokenRecord> {
        let code = self.authorize(auth_url).await?;
        self.exchange_code(&code).await
    }

    /// Trade the stored refresh token for a new token pair.
    pub async fn refresh(&self) -> Result<TokenRecord> {
        info!("Refreshing access token");
        let refresh_token = self.auth.read().await.refresh_token.clone();
        let Some(refresh_token) = refresh_token else {
            self.invalidate().await;
            return Err(Error::TokenExchangeFailed(
                "No refresh token available".to_string(),
            ));
        };

        self.auth.write().await.state = AuthState::Refreshing;
        self.request_tokens(Grant::Refresh(&refresh_token)).await
    }

    /// Refresh unless the access token changed since `used_token` was read,
    /// in which case someone else already refreshed it.
    pub(crate) async fn refresh_if_stale(&self, used_token: &str) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        if self.auth.read().await.access_token.as_deref() != Some(used_token) {
            debug!("Access token already refreshed by another request");
            return Ok(());
        }
        self.refresh().await.map(|_| ())
    }

    async fn request_tokens(&self, grant: Grant<'_>) -> Result<TokenRecord> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_url.as_str()),
        ];
        match grant {
            Grant::Code(code) => {
                form.push(("grant_type", "authorization_code"));
                form.push(("code", code));
            }
            Grant::Refresh(token) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", token));
            }
        }

        let requested = Utc::now();
        let sent = self
            .http
            .post(format!("{}{}", self.base_url, api::TOKEN_PATH))
            .form(&form)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                self.restore_state().await;
                return Err(err.into());
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                self.restore_state().await;
                return Err(err.into());
            }
        };

        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|err| err.message())
                .unwrap_or_else(|| format!("Invalid response {}", status));
            warn!("Token request failed: {}", message);
            self.invalidate().await;
            return Err(Error::TokenExchangeFailed(message));
        }

        let parsed = serde_json::from_str::<TokenResponse>(&body).ok();
        let Some(TokenResponse {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            expires_in,
            token_type,
            scope,
        }) = parsed
        else {
            warn!("Token response is missing tokens");
            self.invalidate().await;
            return Err(Error::TokenExchangeFailed("Invalid reply".to_string()));
        };

        let lifetime = TimeDelta::try_seconds(expires_in.unwrap_or(0)).unwrap_or_else(TimeDelta::zero);
        let record = TokenRecord {
            access_token,
            refresh_token,
            token_type,
            scope,
            requested,
            expires: requested + lifetime,
        };

        {
            let mut auth = self.auth.write().await;
            auth.access_token = Some(record.access_token.clone());
            auth.refresh_token = Some(record.refresh_token.clone());
            auth.state = AuthState::Authenticated;
        }

        info!("New tokens received, valid until {}", record.expires);
        let _ = self.events.send(SessionEvent::TokensAvailable(record.clone()));
        Ok(record)
    }

    async fn invalidate(&self) {
        self.auth.write().await.state = AuthState::Unauthenticated;
        let _ = self.events.send(SessionEvent::TokensInvalid);
    }

    async fn restore_state(&self) {
        let mut auth = self.auth.write().await;
        auth.state = if auth.access_token.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
    }

    /// Send an authenticated call to `endpoint` and return the response body.
    ///
    /// A `401` triggers one token refresh and one retransmission of the
    /// same request. `204` yields [`NO_CONTENT_BODY`].
    pub async fn authenticated_request(
        &self,
        endpoint: Endpoint,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<String> {
        let token = self.access_token().await.ok_or(Error::NoToken)?;
        let url = self.endpoint_url(endpoint, params);

        match self.send(endpoint, &url, &token, body).await? {
            Reply::Body(text) => Ok(text),
            Reply::Unauthorized(_) => {
                info!("Access token rejected by {}, refreshing", url);
                self.refresh_if_stale(&token).await?;
                let token = self.access_token().await.ok_or(Error::NoToken)?;
                match self.send(endpoint, &url, &token, body).await? {
                    Reply::Body(text) => Ok(text),
                    Reply::Unauthorized(detail) => Err(Error::api(401, detail)),
                }
            }
        }
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Reply> {
        debug!("{:?} {}", endpoint.method, url);

        let mut request = self
            .http
            .request(endpoint.method.as_reqwest(), url)
            .bearer_auth(token)
            .header(ACCEPT, api::MEDIA_TYPE)
            .header(CONTENT_TYPE, api::MEDIA_TYPE);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Reply::Body(NO_CONTENT_BODY.to_string()));
        }

        let text = response.text().await?;
        match status {
            StatusCode::OK => Ok(Reply::Body(text)),
            StatusCode::UNAUTHORIZED => Ok(Reply::Unauthorized(parse_detail(&text))),
            other => {
                debug!("Request to {} failed with {}: {}", url, other, text);
                Err(Error::api(other.as_u16(), parse_detail(&text)))
            }
        }
    }
}

/// Best-effort JSON decoding of an error body; falls back to the raw text.
pub(crate) fn parse_detail(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionConfig::new("client123").with_base_url("https://example.com/")).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let session = Session::new(SessionConfig::new("client123")).unwrap();
        assert_eq!(session.base_url(), DEFAULT_BASE_URL);
        assert_eq!(session.redirect_url(), DEFAULT_REDIRECT_URL);
        assert_eq!(session.scope(), DEFAULT_SCOPE);
        assert_eq!(session.client_id(), "client123");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(session().base_url(), "https://example.com");
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let result = Session::new(SessionConfig::new("client123").with_scope("Monitor Bogus"));
        assert!(matches!(result, Err(Error::UnknownScope(token)) if token == "Bogus"));
    }

    #[tokio::test]
    async fn test_authorization_url_parameters() {
        let session = session();
        let url = Url::parse(&session.authorization_url().await.unwrap()).unwrap();
        assert_eq!(url.path(), "/security/oauth/authorize");

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client123");
        assert_eq!(params["redirect_uri"], DEFAULT_REDIRECT_URL);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], DEFAULT_SCOPE);
        assert_eq!(params["state"].len(), 32);
        assert_eq!(session.auth_state().await, AuthState::Authorizing);
    }

    #[tokio::test]
    async fn test_each_authorization_url_gets_fresh_nonce() {
        let session = session();
        let first = Url::parse(&session.authorization_url().await.unwrap()).unwrap();
        let second = Url::parse(&session.authorization_url().await.unwrap()).unwrap();
        let state = |url: &Url| {
            url.query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        assert_ne!(state(&first), state(&second));
        assert_eq!(
            session.auth.read().await.nonce.as_deref(),
            Some(state(&second).as_str())
        );
    }

    #[tokio::test]
    async fn test_request_without_token_fails_fast() {
        let result = session()
            .authenticated_request(api::APPLIANCES, &[], None)
            .await;
        assert!(matches!(result, Err(Error::NoToken)));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_invalidates() {
        let session = session();
        let mut events = session.subscribe();
        let result = session.refresh().await;
        assert!(matches!(result, Err(Error::TokenExchangeFailed(_))));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::TokensInvalid);
    }

    #[tokio::test]
    async fn test_set_tokens() {
        let session = session();
        session.set_tokens("access", "refresh").await;
        assert_eq!(session.access_token().await.as_deref(), Some("access"));
        assert_eq!(session.refresh_token().await.as_deref(), Some("refresh"));
        assert_eq!(session.auth_state().await, AuthState::Authenticated);
    }

    #[test]
    fn test_endpoint_url() {
        let url = session().endpoint_url(api::STATUS, &[("haid", "ABC")]);
        assert_eq!(url, "https://example.com/api/homeappliances/ABC/status");
    }

    #[test]
    fn test_parse_detail_falls_back_to_text() {
        assert_eq!(parse_detail(r#"{"error":{"key":"x"}}"#)["error"]["key"], "x");
        assert_eq!(parse_detail("<html>oops</html>"), Value::String("<html>oops</html>".into()));
    }
}
