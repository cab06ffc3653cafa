//! Attaches the configured credential to outgoing broker requests.
//!
//! Responsibilities:
//! - `none`: leave the request untouched.
//! - `api_key`: set the configured header.
//! - `jwt`: load the stored token, refresh it once if it is stale and a
//!   refresh token is available, and send it as a bearer.
use crate::discovery;
use crate::exchange::request_token;
use crate::provider::{OAuthStrategy, Provider};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use std::sync::Arc;
use tomclient_config::{AuthMode, Config};
use tomclient_types::{Result, StoredToken, TokenState, TokenStore, TomError};

/// Something that can authenticate an outgoing HTTP request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Add credentials to `req`.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable credential can be produced.
    async fn add_auth(&self, req: &mut reqwest::Request) -> Result<()>;
}

/// [`AuthProvider`] driven by the client configuration.
pub struct CliAuthProvider {
    config: Config,
    store: Arc<dyn TokenStore>,
    http: reqwest::Client,
}

impl CliAuthProvider {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn TokenStore>) -> Self {
        Self {
            config,
            store,
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Retrieve a usable bearer value, refreshing at most once.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::NotAuthenticated`] without a stored token and
    /// [`TomError::TokenExpired`] when the token is stale and cannot be
    /// refreshed.
    pub async fn bearer(&self) -> Result<String> {
        let token = self.store.load_required().await?;

        let token = match token.state() {
            TokenState::Valid => token,
            TokenState::Expired if self.config.oauth_use_refresh => {
                tracing::debug!("stored token is stale, attempting refresh");
                refresh_with(&self.config, self.store.as_ref(), &self.http, &token)
                    .await
                    .map_err(|e| TomError::TokenExpired(format!("refresh failed: {e}")))?
            }
            TokenState::Expired => {
                return Err(TomError::TokenExpired(
                    "refresh is disabled (oauth_use_refresh)".into(),
                ));
            }
            TokenState::Invalid => {
                return Err(TomError::TokenExpired("no refresh token available".into()));
            }
        };

        if !token.is_valid() {
            return Err(TomError::TokenExpired(
                "refreshed token is not usable".into(),
            ));
        }
        token
            .usable_credential()
            .map(str::to_string)
            .ok_or_else(|| TomError::TokenExpired("stored token has no usable credential".into()))
    }
}

#[async_trait]
impl AuthProvider for CliAuthProvider {
    async fn add_auth(&self, req: &mut reqwest::Request) -> Result<()> {
        match self.config.auth_mode {
            AuthMode::None => Ok(()),
            AuthMode::ApiKey => {
                let key = self
                    .config
                    .api_key
                    .as_deref()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        TomError::Config("auth_mode is 'api_key' but no API key is set".into())
                    })?;
                let name = HeaderName::from_bytes(self.config.api_key_header().as_bytes())
                    .map_err(|e| TomError::Config(format!("invalid api_key_header: {e}")))?;
                let mut value = HeaderValue::from_str(key)
                    .map_err(|e| TomError::Config(format!("invalid API key: {e}")))?;
                value.set_sensitive(true);
                req.headers_mut().insert(name, value);
                Ok(())
            }
            AuthMode::Jwt => {
                let bearer = self.bearer().await?;
                let mut value = HeaderValue::from_str(&format!("Bearer {bearer}"))
                    .map_err(|e| TomError::TokenExpired(format!("stored token is malformed: {e}")))?;
                value.set_sensitive(true);
                req.headers_mut().insert(AUTHORIZATION, value);
                Ok(())
            }
        }
    }
}

/// Force one refresh round for the stored token, regardless of its validity.
///
/// # Errors
///
/// Returns [`TomError::NotAuthenticated`] without a stored token,
/// [`TomError::TokenExpired`] without a live refresh token, and discovery or
/// exchange errors from the refresh request itself.
pub async fn refresh(
    config: &Config,
    store: &dyn TokenStore,
    http: &reqwest::Client,
) -> Result<StoredToken> {
    let token = store.load_required().await?;
    refresh_with(config, store, http, &token).await
}

async fn refresh_with(
    config: &Config,
    store: &dyn TokenStore,
    http: &reqwest::Client,
    token: &StoredToken,
) -> Result<StoredToken> {
    let refresh_token = token
        .refresh_token
        .as_deref()
        .filter(|_| token.can_refresh_at(tomclient_types::token::unix_now()))
        .ok_or_else(|| TomError::TokenExpired("no valid refresh token available".into()))?;
    let client_id = config
        .oauth_client_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TomError::Config("oauth_client_id is not set (TOM_OAUTH_CLIENT_ID)".into()))?;
    let discovery_url = config
        .oauth_discovery_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            TomError::Config("oauth_discovery_url is not set (TOM_OAUTH_DISCOVERY_URL)".into())
        })?;

    // Tokens remember who issued them; the configured provider is the fallback.
    let provider = match token.provider {
        Some(id) => Provider::from_id(id, config.oauth_use_refresh),
        None => Provider::resolve(&config.oauth_provider, config.oauth_use_refresh)?,
    };

    let doc = discovery::discover(http, discovery_url).await?;
    let form = provider.refresh_request(
        refresh_token,
        client_id,
        config.oauth_client_secret.as_deref(),
    );
    let response = request_token(http, &doc.token_endpoint, &form).await?;
    let refreshed = store.save_response(&response, provider.id()).await?;
    tracing::info!(provider = %provider.id(), expires_at = refreshed.expires_at, "token refreshed");
    Ok(refreshed)
}
