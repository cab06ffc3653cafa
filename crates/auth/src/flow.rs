//! Interactive OAuth2 authorization-code + PKCE login.
//!
//! One [`OAuthFlow::login`] call walks `Idle → AwaitingCode → Exchanging →
//! Saved`, or ends in `Failed` from any earlier state. Nothing from the
//! session (verifier, CSRF state, endpoints) outlives the call.

use crate::callback::CallbackServer;
use crate::discovery::{self, DiscoveryDocument};
use crate::exchange::request_token;
use crate::pkce;
use crate::provider::{OAuthStrategy, Provider};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tomclient_config::Config;
use tomclient_types::{Result, StoredToken, TokenStore, TomError};

/// How long the user has to finish the browser step.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a login attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingCode,
    Exchanging,
    Saved,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingCode => "awaiting_code",
            Self::Exchanging => "exchanging",
            Self::Saved => "saved",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Opens the authorization URL for the user.
pub trait UrlOpener: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if no browser could be launched.
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Launches the system default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Everything a login needs from the configuration, already validated.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub discovery_url: String,
    pub redirect_port: u16,
    pub scopes: String,
}

impl LoginSettings {
    /// Extract login settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::Config`] if the client ID or discovery URL is
    /// missing or the provider needs a secret that is not set, and
    /// [`TomError::UnsupportedProvider`] for an unknown provider.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = Provider::resolve(&config.oauth_provider, config.oauth_use_refresh)?;
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

        let client_id = non_empty(&config.oauth_client_id).ok_or_else(|| {
            TomError::Config("oauth_client_id is not set (TOM_OAUTH_CLIENT_ID)".into())
        })?;
        let discovery_url = non_empty(&config.oauth_discovery_url).ok_or_else(|| {
            TomError::Config("oauth_discovery_url is not set (TOM_OAUTH_DISCOVERY_URL)".into())
        })?;
        let client_secret = non_empty(&config.oauth_client_secret);
        if provider.requires_client_secret() && client_secret.is_none() {
            return Err(TomError::Config(format!(
                "OAuth provider '{}' requires client_secret but TOM_OAUTH_CLIENT_SECRET is not set",
                provider.id()
            )));
        }

        Ok(Self {
            provider,
            client_id,
            client_secret,
            discovery_url,
            redirect_port: config.oauth_redirect_port,
            scopes: config.oauth_scopes.clone(),
        })
    }
}

struct FlowSession {
    verifier: String,
    challenge: String,
    csrf_state: String,
    discovery: DiscoveryDocument,
}

/// Runs interactive logins against one identity provider.
pub struct OAuthFlow {
    settings: LoginSettings,
    http: reqwest::Client,
    opener: Arc<dyn UrlOpener>,
    timeout: Duration,
    state: Mutex<FlowState>,
}

impl OAuthFlow {
    #[must_use]
    pub fn new(settings: LoginSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            opener: Arc::new(SystemBrowser),
            timeout: DEFAULT_LOGIN_TIMEOUT,
            state: Mutex::new(FlowState::Idle),
        }
    }

    /// Build a flow from configuration.
    ///
    /// # Errors
    ///
    /// See [`LoginSettings::from_config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        LoginSettings::from_config(config).map(Self::new)
    }

    #[must_use]
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.opener = opener;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// State reached by the most recent (or current) login attempt.
    #[must_use]
    pub fn state(&self) -> FlowState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: FlowState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = %*state, to = %next, "login state transition");
        *state = next;
    }

    /// Run one complete login and persist the resulting token in `store`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of discovery, listener bind, the browser
    /// step (provider error, timeout, cancellation, CSRF mismatch), the code
    /// exchange, or the store.
    pub async fn login(
        &self,
        store: &dyn TokenStore,
        cancel: &CancellationToken,
    ) -> Result<StoredToken> {
        self.transition(FlowState::Idle);
        let result = self.run(store, cancel).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "login failed");
            self.transition(FlowState::Failed);
        }
        result
    }

    async fn run(&self, store: &dyn TokenStore, cancel: &CancellationToken) -> Result<StoredToken> {
        let provider = self.settings.provider;
        let (verifier, challenge) = pkce::generate_pkce()?;
        let session = FlowSession {
            verifier,
            challenge,
            csrf_state: pkce::generate_state()?,
            discovery: discovery::discover(&self.http, &self.settings.discovery_url).await?,
        };

        let server = CallbackServer::bind(self.settings.redirect_port).await?;
        let redirect_uri = server.redirect_uri();
        let auth_url = self.authorization_url(&session, &redirect_uri)?;

        self.transition(FlowState::AwaitingCode);
        self.open_browser(&auth_url);
        let params = server.wait(self.timeout, cancel).await?;

        if params.state != session.csrf_state {
            return Err(TomError::StateMismatch);
        }

        self.transition(FlowState::Exchanging);
        let form = provider.token_request(
            &params.code,
            &session.verifier,
            &self.settings.client_id,
            self.settings.client_secret.as_deref(),
            &redirect_uri,
        );
        let response = request_token(&self.http, &session.discovery.token_endpoint, &form).await?;
        let token = store.save_response(&response, provider.id()).await?;

        self.transition(FlowState::Saved);
        tracing::info!(provider = %provider.id(), expires_at = token.expires_at, "token saved");
        Ok(token)
    }

    fn authorization_url(&self, session: &FlowSession, redirect_uri: &str) -> Result<String> {
        let endpoint = &session.discovery.authorization_endpoint;
        let mut url = reqwest::Url::parse(endpoint).map_err(|e| TomError::Discovery {
            url: self.settings.discovery_url.clone(),
            detail: format!("invalid authorization_endpoint '{endpoint}': {e}"),
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("code_challenge", &session.challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("scope", &self.settings.scopes)
                .append_pair("state", &session.csrf_state);
            for (key, value) in self.settings.provider.auth_url_params() {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    fn open_browser(&self, url: &str) {
        eprintln!("Opening browser for authentication:\n  {url}");
        if let Err(e) = self.opener.open(url) {
            tracing::warn!(error = %e, "failed to open browser");
            eprintln!("Could not open a browser automatically.");
            eprintln!("Please open the URL above manually to complete login.");
        }
        eprintln!(
            "Waiting for the callback (timeout {}s)...",
            self.timeout.as_secs()
        );
    }
}
