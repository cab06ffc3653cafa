//! Per-provider rules for token requests and authorization URL parameters.
//!
//! Generic OIDC and Microsoft are public clients: the secret is optional and
//! only sent when configured. Google's "desktop app" clients always need it.

use tomclient_types::{ProviderId, Result};

/// Form body for a token endpoint request.
pub type FormParams = Vec<(&'static str, String)>;

/// Capabilities every supported identity provider exposes to the login flow.
pub trait OAuthStrategy: Send + Sync {
    /// Identifier stored with tokens obtained through this provider.
    fn id(&self) -> ProviderId;

    /// Authorization-code + PKCE exchange body.
    fn token_request(
        &self,
        code: &str,
        verifier: &str,
        client_id: &str,
        client_secret: Option<&str>,
        redirect_uri: &str,
    ) -> FormParams;

    /// Refresh-token grant body.
    fn refresh_request(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> FormParams;

    /// Extra query parameters for the authorization URL.
    fn auth_url_params(&self) -> Vec<(&'static str, &'static str)>;

    /// Whether a client secret must be configured before login.
    fn requires_client_secret(&self) -> bool;
}

/// The closed set of supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Oidc,
    /// `offline_access` asks Google for a refresh token via
    /// `access_type=offline&prompt=consent`.
    Google { offline_access: bool },
    Microsoft,
}

impl Provider {
    /// Resolve a configured provider name.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::UnsupportedProvider`](tomclient_types::TomError::UnsupportedProvider)
    /// for unknown names.
    pub fn resolve(name: &str, use_refresh: bool) -> Result<Self> {
        Ok(Self::from_id(name.parse()?, use_refresh))
    }

    #[must_use]
    pub fn from_id(id: ProviderId, use_refresh: bool) -> Self {
        match id {
            ProviderId::Oidc => Self::Oidc,
            ProviderId::Google => Self::Google {
                offline_access: use_refresh,
            },
            ProviderId::Microsoft => Self::Microsoft,
        }
    }

    fn secret_param(self, client_secret: Option<&str>) -> Option<String> {
        let secret = client_secret.filter(|s| !s.is_empty());
        match self {
            Self::Google { .. } => Some(secret.unwrap_or_default().to_string()),
            Self::Oidc | Self::Microsoft => secret.map(str::to_string),
        }
    }
}

impl OAuthStrategy for Provider {
    fn id(&self) -> ProviderId {
        match self {
            Self::Oidc => ProviderId::Oidc,
            Self::Google { .. } => ProviderId::Google,
            Self::Microsoft => ProviderId::Microsoft,
        }
    }

    fn token_request(
        &self,
        code: &str,
        verifier: &str,
        client_id: &str,
        client_secret: Option<&str>,
        redirect_uri: &str,
    ) -> FormParams {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("client_id", client_id.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("code_verifier", verifier.to_string()),
        ];
        if let Some(secret) = self.secret_param(client_secret) {
            params.push(("client_secret", secret));
        }
        params
    }

    fn refresh_request(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> FormParams {
        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", client_id.to_string()),
        ];
        if let Some(secret) = self.secret_param(client_secret) {
            params.push(("client_secret", secret));
        }
        params
    }

    fn auth_url_params(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            Self::Google {
                offline_access: true,
            } => vec![("access_type", "offline"), ("prompt", "consent")],
            _ => Vec::new(),
        }
    }

    fn requires_client_secret(&self) -> bool {
        matches!(self, Self::Google { .. })
    }
}
