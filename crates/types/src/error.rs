//! Unified error type for the tomclient workspace.

use std::time::Duration;
use thiserror::Error;

/// Enumerates all error kinds that can occur across tomclient crates.
///
/// Every message is meant to be shown to the user as-is, so variants carry
/// enough context (URL, endpoint, status, body) to act on without a debugger.
#[derive(Debug, Error)]
pub enum TomError {
    /// Missing or contradictory configuration, caught before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configured OAuth provider name is not one we know how to talk to.
    #[error("unknown OAuth provider '{0}' - must be one of: oidc, google, microsoft")]
    UnsupportedProvider(String),

    /// The OIDC discovery document could not be fetched or is unusable.
    #[error("OIDC discovery failed for {url}: {detail}")]
    Discovery { url: String, detail: String },

    /// The identity provider or the user aborted the browser step.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The callback `state` did not match the one we generated.
    #[error("state mismatch - possible CSRF attack")]
    StateMismatch,

    /// No callback arrived before the deadline.
    #[error("authentication timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The login was cancelled by the caller.
    #[error("authentication cancelled")]
    Cancelled,

    /// The local callback listener could not be bound.
    #[error(
        "cannot listen on localhost:{port} for the OAuth callback: {source}\n\
         set oauth_redirect_port (or TOM_OAUTH_REDIRECT_PORT) to a free port registered with your identity provider"
    )]
    CallbackBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The token endpoint rejected the request or answered with garbage.
    #[error("token request to {endpoint} failed: status={status}, body={body}")]
    Exchange {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// No credential record exists yet.
    #[error("not authenticated - run 'tomclient auth login' first")]
    NotAuthenticated,

    /// The stored credential is stale and could not be refreshed.
    #[error("token expired: {0} - run 'tomclient auth login' again")]
    TokenExpired(String),

    /// File system failure reading or writing the token or config files.
    #[error("storage error: {0}")]
    Storage(String),

    /// The operating system could not supply random bytes.
    #[error("system random source unavailable: {0}")]
    Entropy(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for TomError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TomError>;
