//! OpenID Connect discovery.
//!
//! The document is fetched once per login or refresh and never cached, so a
//! provider that moves its endpoints is picked up on the next run.

use serde::Deserialize;
use tomclient_types::{Result, TomError};

/// The subset of `/.well-known/openid-configuration` the client uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryDocument {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

impl DiscoveryDocument {
    fn check(self, url: &str) -> Result<Self> {
        for (field, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            if value.trim().is_empty() {
                return Err(TomError::Discovery {
                    url: url.to_string(),
                    detail: format!("discovery document missing {field}"),
                });
            }
        }
        Ok(self)
    }
}

/// Fetch and validate the discovery document at `url`.
///
/// # Errors
///
/// Returns [`TomError::Discovery`] on transport failure, a non-success
/// status, malformed JSON, or a missing mandatory endpoint.
pub async fn discover(http: &reqwest::Client, url: &str) -> Result<DiscoveryDocument> {
    let discovery_err = |detail: String| TomError::Discovery {
        url: url.to_string(),
        detail,
    };

    tracing::debug!(%url, "fetching OIDC discovery document");
    let resp = http
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| discovery_err(e.to_string()))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| discovery_err(format!("failed to read response body: {e}")))?;
    if !status.is_success() {
        return Err(discovery_err(format!("status={}, body={body}", status.as_u16())));
    }

    let doc: DiscoveryDocument = serde_json::from_str(&body)
        .map_err(|e| discovery_err(format!("invalid discovery document: {e}")))?;
    doc.check(url)
}
