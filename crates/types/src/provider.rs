//! OAuth provider identifiers and their bearer-token preference.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a supported OIDC identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Any standards-compliant OIDC provider (Duo, Keycloak, Okta, ...).
    Oidc,
    Google,
    Microsoft,
}

/// Which token from a credential record is sent as the bearer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerPreference {
    /// Send the ID token only; validity follows its `exp` claim.
    IdToken,
    /// Send the access token, falling back to the ID token.
    AccessThenId,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oidc => write!(f, "oidc"),
            Self::Google => write!(f, "google"),
            Self::Microsoft => write!(f, "microsoft"),
        }
    }
}

impl std::str::FromStr for ProviderId {
    type Err = crate::TomError;

    /// Parse a provider name; the empty string means generic OIDC.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::UnsupportedProvider`](crate::TomError::UnsupportedProvider)
    /// for any other name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oidc" | "" => Ok(Self::Oidc),
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            other => Err(crate::TomError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl ProviderId {
    /// Returns all known provider variants.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::Oidc, Self::Google, Self::Microsoft]
    }

    /// The token the broker expects from this provider.
    ///
    /// The broker validates the token's audience against this client's ID,
    /// which only the ID token carries for all three providers: Google access
    /// tokens are opaque, and Microsoft access tokens are minted for Graph
    /// unless a custom API scope is requested. Records without a provider
    /// (written by older clients) use [`BearerPreference::AccessThenId`].
    #[must_use]
    pub fn bearer_preference(self) -> BearerPreference {
        match self {
            Self::Oidc | Self::Google | Self::Microsoft => BearerPreference::IdToken,
        }
    }
}
