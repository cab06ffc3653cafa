//! Token endpoint responses, the persisted credential record, and expiry logic.

use crate::provider::{BearerPreference, ProviderId};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds before the recorded expiry at which a token stops being used, so a
/// token never expires while a request is in flight.
pub const EXPIRY_BUFFER_SECS: u64 = 60;

/// Current time as unix seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// JSON body returned by a token endpoint for both code exchange and refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub id_token: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_secs")]
    pub expires_in: Option<u64>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub refresh_token: Option<String>,
    // Providers disagree on the name of the refresh lifetime field.
    #[serde(default, deserialize_with = "lenient_secs")]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default, deserialize_with = "lenient_secs")]
    pub refresh_expires_in: Option<u64>,
}

impl TokenResponse {
    /// Refresh-token lifetime, whichever field the provider used.
    #[must_use]
    pub fn refresh_lifetime(&self) -> Option<u64> {
        self.refresh_token_expires_in
            .filter(|secs| *secs > 0)
            .or(self.refresh_expires_in.filter(|secs| *secs > 0))
    }

    /// `true` if the response carries something usable as a bearer value.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.access_token.is_some() || self.id_token.is_some()
    }
}

/// The credential record persisted between invocations.
///
/// Records are never mutated after creation: a refresh produces a brand new
/// record through [`StoredToken::issue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    /// Unix seconds at which the token endpoint answered.
    pub issued_at: u64,
    /// `issued_at + expires_in`.
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<u64>,
    /// Absent in files written before provider tagging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
}

impl StoredToken {
    /// Build a new record from a token endpoint response.
    ///
    /// Providers that rotate refresh tokens only sometimes omit the refresh
    /// token from a response; in that case the refresh token of `previous`
    /// (and its expiry, unless the response states a new lifetime) is kept.
    #[must_use]
    pub fn issue(
        response: &TokenResponse,
        provider: ProviderId,
        previous: Option<&StoredToken>,
        now: u64,
    ) -> Self {
        let previous_refresh = previous.and_then(|p| p.refresh_token.as_deref());
        let refresh_token = response
            .refresh_token
            .clone()
            .or_else(|| previous_refresh.map(str::to_string));

        let carried = refresh_token.is_some() && refresh_token.as_deref() == previous_refresh;
        let (refresh_expires_in, refresh_expires_at) = match response.refresh_lifetime() {
            Some(secs) => (Some(secs), Some(now.saturating_add(secs))),
            None if carried => (
                previous.and_then(|p| p.refresh_expires_in),
                previous.and_then(|p| p.refresh_expires_at),
            ),
            None => (None, None),
        };

        let expires_in = response.expires_in.unwrap_or(0);
        Self {
            access_token: response.access_token.clone(),
            id_token: response.id_token.clone(),
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_in,
            issued_at: now,
            expires_at: now.saturating_add(expires_in),
            refresh_token,
            refresh_expires_in,
            refresh_expires_at,
            provider: Some(provider),
        }
    }

    /// Which token this record hands out, decided by the originating provider.
    #[must_use]
    pub fn bearer_preference(&self) -> BearerPreference {
        self.provider
            .map_or(BearerPreference::AccessThenId, ProviderId::bearer_preference)
    }

    /// The value to place in `Authorization: Bearer`, if the record has one.
    #[must_use]
    pub fn usable_credential(&self) -> Option<&str> {
        match self.bearer_preference() {
            BearerPreference::IdToken => self.id_token.as_deref(),
            BearerPreference::AccessThenId => self
                .access_token
                .as_deref()
                .or(self.id_token.as_deref()),
        }
    }

    /// Unix seconds at which the bearer value stops being accepted.
    ///
    /// For ID-token records this is the token's own `exp` claim, since some
    /// providers send an `expires_in` describing the access token only. A
    /// JWT-shaped ID token whose claims cannot be read yields `None`. An ID
    /// token that is not a JWT at all carries no claims, so the recorded
    /// expiry applies.
    #[must_use]
    pub fn effective_expires_at(&self) -> Option<u64> {
        match self.bearer_preference() {
            BearerPreference::IdToken => {
                let id_token = self.id_token.as_deref()?;
                if is_compact_jwt(id_token) {
                    decode_unverified_exp(id_token)
                } else {
                    Some(self.expires_at)
                }
            }
            BearerPreference::AccessThenId => Some(self.expires_at),
        }
    }

    /// `true` if the bearer value is usable at `now` with the safety buffer applied.
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.usable_credential().is_some()
            && self
                .effective_expires_at()
                .is_some_and(|exp| now.saturating_add(EXPIRY_BUFFER_SECS) < exp)
    }

    /// [`is_valid_at`](Self::is_valid_at) for the current time.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(unix_now())
    }

    /// `true` if a refresh token exists and has not passed its own expiry.
    #[must_use]
    pub fn can_refresh_at(&self, now: u64) -> bool {
        self.refresh_token.is_some() && self.refresh_expires_at.is_none_or(|exp| now < exp)
    }

    /// Determine the record's state at `now`.
    #[must_use]
    pub fn state_at(&self, now: u64) -> TokenState {
        if self.is_valid_at(now) {
            TokenState::Valid
        } else if self.can_refresh_at(now) {
            TokenState::Expired
        } else {
            TokenState::Invalid
        }
    }

    /// [`state_at`](Self::state_at) for the current time.
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.state_at(unix_now())
    }
}

/// Describes the usability state of a [`StoredToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    /// Unusable but a refresh token is available for renewal.
    Expired,
    /// Unusable with no way to renew it; the user must log in again.
    Invalid,
}

fn is_compact_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

/// Read the `exp` claim of a JWT **without verifying its signature**.
///
/// Only fit for deciding locally whether a token is worth sending. The broker
/// verifies signatures server-side; never base an authorization decision on
/// claims decoded here.
#[must_use]
pub fn decode_unverified_exp(token: &str) -> Option<u64> {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims
        .get("exp")
        .and_then(serde_json::Value::as_u64)
        .filter(|exp| *exp > 0)
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Accept lifetimes sent as numbers or as numeric strings.
fn lenient_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Num(u64),
        Text(String),
    }

    match Option::<Secs>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Secs::Num(n)) => Ok(Some(n)),
        Some(Secs::Text(s)) if s.is_empty() => Ok(None),
        Some(Secs::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
