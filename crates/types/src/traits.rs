//! Async traits shared across all tomclient crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `tomclient-types`, not on each other.

use crate::{ProviderId, StoredToken, TokenResponse, TomError, token::unix_now};
use async_trait::async_trait;

pub use crate::error::Result;

/// Persistent storage for the single credential record of a config directory.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the stored record, `None` if nobody has logged in yet.
    async fn load(&self) -> Result<Option<StoredToken>>;
    /// Replace the stored record.
    async fn save(&self, token: &StoredToken) -> Result<()>;
    /// Remove the stored record; absence is not an error.
    async fn remove(&self) -> Result<()>;

    /// Load the stored record or fail with [`TomError::NotAuthenticated`].
    async fn load_required(&self) -> Result<StoredToken> {
        self.load().await?.ok_or(TomError::NotAuthenticated)
    }

    /// Turn a token endpoint response into a new record and persist it.
    ///
    /// The previous record is consulted only for refresh-token carry-over; an
    /// unreadable previous record is treated as absent.
    async fn save_response(
        &self,
        response: &TokenResponse,
        provider: ProviderId,
    ) -> Result<StoredToken> {
        let previous = match self.load().await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable previous token record");
                None
            }
        };
        let token = StoredToken::issue(response, provider, previous.as_ref(), unix_now());
        self.save(&token).await?;
        Ok(token)
    }
}
