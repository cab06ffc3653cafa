//! In-memory token store backed by a `Mutex`.

use async_trait::async_trait;
use std::sync::Mutex;
use tomclient_types::{StoredToken, TokenStore, TomError, traits::Result};

/// An in-memory [`TokenStore`] implementation for testing and ephemeral use.
#[derive(Default)]
pub struct InMemoryTokenStore {
    data: Mutex<Option<StoredToken>>,
}

impl InMemoryTokenStore {
    /// Creates a new empty in-memory token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `token`.
    #[must_use]
    pub fn with_token(token: StoredToken) -> Self {
        Self {
            data: Mutex::new(Some(token)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<StoredToken>>> {
        self.data
            .lock()
            .map_err(|_| TomError::Storage("in-memory token store poisoned".into()))
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> Result<Option<StoredToken>> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, token: &StoredToken) -> Result<()> {
        *self.lock()? = Some(token.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.lock()?.take();
        Ok(())
    }
}
