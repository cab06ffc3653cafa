//! Core types and traits for the tomclient workspace.
//!
//! This crate defines the shared abstractions used by the authentication
//! layers: the error type, OAuth provider identifiers, the token endpoint
//! response and persisted credential record, and the token store trait.

pub mod error;
pub mod provider;
pub mod token;
pub mod traits;

pub use error::{Result, TomError};
pub use provider::{BearerPreference, ProviderId};
pub use token::{StoredToken, TokenResponse, TokenState};
pub use traits::TokenStore;
