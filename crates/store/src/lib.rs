//! Token storage backends for persisting the OAuth credential record.
//!
//! Provides a file-backed store for production and an in-memory store for testing.

pub mod file;
pub mod memory;

pub use file::{FileTokenStore, TOKEN_FILE_NAME};
pub use memory::InMemoryTokenStore;
