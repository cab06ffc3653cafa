//! OAuth2/PKCE authentication for the Tom broker client.
//!
//! [`OAuthFlow`] runs the interactive browser login against an OIDC provider
//! and persists the result in a [`TokenStore`](tomclient_types::TokenStore).
//! [`CliAuthProvider`] attaches whichever credential the configuration calls
//! for to outgoing broker requests.

pub mod callback;
pub mod discovery;
pub mod dispatch;
pub mod exchange;
pub mod flow;
pub mod pkce;
pub mod provider;

pub use dispatch::{AuthProvider, CliAuthProvider, refresh};
pub use flow::{FlowState, LoginSettings, OAuthFlow, SystemBrowser, UrlOpener};
pub use provider::{OAuthStrategy, Provider};
