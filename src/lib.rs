//! # oidc-server
//!
//! An embeddable `OpenID` Connect 1.0 / OAuth 2.0 authorization server
//! middleware for axum hosts.
//!
//! The middleware terminates the protocol endpoints (authorization,
//! token, introspection, userinfo, logout, discovery, and JWKS) and
//! leaves user authentication, the client store, and consent to the host
//! application:
//!
//! - the host mounts [`oidc_middleware`] in front of its router;
//! - protocol decisions the host owns flow through the [`ServerProvider`]
//!   hooks;
//! - the login UI finishes authorization flows with
//!   [`OidcServer::sign_in`], and logout flows with
//!   [`OidcServer::sign_out`];
//! - short-lived state (authorization codes, request continuations) lives
//!   in a [`DistributedCache`].
//!
//! ```rust,ignore
//! let mut options = ServerOptions::default();
//! options.signing_credentials.push(credentials);
//!
//! let cache = Arc::new(InMemoryCache::new(options.clock.clone()));
//! let server = Arc::new(OidcServer::new(options, MyProvider, cache)?);
//!
//! let app = Router::new()
//!     .fallback(login_ui)
//!     .layer(middleware::from_fn_with_state(server.clone(), oidc_middleware))
//!     .with_state(server);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod discovery;
pub mod endpoints;
pub mod error;
pub mod format;
pub mod jwks;
pub mod message;
pub mod options;
pub mod provider;
pub mod server;
pub mod ticket;
pub mod token;
pub mod types;

pub use cache::{DistributedCache, InMemoryCache, RequestStore};
pub use discovery::ProviderMetadata;
pub use error::{ErrorPayload, OidcError, OidcResult};
pub use format::{DataProtectionFormat, TokenFormat};
pub use jwks::{JsonWebKey, JsonWebKeySet};
pub use message::{ProtocolMessage, RequestType};
pub use options::{
    Clock, FixedClock, RandomSource, ServerOptions, SigningAlgorithm, SigningCredentials,
    SystemClock, SystemRandom,
};
pub use provider::{DefaultServerProvider, ServerProvider, Validation};
pub use server::{
    oidc_middleware, AuthorizationContext, ErrorContext, LogoutContext, OidcServer,
};
pub use ticket::{AuthenticationProperties, AuthenticationTicket, Claim, ClaimsPrincipal};
pub use token::{JwtHandler, TokenManager};
pub use types::{Endpoint, GrantType, ResponseMode, ResponseType, ResponseTypes, TokenUsage};
