//! Request authentication with scope-based access control.
//!
//! Two channels, in strict priority order: a bearer access token in the
//! `Authorization` header (stateless, verified by [`TokenCodec`]) and, when
//! enabled, a browser session cookie resolved through a [`SessionResolver`].
//! A request that carries a bearer token is judged by it alone.
//!
//! [`TokenCodec`]: crate::jwt::TokenCodec

mod errors;
mod extractors;
mod gate;
mod ip;
mod session;
mod state;
mod types;

pub use errors::AuthRejection;
pub use extractors::{AnyScope, Auth, ChatScope, ScopeConstraint};
pub use gate::AuthGate;
pub use ip::{FORWARDED_FOR_HEADER, extract_client_ip};
pub use session::{CookieSessionResolver, ResolvedSession, SESSION_COOKIE_NAME, SessionResolver};
pub use state::HasAuthGate;
pub use types::{AuthSource, AuthenticatedPrincipal};
