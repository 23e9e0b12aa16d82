//! Authentication: device-authorization sign-in, token cache, role sessions
//! and the refresh guard wrapped around every remote operation.

mod authenticator;
mod cache;
mod guard;
mod session;
mod store;

pub use authenticator::{Authenticator, CLIENT_NAME};
pub use cache::TokenCache;
pub use guard::CredentialRefreshGuard;
pub use session::{
    DeviceAuthSession, DeviceAuthorization, FederationToken, SessionState, VerificationPrompt,
    DEFAULT_POLL_INTERVAL, SLOW_DOWN_STEP,
};
pub use store::SessionStore;
