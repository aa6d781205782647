// Authentication module
// Credential storage, request authentication and coalesced token refresh

mod authenticator;
mod coordinator;
mod credentials;
mod refresh;
mod session;
mod types;

pub use authenticator::RequestAuthenticator;
pub use coordinator::RefreshCoordinator;
pub use credentials::{
    CredentialStore, KeyValueStore, MemoryStore, SqliteStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use refresh::{refresh_credentials, revoke_session, LOGOUT_PATH, REFRESH_PATH};
pub use session::SessionEvents;
pub use types::{CredentialPair, SessionEvent};
