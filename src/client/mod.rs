//! Client half: credential storage, session lifecycle and the authenticated
//! request pipeline with single-flight token refresh.

mod coordinator;
mod decorator;
mod error;
mod pipeline;
mod request;
mod session;
mod store;
mod transport;

pub use coordinator::RefreshCoordinator;
pub use decorator::RequestDecorator;
pub use error::{AuthFailure, ClientError};
pub use pipeline::{ApiClient, ClientConfig};
pub use request::{ApiRequest, ApiResponse};
pub use session::{Session, SessionController, UserSummary, UserUpdate};
pub use store::{
    CREDENTIAL_KEY, CookieStore, CredentialStore, FileStore, KeyValueStore, MemoryStore,
    PersistedAuth, REFRESH_TOKEN_KEY,
};
pub use transport::{HttpRefresher, HttpTransport, IssuedTokens, REFRESH_PATH, TokenRefresher, Transport};
