//! Bearer authentication for protected endpoints.
//!
//! Access tokens arrive as `Authorization: Bearer <token>` and are verified
//! statelessly. The refresh token travels in the `refreshToken` cookie and is
//! only consumed by `POST /auth/refresh`.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use cookie::{REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{BearerAuth, bearer_token};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
