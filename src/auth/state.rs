//! Authentication state traits and macro.

use crate::db::{Database, UserStore};
use crate::issuer::TokenIssuer;

/// Trait for state types that provide token verification and database access.
pub trait HasAuthBackend {
    fn issuer(&self) -> &TokenIssuer<UserStore>;
    fn db(&self) -> &Database;
}

/// Implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `issuer: Arc<TokenIssuer<UserStore>>`
/// - `db: Database`
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn issuer(&self) -> &$crate::issuer::TokenIssuer<$crate::db::UserStore> {
                &self.issuer
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}
