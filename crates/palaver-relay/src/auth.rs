//! Credential validation for the authentication handshake.
//!
//! The relay never inspects credentials itself; it hands them to an
//! [`IdentityProvider`] and acts on the returned identity.  Production uses
//! the store's token table; tests plug in a static map.

use palaver_shared::UserId;

use crate::store::SharedStore;

/// A resolved identity: who the credential belongs to and what they may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    /// False for suspended accounts; the handshake rejects them.
    pub active: bool,
    pub moderator: bool,
}

/// Resolves a bearer credential to an identity, or `None` when the
/// credential is unknown or expired.  Implementations may block; callers
/// offload through `spawn_blocking`.
pub trait IdentityProvider: Send + Sync {
    fn validate(&self, credential: &str) -> Option<Identity>;
}

/// Token-table-backed provider.
pub struct StoreIdentityProvider {
    store: SharedStore,
}

impl StoreIdentityProvider {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl IdentityProvider for StoreIdentityProvider {
    fn validate(&self, credential: &str) -> Option<Identity> {
        let lookup = self
            .store
            .blocking(|s| s.db().validate_token(credential));
        match lookup {
            Ok(identity) => identity.map(|t| Identity {
                user_id: t.user_id,
                active: t.active,
                moderator: t.moderator,
            }),
            Err(e) => {
                tracing::error!(error = %e, "token validation failed");
                None
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Fixed credential map for session tests.
    pub struct StaticIdentityProvider {
        identities: HashMap<String, Identity>,
    }

    impl StaticIdentityProvider {
        pub fn new(entries: impl IntoIterator<Item = (String, Identity)>) -> Self {
            Self {
                identities: entries.into_iter().collect(),
            }
        }
    }

    impl IdentityProvider for StaticIdentityProvider {
        fn validate(&self, credential: &str) -> Option<Identity> {
            self.identities.get(credential).copied()
        }
    }
}
