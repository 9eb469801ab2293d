//! Identity resolution from bearer tokens.
//!
//! The orchestrator consumes identity as a capability: the HTTP/auth surface
//! owns accounts and sessions, the core only needs `bearer token → identity`
//! on the admission path plus a cosmetic-asset refresh for connected players.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cosmetic profile attributes cached on the player connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileAssets {
    pub avatar: Option<String>,
    pub profile_frame: Option<String>,
    pub mascot_skin_cat: Option<String>,
    pub mascot_skin_dog: Option<String>,
    pub victory_effect_front: Option<String>,
    pub victory_effect_back: Option<String>,
}

/// Resolved account identity.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub user_id: i64,
    pub display_name: Option<String>,
    pub assets: ProfileAssets,
}

/// External identity service consumed by the gateway.
///
/// Implementations must tolerate high fan-in; every admission with a bearer
/// token goes through [`resolve`](IdentityResolver::resolve).
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a bearer token. `Ok(None)` means the token is invalid;
    /// `Err` means the service itself failed.
    async fn resolve(&self, bearer_token: &str) -> Result<Option<AuthIdentity>>;

    /// Re-fetch cosmetic assets for an already-resolved account.
    async fn fetch_assets(&self, user_id: i64) -> Result<Option<ProfileAssets>>;
}

/// In-memory resolver: a token → identity table.
#[derive(Default)]
pub struct InMemoryIdentityResolver {
    identities: RwLock<HashMap<String, AuthIdentity>>,
}

impl InMemoryIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, token: impl Into<String>, identity: AuthIdentity) {
        self.identities.write().await.insert(token.into(), identity);
    }
}

#[async_trait]
impl IdentityResolver for InMemoryIdentityResolver {
    async fn resolve(&self, bearer_token: &str) -> Result<Option<AuthIdentity>> {
        Ok(self.identities.read().await.get(bearer_token).cloned())
    }

    async fn fetch_assets(&self, user_id: i64) -> Result<Option<ProfileAssets>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .find(|identity| identity.user_id == user_id)
            .map(|identity| identity.assets.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let resolver = InMemoryIdentityResolver::new();
        assert!(resolver.resolve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registered_token_resolves() {
        let resolver = InMemoryIdentityResolver::new();
        resolver
            .register(
                "tok-1",
                AuthIdentity {
                    user_id: 7,
                    display_name: Some("Алиса".to_string()),
                    assets: ProfileAssets::default(),
                },
            )
            .await;
        let identity = resolver.resolve("tok-1").await.unwrap().unwrap();
        assert_eq!(identity.user_id, 7);
        assert!(resolver.fetch_assets(7).await.unwrap().is_some());
    }
}
