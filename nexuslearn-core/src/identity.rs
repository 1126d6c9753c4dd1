//! Bearer-token identity.
//!
//! Tokens are random and handed out once; only their BLAKE3 digest is stored.

use crate::{CoreError, Repository, User, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<User, CoreError>;
}

pub fn token_digest(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

pub async fn issue_token<R: Repository + ?Sized>(
    repo: &R,
    user_id: UserId,
) -> Result<String, CoreError> {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    repo.insert_token(&token_digest(&token), user_id).await?;
    Ok(token)
}

/// Resolves tokens against the repository's digest table.
pub struct RepoIdentity {
    repo: Arc<dyn Repository>,
}

impl RepoIdentity {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl IdentityResolver for RepoIdentity {
    async fn resolve(&self, token: &str) -> Result<User, CoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CoreError::Unauthorized("no token"));
        }
        let user_id = match self.repo.user_id_for_token(&token_digest(token)).await {
            Ok(id) => id,
            Err(CoreError::NotFound(_)) => return Err(CoreError::Unauthorized("token failed")),
            Err(e) => return Err(e),
        };
        match self.repo.get_user(user_id).await {
            Ok(u) => Ok(u),
            Err(CoreError::NotFound(_)) => Err(CoreError::Unauthorized("token failed")),
            Err(e) => Err(e),
        }
    }
}
