use crate::{CoreError, Deck, DeckId, Group, GroupId, User, UserId};
use async_trait::async_trait;

pub mod memory;

#[async_trait]
pub trait Repository: Send + Sync {
    // Users
    async fn insert_user(&self, user: &User) -> Result<(), CoreError>;
    async fn get_user(&self, id: UserId) -> Result<User, CoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<User, CoreError>;
    async fn list_users(&self) -> Result<Vec<User>, CoreError>;
    async fn save_user(&self, user: &User) -> Result<User, CoreError>;

    // Access tokens, keyed by digest
    async fn insert_token(&self, digest: &str, user_id: UserId) -> Result<(), CoreError>;
    async fn user_id_for_token(&self, digest: &str) -> Result<UserId, CoreError>;

    // Decks, cards embedded
    async fn insert_deck(&self, deck: &Deck) -> Result<(), CoreError>;
    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError>;
    async fn list_decks(&self, owner: Option<UserId>) -> Result<Vec<Deck>, CoreError>;
    async fn save_deck(&self, deck: &Deck) -> Result<Deck, CoreError>;
    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError>;

    // Groups
    async fn insert_group(&self, group: &Group) -> Result<(), CoreError>;
    async fn get_group(&self, id: GroupId) -> Result<Group, CoreError>;
    async fn list_groups(&self) -> Result<Vec<Group>, CoreError>;
    async fn save_group(&self, group: &Group) -> Result<Group, CoreError>;
}
