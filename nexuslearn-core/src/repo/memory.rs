use crate::{CoreError, Deck, DeckId, Group, GroupId, User, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryRepo {
    users: RwLock<HashMap<UserId, User>>,
    tokens: RwLock<HashMap<String, UserId>>,
    decks: RwLock<HashMap<DeckId, Deck>>,
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::repo::Repository for MemoryRepo {
    async fn insert_user(&self, user: &User) -> Result<(), CoreError> {
        let mut m = self.users.write();
        if m.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(CoreError::Conflict("user already exists"));
        }
        m.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, CoreError> {
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("user"))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, CoreError> {
        self.users
            .read()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(CoreError::NotFound("user"))
    }

    async fn list_users(&self) -> Result<Vec<User>, CoreError> {
        Ok(self.users.read().values().cloned().collect())
    }

    async fn save_user(&self, user: &User) -> Result<User, CoreError> {
        let mut m = self.users.write();
        if !m.contains_key(&user.id) {
            return Err(CoreError::NotFound("user"));
        }
        m.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn insert_token(&self, digest: &str, user_id: UserId) -> Result<(), CoreError> {
        if !self.users.read().contains_key(&user_id) {
            return Err(CoreError::NotFound("user"));
        }
        self.tokens.write().insert(digest.to_string(), user_id);
        Ok(())
    }

    async fn user_id_for_token(&self, digest: &str) -> Result<UserId, CoreError> {
        self.tokens
            .read()
            .get(digest)
            .copied()
            .ok_or(CoreError::NotFound("token"))
    }

    async fn insert_deck(&self, deck: &Deck) -> Result<(), CoreError> {
        let mut m = self.decks.write();
        if m.contains_key(&deck.id) {
            return Err(CoreError::Conflict("deck already exists"));
        }
        m.insert(deck.id, deck.clone());
        Ok(())
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        self.decks
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("deck"))
    }

    async fn list_decks(&self, owner: Option<UserId>) -> Result<Vec<Deck>, CoreError> {
        let decks = self.decks.read();
        let mut v: Vec<Deck> = decks.values().cloned().collect();
        if let Some(uid) = owner {
            v.retain(|d| d.created_by == uid);
        }
        Ok(v)
    }

    async fn save_deck(&self, deck: &Deck) -> Result<Deck, CoreError> {
        let mut m = self.decks.write();
        if !m.contains_key(&deck.id) {
            return Err(CoreError::NotFound("deck"));
        }
        m.insert(deck.id, deck.clone());
        Ok(deck.clone())
    }

    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError> {
        self.decks
            .write()
            .remove(&id)
            .ok_or(CoreError::NotFound("deck"))?;
        Ok(())
    }

    async fn insert_group(&self, group: &Group) -> Result<(), CoreError> {
        let mut m = self.groups.write();
        if m.contains_key(&group.id) {
            return Err(CoreError::Conflict("group already exists"));
        }
        m.insert(group.id, group.clone());
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<Group, CoreError> {
        self.groups
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("group"))
    }

    async fn list_groups(&self) -> Result<Vec<Group>, CoreError> {
        Ok(self.groups.read().values().cloned().collect())
    }

    async fn save_group(&self, group: &Group) -> Result<Group, CoreError> {
        let mut m = self.groups.write();
        if !m.contains_key(&group.id) {
            return Err(CoreError::NotFound("group"));
        }
        m.insert(group.id, group.clone());
        Ok(group.clone())
    }
}
