use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nexuslearn_core::{
    repo::Repository, CoreError, Deck, DeckId, Group, GroupId, User, UserId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::{sync::Mutex, task};
use tracing::{debug, error, warn};

pub mod paths;

const FILE_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileImage {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    users: Vec<User>,
    #[serde(default)]
    tokens: Vec<TokenRow>,
    decks: Vec<Deck>,
    groups: Vec<Group>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRow {
    digest: String,
    user_id: UserId,
}

#[derive(Clone)]
struct State {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    users: HashMap<UserId, User>,
    tokens: HashMap<String, UserId>,
    decks: HashMap<DeckId, Deck>,
    groups: HashMap<GroupId, Group>,
}

impl State {
    fn new_empty() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            users: HashMap::new(),
            tokens: HashMap::new(),
            decks: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    fn to_image(&self) -> FileImage {
        FileImage {
            version: FILE_VERSION,
            created_at: self.created_at,
            updated_at: self.updated_at,
            users: self.users.values().cloned().collect(),
            tokens: self
                .tokens
                .iter()
                .map(|(digest, user_id)| TokenRow {
                    digest: digest.clone(),
                    user_id: *user_id,
                })
                .collect(),
            decks: self.decks.values().cloned().collect(),
            groups: self.groups.values().cloned().collect(),
        }
    }

    fn from_image(img: FileImage) -> Self {
        Self {
            created_at: img.created_at,
            updated_at: img.updated_at,
            users: img.users.into_iter().map(|u| (u.id, u)).collect(),
            tokens: img.tokens.into_iter().map(|t| (t.digest, t.user_id)).collect(),
            decks: img.decks.into_iter().map(|d| (d.id, d)).collect(),
            groups: img.groups.into_iter().map(|g| (g.id, g)).collect(),
        }
    }
}

/// Whole-store JSON file, rewritten atomically after every mutation with a
/// rotated copy kept in `backups_dir`.
///
/// Mutations are serialized through `writer`: the in-memory change, the
/// snapshot and the file write happen in one ordered step, and a failed
/// write restores the previous state.
pub struct JsonStore {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
    state: RwLock<State>,
    writer: Mutex<()>,
}

impl JsonStore {
    pub async fn open_in(root: &Path, max_backups: usize) -> Result<Self, CoreError> {
        let (file, backups) = paths::store_files(root);
        Self::open_with(file, backups, max_backups).await
    }

    pub async fn open_with(
        path: PathBuf,
        backups_dir: PathBuf,
        max_backups: usize,
    ) -> Result<Self, CoreError> {
        ensure_parent_dirs(&path)?;
        ensure_dir(&backups_dir)?;
        let max_backups = max_backups.max(1);
        let state = load_or_init(&path, &backups_dir, max_backups).await?;
        Ok(Self {
            path,
            backups_dir,
            max_backups,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    /// Applies `change` and persists the result before returning.
    async fn commit<T, F>(&self, change: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut State) -> Result<T, CoreError> + Send,
        T: Send,
    {
        let _writing = self.writer.lock().await;
        let (out, previous, snapshot) = {
            let mut s = self.state.write();
            let previous = (*s).clone();
            let out = change(&mut *s)?;
            s.updated_at = Utc::now();
            (out, previous, s.to_image())
        };
        if let Err(e) = self.write(snapshot).await {
            *self.state.write() = previous;
            return Err(e);
        }
        Ok(out)
    }

    async fn write(&self, snapshot: FileImage) -> Result<(), CoreError> {
        let path = self.path.clone();
        let backups = self.backups_dir.clone();
        let keep = self.max_backups;

        task::spawn_blocking(move || write_with_backup(&path, &backups, keep, &snapshot))
            .await
            .map_err(|e| {
                error!("json store writer panicked: {e}");
                CoreError::Storage("io")
            })?
            .map_err(|e| {
                error!("json store write failed: {e}");
                CoreError::Storage("io")
            })?;
        debug!(path = %self.path.display(), "saved json store");
        Ok(())
    }
}

fn ensure_parent_dirs(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), CoreError> {
    fs::create_dir_all(path).map_err(|e| {
        error!(path = %path.display(), "cannot create directory: {e}");
        CoreError::Storage("io")
    })
}

async fn load_or_init(path: &Path, backups_dir: &Path, keep: usize) -> Result<State, CoreError> {
    if path.exists() {
        let p = path.to_path_buf();
        let img: FileImage = task::spawn_blocking(move || {
            let buf = fs::read_to_string(&p)?;
            let v = serde_json::from_str::<FileImage>(&buf)?;
            Ok::<FileImage, std::io::Error>(v)
        })
        .await
        .map_err(|_| CoreError::Storage("io"))
        .and_then(|r| {
            r.map_err(|e| {
                error!(path = %path.display(), "cannot read json store: {e}");
                CoreError::Storage("io")
            })
        })?;
        if img.version != FILE_VERSION {
            warn!(version = img.version, "unexpected json store version");
        }
        Ok(State::from_image(img))
    } else {
        let st = State::new_empty();
        let img = st.to_image();
        write_with_backup(path, backups_dir, keep, &img).map_err(|e| {
            error!(path = %path.display(), "cannot create json store: {e}");
            CoreError::Storage("io")
        })?;
        Ok(st)
    }
}

fn write_with_backup(
    path: &Path,
    backups_dir: &Path,
    max_backups: usize,
    img: &FileImage,
) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(img)?;
    let mut tmp = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // The store file is already in place; a missed backup is not a failed write.
    if let Err(e) = write_backup(backups_dir, max_backups, &json) {
        warn!(dir = %backups_dir.display(), "json store backup failed: {e}");
    }
    Ok(())
}

fn write_backup(backups_dir: &Path, max_backups: usize, json: &[u8]) -> Result<(), std::io::Error> {
    fs::create_dir_all(backups_dir)?;
    let ts = Utc::now().format("%Y%m%d-%H%M%S%.3f");
    let backup_path = backups_dir.join(format!("nexuslearn-{ts}.json"));
    let mut btmp = NamedTempFile::new_in(backups_dir)?;
    btmp.write_all(json)?;
    btmp.flush()?;
    btmp.persist(&backup_path).map_err(|e| e.error)?;

    rotate_backups(backups_dir, max_backups)
}

fn rotate_backups(dir: &Path, keep: usize) -> Result<(), std::io::Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    // Names embed the timestamp, so name order is age order.
    entries.sort_by_key(|e| e.file_name());
    if entries.len() > keep {
        for e in &entries[0..entries.len() - keep] {
            let _ = fs::remove_file(e.path());
        }
    }
    Ok(())
}

#[async_trait]
impl Repository for JsonStore {
    async fn insert_user(&self, user: &User) -> Result<(), CoreError> {
        self.commit(|s| {
            if s.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
                return Err(CoreError::Conflict("user already exists"));
            }
            s.users.insert(user.id, user.clone());
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<User, CoreError> {
        let s = self.state.read();
        s.users.get(&id).cloned().ok_or(CoreError::NotFound("user"))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, CoreError> {
        let s = self.state.read();
        s.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(CoreError::NotFound("user"))
    }

    async fn list_users(&self) -> Result<Vec<User>, CoreError> {
        let s = self.state.read();
        Ok(s.users.values().cloned().collect())
    }

    async fn save_user(&self, user: &User) -> Result<User, CoreError> {
        self.commit(|s| {
            if !s.users.contains_key(&user.id) {
                return Err(CoreError::NotFound("user"));
            }
            s.users.insert(user.id, user.clone());
            Ok(user.clone())
        })
        .await
    }

    async fn insert_token(&self, digest: &str, user_id: UserId) -> Result<(), CoreError> {
        self.commit(|s| {
            if !s.users.contains_key(&user_id) {
                return Err(CoreError::NotFound("user"));
            }
            s.tokens.insert(digest.to_string(), user_id);
            Ok(())
        })
        .await
    }

    async fn user_id_for_token(&self, digest: &str) -> Result<UserId, CoreError> {
        let s = self.state.read();
        s.tokens.get(digest).copied().ok_or(CoreError::NotFound("token"))
    }

    async fn insert_deck(&self, deck: &Deck) -> Result<(), CoreError> {
        self.commit(|s| {
            if s.decks.contains_key(&deck.id) {
                return Err(CoreError::Conflict("deck already exists"));
            }
            s.decks.insert(deck.id, deck.clone());
            Ok(())
        })
        .await
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        let s = self.state.read();
        s.decks.get(&id).cloned().ok_or(CoreError::NotFound("deck"))
    }

    async fn list_decks(&self, owner: Option<UserId>) -> Result<Vec<Deck>, CoreError> {
        let s = self.state.read();
        let mut v: Vec<Deck> = s.decks.values().cloned().collect();
        if let Some(uid) = owner {
            v.retain(|d| d.created_by == uid);
        }
        Ok(v)
    }

    async fn save_deck(&self, deck: &Deck) -> Result<Deck, CoreError> {
        self.commit(|s| {
            if !s.decks.contains_key(&deck.id) {
                return Err(CoreError::NotFound("deck"));
            }
            s.decks.insert(deck.id, deck.clone());
            Ok(deck.clone())
        })
        .await
    }

    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError> {
        self.commit(|s| match s.decks.remove(&id) {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound("deck")),
        })
        .await
    }

    async fn insert_group(&self, group: &Group) -> Result<(), CoreError> {
        self.commit(|s| {
            if s.groups.contains_key(&group.id) {
                return Err(CoreError::Conflict("group already exists"));
            }
            s.groups.insert(group.id, group.clone());
            Ok(())
        })
        .await
    }

    async fn get_group(&self, id: GroupId) -> Result<Group, CoreError> {
        let s = self.state.read();
        s.groups.get(&id).cloned().ok_or(CoreError::NotFound("group"))
    }

    async fn list_groups(&self) -> Result<Vec<Group>, CoreError> {
        let s = self.state.read();
        Ok(s.groups.values().cloned().collect())
    }

    async fn save_group(&self, group: &Group) -> Result<Group, CoreError> {
        self.commit(|s| {
            if !s.groups.contains_key(&group.id) {
                return Err(CoreError::NotFound("group"));
            }
            s.groups.insert(group.id, group.clone());
            Ok(group.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexuslearn_core::{
        groups::{self, NewGroup},
        issue_token, token_digest, Flashcard,
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reopen_sees_saved_documents() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let user = User::new("Ada", "ada@example.com", now);
        let mut deck = Deck::new(user.id, "Chemistry", now);
        deck.cards.push(Flashcard::new("H2O?", "water", now));
        deck.cards.push(Flashcard::new("NaCl?", "salt", now));

        let token = {
            let store = JsonStore::open_in(dir.path(), 3).await.unwrap();
            store.insert_user(&user).await.unwrap();
            store.insert_deck(&deck).await.unwrap();
            issue_token(&store, user.id).await.unwrap()
        };

        let store = JsonStore::open_in(dir.path(), 3).await.unwrap();
        assert_eq!(store.get_user(user.id).await.unwrap(), user);
        let loaded = store.get_deck(deck.id).await.unwrap();
        assert_eq!(loaded, deck);
        assert_eq!(loaded.cards[1].question, "NaCl?");
        assert_eq!(
            store.user_id_for_token(&token_digest(&token)).await.unwrap(),
            user.id
        );
    }

    #[tokio::test]
    async fn backups_are_rotated() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open_in(dir.path(), 2).await.unwrap();
        let now = Utc::now();
        for i in 0..5 {
            let u = User::new(format!("u{i}"), format!("u{i}@example.com"), now);
            store.insert_user(&u).await.unwrap();
        }
        let (_, backups) = paths::store_files(dir.path());
        let count = fs::read_dir(backups).unwrap().count();
        assert!(count <= 2, "kept {count} backups");
    }

    #[tokio::test]
    async fn missing_documents_are_not_found() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open_in(dir.path(), 1).await.unwrap();
        let deck = Deck::new(uuid::Uuid::new_v4(), "ghost", Utc::now());
        assert!(matches!(
            store.save_deck(&deck).await,
            Err(CoreError::NotFound("deck"))
        ));
        assert!(matches!(
            store.delete_deck(deck.id).await,
            Err(CoreError::NotFound("deck"))
        ));
    }

    #[tokio::test]
    async fn groups_survive_reopen_with_member_order() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let users: Vec<User> = ["ada", "bo", "cy"]
            .iter()
            .map(|n| User::new(*n, format!("{n}@example.com"), now))
            .collect();

        let group = {
            let store = JsonStore::open_in(dir.path(), 3).await.unwrap();
            for u in &users {
                store.insert_user(u).await.unwrap();
            }
            let new = NewGroup {
                name: "Organic chemistry".into(),
                description: "Weekly problem sets".into(),
                subject: "Chemistry".into(),
                max_members: Some(3),
            };
            let g = groups::create_group(&store, users[0].id, new, now).await.unwrap();
            groups::join_group(&store, users[2].id, g.id, now).await.unwrap();
            groups::join_group(&store, users[1].id, g.id, now).await.unwrap()
        };

        let store = JsonStore::open_in(dir.path(), 3).await.unwrap();
        let loaded = store.get_group(group.id).await.unwrap();
        assert_eq!(loaded, group);
        assert_eq!(loaded.members, vec![users[0].id, users[2].id, users[1].id]);
        assert_eq!(store.list_groups().await.unwrap().len(), 1);
        assert_eq!(store.get_user(users[0].id).await.unwrap().reputation, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_writes_all_reach_disk() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonStore::open_in(dir.path(), 2).await.unwrap());
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let u = User::new(format!("u{i}"), format!("u{i}@example.com"), now);
                store.insert_user(&u).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.list_users().await.unwrap().len(), 40);
        drop(store);

        let reopened = JsonStore::open_in(dir.path(), 2).await.unwrap();
        assert_eq!(reopened.list_users().await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open_in(dir.path(), 2).await.unwrap();
        let (file, _) = paths::store_files(dir.path());
        let user = User::new("Ada", "ada@example.com", Utc::now());

        // A directory in the file's place makes the rename fail.
        fs::remove_file(&file).unwrap();
        fs::create_dir(&file).unwrap();
        fs::write(file.join("keep"), b"x").unwrap();
        assert!(matches!(
            store.insert_user(&user).await,
            Err(CoreError::Storage(_))
        ));
        assert!(matches!(
            store.get_user(user.id).await,
            Err(CoreError::NotFound("user"))
        ));

        fs::remove_dir_all(&file).unwrap();
        store.insert_user(&user).await.unwrap();
        let reopened = JsonStore::open_in(dir.path(), 2).await.unwrap();
        assert_eq!(reopened.get_user(user.id).await.unwrap(), user);
    }
}
