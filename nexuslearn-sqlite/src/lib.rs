use chrono::{DateTime, Utc};
use nexuslearn_core::{
    repo::Repository, Activity, CoreError, Deck, DeckId, Flashcard, Group, GroupId, StudySession,
    User, UserId,
};
use sqlx::{sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tracing::error;

pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// Every connection to `sqlite::memory:` is its own database, so the
    /// pool is pinned to one connection.
    pub async fn open_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        const STMT: &str = r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
          id              TEXT PRIMARY KEY,
          name            TEXT NOT NULL,
          email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
          xp              INTEGER NOT NULL DEFAULT 0,
          reputation      INTEGER NOT NULL DEFAULT 0,
          current_streak  INTEGER NOT NULL DEFAULT 0,
          study_history   TEXT NOT NULL,
          activity_feed   TEXT NOT NULL,
          created_at      TEXT NOT NULL,
          updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tokens (
          digest   TEXT PRIMARY KEY,
          user_id  TEXT NOT NULL,
          FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS decks (
          id           TEXT PRIMARY KEY,
          title        TEXT NOT NULL,
          description  TEXT,
          subject      TEXT NOT NULL,
          created_by   TEXT NOT NULL,
          created_at   TEXT NOT NULL,
          updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cards (
          id              TEXT PRIMARY KEY,
          deck_id         TEXT NOT NULL,
          position        INTEGER NOT NULL,
          question        TEXT NOT NULL,
          answer          TEXT NOT NULL,
          mastery_level   INTEGER NOT NULL DEFAULT 0,
          next_review_at  TEXT NOT NULL,
          FOREIGN KEY(deck_id) REFERENCES decks(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS study_groups (
          id           TEXT PRIMARY KEY,
          name         TEXT NOT NULL,
          description  TEXT NOT NULL,
          subject      TEXT NOT NULL,
          max_members  INTEGER NOT NULL,
          created_by   TEXT NOT NULL,
          created_at   TEXT NOT NULL,
          updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
          group_id  TEXT NOT NULL,
          user_id   TEXT NOT NULL,
          position  INTEGER NOT NULL,
          PRIMARY KEY (group_id, user_id),
          FOREIGN KEY(group_id) REFERENCES study_groups(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_decks_owner ON decks (created_by, created_at);
        CREATE INDEX IF NOT EXISTS idx_cards_deck_pos ON cards (deck_id, position)
        "#;

        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage("sqlite schema"))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>, CoreError> {
        self.pool.begin().await.map_err(storage("tx"))
    }

    async fn load_cards(&self, deck_id: DeckId) -> Result<Vec<Flashcard>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT id,question,answer,mastery_level,next_review_at
               FROM cards WHERE deck_id=? ORDER BY position ASC"#,
        )
        .bind(deck_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list cards"))?;
        rows.into_iter().map(row_into_card).collect()
    }

    async fn load_members(&self, group_id: GroupId) -> Result<Vec<UserId>, CoreError> {
        let rows = sqlx::query("SELECT user_id FROM group_members WHERE group_id=? ORDER BY position ASC")
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list members"))?;
        rows.into_iter()
            .map(|r| uuid_from_str(r.get::<String, _>("user_id")))
            .collect()
    }
}

#[async_trait::async_trait]
impl Repository for SqliteRepo {
    // ===== Users =====
    async fn insert_user(&self, user: &User) -> Result<(), CoreError> {
        let exists = sqlx::query("SELECT 1 FROM users WHERE email=? LIMIT 1")
            .bind(&user.email)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read user"))?
            .is_some();
        if exists {
            return Err(CoreError::Conflict("user already exists"));
        }

        sqlx::query(
            r#"
            INSERT INTO users (
              id, name, email, xp, reputation, current_streak,
              study_history, activity_feed, created_at, updated_at
            )
            VALUES (?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.xp as i64)
        .bind(user.reputation)
        .bind(i64::from(user.current_streak))
        .bind(to_json(&user.study_history)?)
        .bind(to_json(&user.activity_feed)?)
        .bind(dt_to_str(user.created_at))
        .bind(dt_to_str(user.updated_at))
        .execute(&self.pool)
        .await
        .map_err(storage("insert user"))?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, CoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read user"))?;
        row_into_user(row.ok_or(CoreError::NotFound("user"))?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, CoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email=?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read user"))?;
        row_into_user(row.ok_or(CoreError::NotFound("user"))?)
    }

    async fn list_users(&self) -> Result<Vec<User>, CoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list users"))?;
        rows.into_iter().map(row_into_user).collect()
    }

    async fn save_user(&self, user: &User) -> Result<User, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE users SET
              name=?, email=?, xp=?, reputation=?, current_streak=?,
              study_history=?, activity_feed=?, updated_at=?
            WHERE id=?
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.xp as i64)
        .bind(user.reputation)
        .bind(i64::from(user.current_streak))
        .bind(to_json(&user.study_history)?)
        .bind(to_json(&user.activity_feed)?)
        .bind(dt_to_str(user.updated_at))
        .bind(user.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage("update user"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("user"));
        }
        Ok(user.clone())
    }

    // ===== Tokens =====
    async fn insert_token(&self, digest: &str, user_id: UserId) -> Result<(), CoreError> {
        self.get_user(user_id).await?;
        sqlx::query("INSERT OR REPLACE INTO tokens (digest,user_id) VALUES (?,?)")
            .bind(digest)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage("insert token"))?;
        Ok(())
    }

    async fn user_id_for_token(&self, digest: &str) -> Result<UserId, CoreError> {
        let row = sqlx::query("SELECT user_id FROM tokens WHERE digest=?")
            .bind(digest)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read token"))?;
        let row = row.ok_or(CoreError::NotFound("token"))?;
        uuid_from_str(row.get::<String, _>("user_id"))
    }

    // ===== Decks =====
    async fn insert_deck(&self, deck: &Deck) -> Result<(), CoreError> {
        let mut tx = self.begin().await?;
        let res = sqlx::query(
            r#"INSERT OR IGNORE INTO decks (id,title,description,subject,created_by,created_at,updated_at)
               VALUES (?,?,?,?,?,?,?)"#,
        )
        .bind(deck.id.to_string())
        .bind(&deck.title)
        .bind(deck.description.clone())
        .bind(&deck.subject)
        .bind(deck.created_by.to_string())
        .bind(dt_to_str(deck.created_at))
        .bind(dt_to_str(deck.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(storage("insert deck"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::Conflict("deck already exists"));
        }
        write_cards(&mut tx, deck).await?;
        tx.commit().await.map_err(storage("tx commit"))
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        let row = sqlx::query("SELECT * FROM decks WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read deck"))?;
        let mut deck = row_into_deck(row.ok_or(CoreError::NotFound("deck"))?)?;
        deck.cards = self.load_cards(deck.id).await?;
        Ok(deck)
    }

    async fn list_decks(&self, owner: Option<UserId>) -> Result<Vec<Deck>, CoreError> {
        let rows = if let Some(uid) = owner {
            sqlx::query("SELECT * FROM decks WHERE created_by=? ORDER BY created_at ASC")
                .bind(uid.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(storage("list decks"))?
        } else {
            sqlx::query("SELECT * FROM decks ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(storage("list decks"))?
        };
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            let mut deck = row_into_deck(row)?;
            deck.cards = self.load_cards(deck.id).await?;
            v.push(deck);
        }
        Ok(v)
    }

    async fn save_deck(&self, deck: &Deck) -> Result<Deck, CoreError> {
        let mut tx = self.begin().await?;
        let res = sqlx::query(
            r#"UPDATE decks SET title=?, description=?, subject=?, created_by=?, updated_at=?
               WHERE id=?"#,
        )
        .bind(&deck.title)
        .bind(deck.description.clone())
        .bind(&deck.subject)
        .bind(deck.created_by.to_string())
        .bind(dt_to_str(deck.updated_at))
        .bind(deck.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage("update deck"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("deck"));
        }

        sqlx::query("DELETE FROM cards WHERE deck_id=?")
            .bind(deck.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage("del cards"))?;
        write_cards(&mut tx, deck).await?;

        tx.commit().await.map_err(storage("tx commit"))?;
        Ok(deck.clone())
    }

    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError> {
        let mut tx = self.begin().await?;

        // Manual cascade (robust even if PRAGMA foreign_keys is off)
        sqlx::query("DELETE FROM cards WHERE deck_id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage("del cards"))?;

        let res = sqlx::query("DELETE FROM decks WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage("del deck"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("deck"));
        }

        tx.commit().await.map_err(storage("tx commit"))
    }

    // ===== Groups =====
    async fn insert_group(&self, group: &Group) -> Result<(), CoreError> {
        let mut tx = self.begin().await?;
        let res = sqlx::query(
            r#"INSERT OR IGNORE INTO study_groups
                 (id,name,description,subject,max_members,created_by,created_at,updated_at)
               VALUES (?,?,?,?,?,?,?,?)"#,
        )
        .bind(group.id.to_string())
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.subject)
        .bind(i64::from(group.max_members))
        .bind(group.created_by.to_string())
        .bind(dt_to_str(group.created_at))
        .bind(dt_to_str(group.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(storage("insert group"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::Conflict("group already exists"));
        }
        write_members(&mut tx, group).await?;
        tx.commit().await.map_err(storage("tx commit"))
    }

    async fn get_group(&self, id: GroupId) -> Result<Group, CoreError> {
        let row = sqlx::query("SELECT * FROM study_groups WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read group"))?;
        let mut group = row_into_group(row.ok_or(CoreError::NotFound("group"))?)?;
        group.members = self.load_members(group.id).await?;
        Ok(group)
    }

    async fn list_groups(&self) -> Result<Vec<Group>, CoreError> {
        let rows = sqlx::query("SELECT * FROM study_groups ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list groups"))?;
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            let mut group = row_into_group(row)?;
            group.members = self.load_members(group.id).await?;
            v.push(group);
        }
        Ok(v)
    }

    async fn save_group(&self, group: &Group) -> Result<Group, CoreError> {
        let mut tx = self.begin().await?;
        let res = sqlx::query(
            r#"UPDATE study_groups SET
                 name=?, description=?, subject=?, max_members=?, created_by=?, updated_at=?
               WHERE id=?"#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.subject)
        .bind(i64::from(group.max_members))
        .bind(group.created_by.to_string())
        .bind(dt_to_str(group.updated_at))
        .bind(group.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage("update group"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("group"));
        }

        sqlx::query("DELETE FROM group_members WHERE group_id=?")
            .bind(group.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage("del members"))?;
        write_members(&mut tx, group).await?;

        tx.commit().await.map_err(storage("tx commit"))?;
        Ok(group.clone())
    }
}

// ===== Helpers =====
fn storage(what: &'static str) -> impl Fn(sqlx::Error) -> CoreError {
    move |e| {
        error!("sqlite {what}: {e}");
        CoreError::Storage(what)
    }
}

async fn write_cards(tx: &mut Transaction<'_, Sqlite>, deck: &Deck) -> Result<(), CoreError> {
    for (pos, card) in deck.cards.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO cards (id,deck_id,position,question,answer,mastery_level,next_review_at)
               VALUES (?,?,?,?,?,?,?)"#,
        )
        .bind(card.id.to_string())
        .bind(deck.id.to_string())
        .bind(pos as i64)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(i64::from(card.mastery_level))
        .bind(dt_to_str(card.next_review_at))
        .execute(&mut **tx)
        .await
        .map_err(storage("insert card"))?;
    }
    Ok(())
}

async fn write_members(tx: &mut Transaction<'_, Sqlite>, group: &Group) -> Result<(), CoreError> {
    for (pos, member) in group.members.iter().enumerate() {
        sqlx::query("INSERT INTO group_members (group_id,user_id,position) VALUES (?,?,?)")
            .bind(group.id.to_string())
            .bind(member.to_string())
            .bind(pos as i64)
            .execute(&mut **tx)
            .await
            .map_err(storage("insert member"))?;
    }
    Ok(())
}

fn uuid_from_str(s: String) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(&s).map_err(|_| CoreError::Invalid("uuid"))
}

fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::Invalid("datetime"))
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<String, CoreError> {
    serde_json::to_string(v).map_err(|e| {
        error!("sqlite encode: {e}");
        CoreError::Storage("encode")
    })
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, CoreError> {
    serde_json::from_str(s).map_err(|e| {
        error!("sqlite decode: {e}");
        CoreError::Storage("decode")
    })
}

fn row_into_user(row: sqlx::sqlite::SqliteRow) -> Result<User, CoreError> {
    let history: Vec<StudySession> = from_json(&row.get::<String, _>("study_history"))?;
    let feed: Vec<Activity> = from_json(&row.get::<String, _>("activity_feed"))?;
    Ok(User {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        name: row.get::<String, _>("name"),
        email: row.get::<String, _>("email"),
        xp: row.get::<i64, _>("xp").max(0) as u64,
        reputation: row.get::<i64, _>("reputation"),
        current_streak: row.get::<i64, _>("current_streak").max(0) as u32,
        study_history: history,
        activity_feed: feed,
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        updated_at: dt_from_str(row.get::<String, _>("updated_at"))?,
    })
}

fn row_into_deck(row: sqlx::sqlite::SqliteRow) -> Result<Deck, CoreError> {
    Ok(Deck {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        title: row.get::<String, _>("title"),
        description: row.get::<Option<String>, _>("description"),
        subject: row.get::<String, _>("subject"),
        created_by: uuid_from_str(row.get::<String, _>("created_by"))?,
        cards: Vec::new(),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        updated_at: dt_from_str(row.get::<String, _>("updated_at"))?,
    })
}

fn row_into_card(row: sqlx::sqlite::SqliteRow) -> Result<Flashcard, CoreError> {
    let level = row.get::<i64, _>("mastery_level");
    Ok(Flashcard {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        question: row.get::<String, _>("question"),
        answer: row.get::<String, _>("answer"),
        mastery_level: u32::try_from(level).map_err(|_| CoreError::Invalid("mastery level"))?,
        next_review_at: dt_from_str(row.get::<String, _>("next_review_at"))?,
    })
}

fn row_into_group(row: sqlx::sqlite::SqliteRow) -> Result<Group, CoreError> {
    Ok(Group {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        name: row.get::<String, _>("name"),
        description: row.get::<String, _>("description"),
        subject: row.get::<String, _>("subject"),
        max_members: row.get::<i64, _>("max_members").clamp(0, u32::MAX as i64) as u32,
        created_by: uuid_from_str(row.get::<String, _>("created_by"))?,
        members: Vec::new(),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        updated_at: dt_from_str(row.get::<String, _>("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexuslearn_core::{apply_review, issue_token, token_digest, Confidence};

    fn sample_deck(owner: UserId) -> Deck {
        let now = Utc::now();
        let mut deck = Deck::new(owner, "Geography", now);
        deck.description = Some("capitals".into());
        for (q, a) in [("France?", "Paris"), ("Peru?", "Lima"), ("Kenya?", "Nairobi")] {
            deck.cards.push(Flashcard::new(q, a, now));
        }
        deck
    }

    #[tokio::test]
    async fn deck_round_trip_preserves_card_order() {
        let repo = SqliteRepo::open_memory().await.unwrap();
        let user = User::new("Ada", "ada@example.com", Utc::now());
        repo.insert_user(&user).await.unwrap();

        let mut deck = sample_deck(user.id);
        repo.insert_deck(&deck).await.unwrap();
        assert_eq!(repo.get_deck(deck.id).await.unwrap(), deck);

        let now = Utc::now();
        apply_review(&mut deck.cards[1], Confidence::Easy, now);
        deck.cards.swap(0, 2);
        repo.save_deck(&deck).await.unwrap();

        let loaded = repo.get_deck(deck.id).await.unwrap();
        assert_eq!(loaded.cards[0].question, "Kenya?");
        assert_eq!(loaded.cards[1].mastery_level, 2);
        assert_eq!(loaded, deck);

        assert_eq!(repo.list_decks(Some(user.id)).await.unwrap().len(), 1);
        assert!(repo.list_decks(Some(uuid::Uuid::new_v4())).await.unwrap().is_empty());

        repo.delete_deck(deck.id).await.unwrap();
        assert!(matches!(repo.get_deck(deck.id).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn users_tokens_and_groups() {
        let repo = SqliteRepo::open_memory().await.unwrap();
        let now = Utc::now();
        let mut user = User::new("Ada", "ada@example.com", now);
        repo.insert_user(&user).await.unwrap();

        let dup = User::new("Other", "ADA@example.com", now);
        assert!(matches!(repo.insert_user(&dup).await, Err(CoreError::Conflict(_))));

        user.reputation = 3;
        user.activity_feed.push(Activity {
            text: "hello".into(),
            xp_gained: 5,
            date: now,
        });
        repo.save_user(&user).await.unwrap();
        assert_eq!(repo.find_user_by_email("ada@EXAMPLE.com").await.unwrap(), user);

        let token = issue_token(&repo, user.id).await.unwrap();
        assert_eq!(
            repo.user_id_for_token(&token_digest(&token)).await.unwrap(),
            user.id
        );

        let other = User::new("Bob", "bob@example.com", now);
        repo.insert_user(&other).await.unwrap();
        let mut group = Group {
            id: uuid::Uuid::new_v4(),
            name: "Rivers".into(),
            description: "Long ones".into(),
            subject: "Geography".into(),
            max_members: 3,
            created_by: user.id,
            members: vec![user.id],
            created_at: now,
            updated_at: now,
        };
        repo.insert_group(&group).await.unwrap();
        group.members.push(other.id);
        repo.save_group(&group).await.unwrap();
        assert_eq!(repo.get_group(group.id).await.unwrap(), group);
        assert_eq!(repo.list_groups().await.unwrap(), vec![group]);
    }
}
