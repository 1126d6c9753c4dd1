use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type DeckId = Uuid;
pub type CardId = Uuid;
pub type GroupId = Uuid;

pub const DEFAULT_SUBJECT: &str = "General";
pub const DEFAULT_MAX_MEMBERS: u32 = 10;
pub const GROUP_NAME_MAX: usize = 50;
pub const GROUP_DESCRIPTION_MAX: usize = 500;
pub const ACTIVITY_FEED_MAX: usize = 50;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: CardId,
    pub question: String,
    pub answer: String,
    pub mastery_level: u32,
    pub next_review_at: DateTime<Utc>,
}

impl Flashcard {
    /// A new card starts at level 0 and is due immediately.
    pub fn new(question: impl Into<String>, answer: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            answer: answer.into(),
            mastery_level: 0,
            next_review_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: DeckId,
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub created_by: UserId,
    pub cards: Vec<Flashcard>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deck {
    pub fn new(created_by: UserId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            subject: DEFAULT_SUBJECT.to_string(),
            created_by,
            cards: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn card(&self, id: CardId) -> Option<&Flashcard> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn card_mut(&mut self, id: CardId) -> Option<&mut Flashcard> {
        self.cards.iter_mut().find(|c| c.id == id)
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.created_by == user
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub text: String,
    pub xp_gained: u64,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub date: DateTime<Utc>,
    pub duration_minutes: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub xp: u64,
    pub reputation: i64,
    pub current_streak: u32,
    pub study_history: Vec<StudySession>,
    pub activity_feed: Vec<Activity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            xp: 0,
            reputation: 0,
            current_streak: 0,
            study_history: Vec::new(),
            activity_feed: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub subject: String,
    pub max_members: u32,
    pub created_by: UserId,
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members as usize
    }
}
