use chrono::{DateTime, Utc};
use nexuslearn_core::{decks::NewCard, Flashcard, User};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct MessageOut {
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct RegisterIn {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// The token is shown once; only its digest is kept.
#[derive(Serialize)]
pub struct RegisterOut {
    pub user: User,
    pub token: String,
}

#[derive(Deserialize)]
pub struct ReviewIn {
    /// Missing labels fall through to the confidence check.
    #[serde(default)]
    pub confidence: String,
}

#[derive(Deserialize)]
pub struct LogStudyIn {
    /// Whole minutes.
    pub duration: u32,
}

#[derive(Deserialize)]
pub struct AddCardsIn {
    pub cards: Vec<NewCard>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueOut {
    pub deck_id: uuid::Uuid,
    pub now: DateTime<Utc>,
    pub cards: Vec<Flashcard>,
}
