use crate::{Deck, Flashcard};
use chrono::{DateTime, Utc};

/// Cards of `deck` whose next review is at or before `now`, earliest first.
/// Ties keep deck order.
pub fn due_cards(deck: &Deck, now: DateTime<Utc>) -> Vec<Flashcard> {
    let mut v: Vec<Flashcard> = deck.cards.iter().filter(|c| c.is_due(now)).cloned().collect();
    v.sort_by_key(|c| c.next_review_at);
    v
}

/// Earliest scheduled review in `deck`, due or not.
pub fn next_due_at(deck: &Deck) -> Option<DateTime<Utc>> {
    deck.cards.iter().map(|c| c.next_review_at).min()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MasterySummary {
    pub total: usize,
    pub due: usize,
    pub mean_level: f32,
}

pub fn mastery_summary(deck: &Deck, now: DateTime<Utc>) -> MasterySummary {
    let total = deck.cards.len();
    if total == 0 {
        return MasterySummary::default();
    }
    let due = deck.cards.iter().filter(|c| c.is_due(now)).count();
    let sum: u64 = deck.cards.iter().map(|c| u64::from(c.mastery_level)).sum();
    MasterySummary {
        total,
        due,
        mean_level: sum as f32 / total as f32,
    }
}
