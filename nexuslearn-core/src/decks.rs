use crate::scheduler::{apply_review, Confidence};
use crate::users::record_activity;
use crate::{CardId, CoreError, Deck, DeckId, Flashcard, Repository, UserId, DEFAULT_SUBJECT};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Deserialize)]
pub struct NewCard {
    pub question: String,
    pub answer: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewDeck {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub cards: Vec<NewCard>,
}

fn build_cards(cards: &[NewCard], now: DateTime<Utc>) -> Result<Vec<Flashcard>, CoreError> {
    cards
        .iter()
        .map(|c| {
            let question = c.question.trim();
            if question.is_empty() {
                return Err(CoreError::Invalid("card question is required"));
            }
            if c.answer.trim().is_empty() {
                return Err(CoreError::Invalid("card answer is required"));
            }
            Ok(Flashcard::new(question, c.answer.clone(), now))
        })
        .collect()
}

pub async fn create_deck<R: Repository + ?Sized>(
    repo: &R,
    owner: UserId,
    new: NewDeck,
    now: DateTime<Utc>,
) -> Result<Deck, CoreError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(CoreError::Invalid("please add a title for the deck"));
    }
    let mut deck = Deck::new(owner, title, now);
    deck.description = new.description.filter(|d| !d.trim().is_empty());
    deck.subject = new
        .subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
    deck.cards = build_cards(&new.cards, now)?;

    repo.insert_deck(&deck).await?;
    info!(deck_id = %deck.id, cards = deck.cards.len(), "created deck");
    record_activity(repo, owner, format!("Created deck \"{}\"", deck.title), 0, now).await?;
    Ok(deck)
}

/// Decks created by `owner`, newest first.
pub async fn list_decks_for<R: Repository + ?Sized>(
    repo: &R,
    owner: UserId,
) -> Result<Vec<Deck>, CoreError> {
    let mut decks = repo.list_decks(Some(owner)).await?;
    decks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(decks)
}

pub async fn owned_deck<R: Repository + ?Sized>(
    repo: &R,
    requester: UserId,
    deck_id: DeckId,
) -> Result<Deck, CoreError> {
    let deck = repo.get_deck(deck_id).await?;
    if !deck.is_owned_by(requester) {
        warn!(%deck_id, %requester, "deck access denied");
        return Err(CoreError::Forbidden("user not authorized"));
    }
    Ok(deck)
}

pub async fn add_cards<R: Repository + ?Sized>(
    repo: &R,
    requester: UserId,
    deck_id: DeckId,
    cards: &[NewCard],
    now: DateTime<Utc>,
) -> Result<Deck, CoreError> {
    let mut deck = owned_deck(repo, requester, deck_id).await?;
    deck.cards.extend(build_cards(cards, now)?);
    deck.updated_at = now;
    repo.save_deck(&deck).await
}

pub async fn delete_deck<R: Repository + ?Sized>(
    repo: &R,
    requester: UserId,
    deck_id: DeckId,
) -> Result<(), CoreError> {
    owned_deck(repo, requester, deck_id).await?;
    repo.delete_deck(deck_id).await?;
    info!(%deck_id, "deleted deck");
    Ok(())
}

/// Records one review of a card and returns the card as saved.
///
/// Checks run in order: deck exists, requester owns it, card is in the deck,
/// the confidence label is valid. Nothing is written unless all pass.
pub async fn review_card<R: Repository + ?Sized>(
    repo: &R,
    requester: UserId,
    deck_id: DeckId,
    card_id: CardId,
    confidence: &str,
    now: DateTime<Utc>,
) -> Result<Flashcard, CoreError> {
    let mut deck = owned_deck(repo, requester, deck_id).await?;
    let card = deck.card_mut(card_id).ok_or(CoreError::NotFound("card"))?;
    let confidence: Confidence = confidence.parse()?;

    let s = apply_review(card, confidence, now);
    let updated = card.clone();
    debug!(%card_id, %confidence, level = s.new_level, next = %s.next_review_at, "scheduled card");

    deck.updated_at = now;
    repo.save_deck(&deck).await?;
    Ok(updated)
}
