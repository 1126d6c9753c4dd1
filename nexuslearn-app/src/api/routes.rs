use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use nexuslearn_core::{
    decks::{self, NewDeck},
    due_cards,
    groups::{self, NewGroup},
    issue_token, users, Deck, Flashcard, Group, IdentityResolver, Repository, User,
};

use crate::api::auth::AuthUser;
use crate::api::dto::{AddCardsIn, DueOut, HealthOut, LogStudyIn, RegisterIn, RegisterOut, ReviewIn};
use crate::api::error::ApiError;
use crate::api::path::IdPath;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub identity: Arc<dyn IdentityResolver>,
}

type ApiResult<T> = Result<T, ApiError>;

pub async fn welcome() -> &'static str {
    "Welcome to the NexusLearn API!"
}

pub async fn health() -> Json<HealthOut> {
    Json(HealthOut { status: "ok" })
}

// ===== Users =====
pub async fn register(
    State(st): State<Arc<AppState>>,
    Json(body): Json<RegisterIn>,
) -> ApiResult<(StatusCode, Json<RegisterOut>)> {
    let user = users::register_user(&*st.repo, &body.name, &body.email, Utc::now()).await?;
    let token = issue_token(&*st.repo, user.id).await?;
    Ok((StatusCode::CREATED, Json(RegisterOut { user, token })))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

pub async fn log_study(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<LogStudyIn>,
) -> ApiResult<Json<User>> {
    let user = users::log_study_session(&*st.repo, user.id, body.duration, Utc::now()).await?;
    Ok(Json(user))
}

// ===== Decks =====
pub async fn create_deck(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<NewDeck>,
) -> ApiResult<(StatusCode, Json<Deck>)> {
    let deck = decks::create_deck(&*st.repo, user.id, body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(deck)))
}

pub async fn list_decks(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<Deck>>> {
    Ok(Json(decks::list_decks_for(&*st.repo, user.id).await?))
}

pub async fn get_deck(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath(deck_id): IdPath<Uuid>,
) -> ApiResult<Json<Deck>> {
    Ok(Json(decks::owned_deck(&*st.repo, user.id, deck_id).await?))
}

pub async fn delete_deck(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath(deck_id): IdPath<Uuid>,
) -> ApiResult<StatusCode> {
    decks::delete_deck(&*st.repo, user.id, deck_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_cards(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath(deck_id): IdPath<Uuid>,
    Json(body): Json<AddCardsIn>,
) -> ApiResult<Json<Deck>> {
    let deck = decks::add_cards(&*st.repo, user.id, deck_id, &body.cards, Utc::now()).await?;
    Ok(Json(deck))
}

pub async fn due(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath(deck_id): IdPath<Uuid>,
) -> ApiResult<Json<DueOut>> {
    let now = Utc::now();
    let deck = decks::owned_deck(&*st.repo, user.id, deck_id).await?;
    Ok(Json(DueOut {
        deck_id,
        now,
        cards: due_cards(&deck, now),
    }))
}

pub async fn review(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath((deck_id, card_id)): IdPath<(Uuid, Uuid)>,
    Json(body): Json<ReviewIn>,
) -> ApiResult<Json<Flashcard>> {
    let card = decks::review_card(
        &*st.repo,
        user.id,
        deck_id,
        card_id,
        &body.confidence,
        Utc::now(),
    )
    .await?;
    Ok(Json(card))
}

// ===== Groups =====
pub async fn create_group(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<NewGroup>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let group = groups::create_group(&*st.repo, user.id, body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_groups(State(st): State<Arc<AppState>>) -> ApiResult<Json<Vec<Group>>> {
    Ok(Json(groups::list_groups(&*st.repo).await?))
}

pub async fn join_group(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath(group_id): IdPath<Uuid>,
) -> ApiResult<Json<Group>> {
    Ok(Json(
        groups::join_group(&*st.repo, user.id, group_id, Utc::now()).await?,
    ))
}

pub async fn leave_group(
    State(st): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    IdPath(group_id): IdPath<Uuid>,
) -> ApiResult<Json<Group>> {
    Ok(Json(
        groups::leave_group(&*st.repo, user.id, group_id, Utc::now()).await?,
    ))
}
