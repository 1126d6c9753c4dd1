use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post, put},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::api::routes::{
    add_cards, create_deck, create_group, delete_deck, due, get_deck, health, join_group,
    leave_group, list_decks, list_groups, log_study, me, register, review, welcome, AppState,
};

pub fn router(state: AppState, origins: &[String]) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/api/health", get(health))
        .route("/api/users/register", post(register))
        .route("/api/users/me", get(me))
        .route("/api/users/log-study", post(log_study))
        .route("/api/decks", post(create_deck).get(list_decks))
        .route("/api/decks/:id", get(get_deck).delete(delete_deck))
        .route("/api/decks/:id/cards", post(add_cards))
        .route("/api/decks/:id/due", get(due))
        .route("/api/decks/:deck_id/cards/:card_id/review", put(review))
        .route("/api/groups", post(create_group).get(list_groups))
        .route("/api/groups/:id/join", post(join_group))
        .route("/api/groups/:id/leave", post(leave_group))
        .with_state(Arc::new(state))
        .layer(cors_layer(origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Skipping unusable CORS origin: {o}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}

pub async fn run(state: AppState, addr: SocketAddr, origins: Vec<String>) -> anyhow::Result<()> {
    let app = router(state, &origins);

    let listener = TcpListener::bind(addr).await?;
    info!("Server running on {addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nexuslearn_core::{
        decks::{create_deck as new_deck, NewCard, NewDeck},
        issue_token,
        memory::MemoryRepo,
        users::register_user,
        Deck, RepoIdentity, Repository,
    };
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use tokio::{net::TcpStream, time::sleep};

    struct TestApp {
        base: String,
        client: reqwest::Client,
        repo: Arc<dyn Repository>,
        alice_token: String,
        bob_token: String,
        deck: Deck,
    }

    async fn wait_for_server(port: u16) {
        loop {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
                drop(stream);
                break;
            }
            sleep(Duration::from_millis(1)).await;
        }
    }

    async fn spawn_app() -> TestApp {
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepo::new());
        let now = Utc::now();
        let alice = register_user(&*repo, "Alice", "alice@example.com", now)
            .await
            .unwrap();
        let bob = register_user(&*repo, "Bob", "bob@example.com", now)
            .await
            .unwrap();
        let alice_token = issue_token(&*repo, alice.id).await.unwrap();
        let bob_token = issue_token(&*repo, bob.id).await.unwrap();
        let deck = new_deck(
            &*repo,
            alice.id,
            NewDeck {
                title: "Biology".into(),
                cards: vec![NewCard {
                    question: "Powerhouse of the cell?".into(),
                    answer: "Mitochondria".into(),
                }],
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

        let state = AppState {
            repo: repo.clone(),
            identity: Arc::new(RepoIdentity::new(repo.clone())),
        };
        let port = portpicker::pick_unused_port().expect("no free port");
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        tokio::spawn(run(state, addr, vec!["http://localhost:5173".into()]));
        wait_for_server(port).await;

        TestApp {
            base: format!("http://127.0.0.1:{port}"),
            client: reqwest::Client::new(),
            repo,
            alice_token,
            bob_token,
            deck,
        }
    }

    impl TestApp {
        fn review_url(&self) -> String {
            format!(
                "{}/api/decks/{}/cards/{}/review",
                self.base, self.deck.id, self.deck.cards[0].id
            )
        }
    }

    #[tokio::test]
    async fn health_and_welcome_are_public() {
        let app = spawn_app().await;
        let res = app
            .client
            .get(format!("{}/api/health", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        let res = app.client.get(&app.base).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn private_routes_require_a_token() {
        let app = spawn_app().await;
        let res = app
            .client
            .get(format!("{}/api/decks", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = res.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("no token"));

        let res = app
            .client
            .get(format!("{}/api/users/me", app.base))
            .bearer_auth("not-a-real-token")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn review_updates_the_card() {
        let app = spawn_app().await;
        let res = app
            .client
            .put(app.review_url())
            .bearer_auth(&app.alice_token)
            .json(&json!({ "confidence": "good" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let card: Value = res.json().await.unwrap();
        assert_eq!(card["masteryLevel"], 1);
        assert_eq!(card["id"], app.deck.cards[0].id.to_string());

        let stored = app.repo.get_deck(app.deck.id).await.unwrap();
        assert_eq!(stored.cards[0].mastery_level, 1);
        assert!(stored.cards[0].next_review_at > app.deck.cards[0].next_review_at);
    }

    #[tokio::test]
    async fn unknown_confidence_is_a_bad_request() {
        let app = spawn_app().await;
        let res = app
            .client
            .put(app.review_url())
            .bearer_auth(&app.alice_token)
            .json(&json!({ "confidence": "maybe" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let stored = app.repo.get_deck(app.deck.id).await.unwrap();
        assert_eq!(stored.cards[0], app.deck.cards[0]);
    }

    #[tokio::test]
    async fn foreign_decks_are_forbidden() {
        let app = spawn_app().await;
        let res = app
            .client
            .get(format!("{}/api/decks/{}", app.base, app.deck.id))
            .bearer_auth(&app.bob_token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .client
            .put(app.review_url())
            .bearer_auth(&app.bob_token)
            .json(&json!({ "confidence": "easy" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_card_is_not_found() {
        let app = spawn_app().await;
        let res = app
            .client
            .put(format!(
                "{}/api/decks/{}/cards/{}/review",
                app.base,
                app.deck.id,
                uuid::Uuid::new_v4()
            ))
            .bearer_auth(&app.alice_token)
            .json(&json!({ "confidence": "maybe" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn decks_are_created_and_listed() {
        let app = spawn_app().await;
        let res = app
            .client
            .post(format!("{}/api/decks", app.base))
            .bearer_auth(&app.bob_token)
            .json(&json!({
                "title": "Chemistry",
                "cards": [{ "question": "H2O?", "answer": "Water" }]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let deck: Value = res.json().await.unwrap();
        assert_eq!(deck["subject"], "General");
        assert_eq!(deck["cards"][0]["masteryLevel"], 0);

        let res = app
            .client
            .get(format!("{}/api/decks", app.base))
            .bearer_auth(&app.bob_token)
            .send()
            .await
            .unwrap();
        let decks: Vec<Value> = res.json().await.unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0]["title"], "Chemistry");

        let res = app
            .client
            .get(format!("{}/api/decks/{}/due", app.base, app.deck.id))
            .bearer_auth(&app.alice_token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let due: Value = res.json().await.unwrap();
        assert_eq!(due["cards"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn groups_and_study_sessions() {
        let app = spawn_app().await;
        let res = app
            .client
            .post(format!("{}/api/groups", app.base))
            .bearer_auth(&app.alice_token)
            .json(&json!({
                "name": "Night owls",
                "description": "Late evening revision",
                "subject": "Biology",
                "maxMembers": 2
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let group: Value = res.json().await.unwrap();
        let group_id = group["id"].as_str().unwrap().to_string();

        let res = app
            .client
            .post(format!("{}/api/groups/{group_id}/join", app.base))
            .bearer_auth(&app.bob_token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app
            .client
            .post(format!("{}/api/groups/{group_id}/join", app.base))
            .bearer_auth(&app.bob_token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .client
            .get(format!("{}/api/groups", app.base))
            .send()
            .await
            .unwrap();
        let groups: Vec<Value> = res.json().await.unwrap();
        assert_eq!(groups[0]["members"].as_array().unwrap().len(), 2);

        let res = app
            .client
            .post(format!("{}/api/users/log-study", app.base))
            .bearer_auth(&app.bob_token)
            .json(&json!({ "duration": 25 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let user: Value = res.json().await.unwrap();
        assert_eq!(user["xp"], 50);
        assert_eq!(user["currentStreak"], 1);
    }

    #[tokio::test]
    async fn registration_issues_a_working_token() {
        let app = spawn_app().await;
        let res = app
            .client
            .post(format!("{}/api/users/register", app.base))
            .json(&json!({ "name": "Cleo", "email": "cleo@example.com" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["user"]["email"], "cleo@example.com");

        let res = app
            .client
            .get(format!("{}/api/users/me", app.base))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let me: Value = res.json().await.unwrap();
        assert_eq!(me["id"], body["user"]["id"]);

        let res = app
            .client
            .post(format!("{}/api/users/register", app.base))
            .json(&json!({ "name": "Cleo again", "email": "CLEO@example.com" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .client
            .post(format!("{}/api/users/register", app.base))
            .json(&json!({ "name": "No mail" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_ids_are_not_found() {
        let app = spawn_app().await;
        let res = app
            .client
            .get(format!("{}/api/decks/not-an-id", app.base))
            .bearer_auth(&app.alice_token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value = res.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("not found"));

        let res = app
            .client
            .put(format!(
                "{}/api/decks/{}/cards/42/review",
                app.base, app.deck.id
            ))
            .bearer_auth(&app.alice_token)
            .json(&json!({ "confidence": "good" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .client
            .get(format!("{}/api/decks/not-an-id", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
