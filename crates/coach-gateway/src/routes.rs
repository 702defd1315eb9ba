use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};

use coach_types::models::UserId;

use crate::connection;
use crate::relay::Relay;

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected_users: usize,
    pub user_ids: Vec<UserId>,
}

/// Relay routes: the chat socket at `/ws` and a `/health` probe.
pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(relay)
}

/// User ids are positive integers; anything else fails the handshake.
pub fn parse_user_id(raw: &str) -> Option<UserId> {
    raw.trim().parse::<UserId>().ok().filter(|id| *id > 0)
}

async fn ws_upgrade(
    State(relay): State<Relay>,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = query.user_id.as_deref().and_then(parse_user_id);
    ws.on_upgrade(move |socket| async move {
        match user_id {
            Some(user_id) => connection::handle_connection(socket, relay, user_id).await,
            None => connection::reject(socket, "Missing userId parameter").await,
        }
    })
}

async fn health(State(relay): State<Relay>) -> Json<HealthResponse> {
    let registry = relay.registry();
    Json(HealthResponse {
        status: "ok",
        connected_users: registry.connected_count().await,
        user_ids: registry.connected_user_ids().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_must_be_positive_integer() {
        assert_eq!(parse_user_id("12"), Some(12));
        assert_eq!(parse_user_id(" 3 "), Some(3));
        assert_eq!(parse_user_id("0"), None);
        assert_eq!(parse_user_id("-4"), None);
        assert_eq!(parse_user_id("abc"), None);
        assert_eq!(parse_user_id(""), None);
    }

    #[tokio::test]
    async fn health_reports_connected_users() {
        use std::sync::Arc;

        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use coach_db::Database;
        use tower::ServiceExt;

        let db = Arc::new(Database::open_in_memory().unwrap());
        let relay = Relay::new(db.clone(), db);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        relay.accept(7, tx).await;

        let response = router(relay)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["connected_users"], 1);
        assert_eq!(value["user_ids"], serde_json::json!([7]));
    }
}
