use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use std::collections::HashMap;
use std::sync::Arc;

use super::connection::handle_socket;
use crate::server::{JoinRequest, QuizServer};

/// Create the Axum router with WebSocket support.
///
/// `/ws` and `/api/ws` are identical; the latter exists for clients routed
/// through the HTTP API prefix.
pub fn create_router(cors_origins: &str) -> axum::Router<Arc<QuizServer>> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = if cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            tracing::warn!("No valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    axum::Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Legacy clients pass the join fields in the query string instead of a
/// first `join` frame.
pub(super) fn join_request_from_query(params: &HashMap<String, String>) -> Option<JoinRequest> {
    let room_id = params.get("roomId")?.clone();
    Some(JoinRequest {
        room_id,
        name: params.get("name").cloned(),
        host_token: params.get("hostToken").cloned(),
        player_token: params.get("playerToken").cloned(),
        room_password: params.get("roomPassword").cloned(),
        bearer_token: params.get("token").cloned(),
        client_id: params.get("clientId").cloned(),
    })
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(server): State<Arc<QuizServer>>,
) -> Response {
    let query_join = join_request_from_query(&params);
    ws.on_upgrade(move |socket| handle_socket(socket, server, query_join))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_handler(State(server): State<Arc<QuizServer>>) -> axum::Json<serde_json::Value> {
    let snapshot = server.metrics().snapshot();
    axum::Json(serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_join_requires_room_id() {
        let mut params = HashMap::new();
        assert!(join_request_from_query(&params).is_none());
        params.insert("roomId".to_string(), "ABCD1234".to_string());
        params.insert("name".to_string(), "Алиса".to_string());
        let request = join_request_from_query(&params).unwrap();
        assert_eq!(request.room_id, "ABCD1234");
        assert_eq!(request.name.as_deref(), Some("Алиса"));
        assert!(request.host_token.is_none());
    }
}
