use axum::{
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    admin_routes::admin_routes,
    auth::extract_token,
    chat_routes::chat_routes,
    error::ApiError,
    state::AppState,
    user_routes::user_routes,
    ws_connection::WebSocketConnection,
};

/// 附件与头像上传的请求体上限
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/user", user_routes())
        .nest("/chat", chat_routes())
        .nest("/admin", admin_routes())
}

/// 浏览器客户端需要携带 Cookie，因此只允许配置中的来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.connection_count(),
        "pendingWrites": state.pipeline.persistence().pending(),
    }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 认证在升级之前完成；失败时返回 401，注册表不受影响
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = extract_token(&headers, query.token.as_deref());
    let live = state.lifecycle.connect(token.as_deref()).await?;

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, live).run()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use application::memory::PlaintextPasswordHasher;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use config::AppConfig;
    use tower::ServiceExt;

    use super::*;
    use crate::state::Collaborators;

    fn app() -> Router {
        let collaborators = Collaborators::in_memory(Arc::new(PlaintextPasswordHasher));
        let (state, _worker) = AppState::assemble(collaborators, AppConfig::default());
        router(state)
    }

    #[tokio::test]
    async fn health_is_served() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_with_credentials() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/user/me")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn unknown_origin_is_not_echoed() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/user/me")
            .header(header::ORIGIN, "http://evil.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
