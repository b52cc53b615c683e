use crate::GIT_COMMIT_HASH;
use axum::{
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is up", body = Health)
    ),
    tag = "health",
)]
// axum handler for health
pub async fn health() -> impl IntoResponse {
    let body = Json(Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let short_hash = GIT_COMMIT_HASH.get(0..7).unwrap_or_default();

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )) {
        headers.insert("X-App", value);
    }

    (headers, body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};

    #[tokio::test]
    async fn health_reports_build() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let app = response.headers().get("X-App").unwrap().to_str().unwrap();
        assert!(app.starts_with(concat!(env!("CARGO_PKG_NAME"), ":", env!("CARGO_PKG_VERSION"))));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: Health = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.name, env!("CARGO_PKG_NAME"));
        assert_eq!(health.commit, GIT_COMMIT_HASH);
    }
}
