#![allow(clippy::needless_for_each)]

use crate::{
    allowlist::IpAllowlist,
    audit::AuditLog,
    config::Config,
    mfa::{MfaSession, SETUP_PATH, VERIFY_PATH},
    versioning::VersionedFileStore,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use handlers::{admin, health, mfa, upload, whitelist, ADMIN_FILES_PATH};
use session::SessionStore;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod handlers;
pub mod session;

const UPLOAD_BODY_LIMIT: usize = 256 * 1024 * 1024;

/// Components shared by every handler.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub store: VersionedFileStore,
    pub allowlist: IpAllowlist,
    pub mfa: MfaSession,
    pub sessions: SessionStore,
    pub upload_log: AuditLog,
    pub rate_limit_log: AuditLog,
    pub powershell_log: AuditLog,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            store: config.file_store(),
            allowlist: config.allowlist(),
            mfa: config.mfa_session(),
            sessions: SessionStore::new(Duration::from_secs(config.session_ttl_seconds())),
            upload_log: config.upload_log(),
            rate_limit_log: config.rate_limit_log(),
            powershell_log: config.powershell_log(),
            config,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        mfa::status,
        mfa::setup_start,
        mfa::setup_confirm,
        mfa::verify_prompt,
        mfa::verify,
        admin::list,
        admin::restore,
        admin::delete,
        admin::create,
        upload::upload,
        whitelist::whitelist,
    ),
    components(schemas(
        health::Health,
        mfa::MfaStatus,
        mfa::SetupStart,
        mfa::CodeRequest,
        mfa::Verified,
        admin::Listing,
        admin::DirectoryListing,
        admin::FileAction,
        admin::CreateFile,
        admin::ActionResult,
        upload::UploadForm,
        upload::UploadReply,
        whitelist::WhitelistRequest,
        whitelist::WhitelistReply,
    )),
    tags(
        (name = "filegate", description = "Versioned uploads behind TOTP and an IP allowlist")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn openapi_json() -> impl IntoResponse {
    Json(openapi())
}

/// Build the application router around `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/v1/mfa/status", get(mfa::status))
        .route(SETUP_PATH, get(mfa::setup_start).post(mfa::setup_start))
        .route("/v1/mfa/setup/confirm", post(mfa::setup_confirm))
        .route(VERIFY_PATH, get(mfa::verify_prompt).post(mfa::verify))
        .route(ADMIN_FILES_PATH, get(admin::list))
        .route("/v1/admin/files/restore", post(admin::restore))
        .route("/v1/admin/files/delete", post(admin::delete))
        .route("/v1/admin/files/create", post(admin::create))
        .route(
            "/v1/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/v1/whitelist", post(whitelist::whitelist))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
        .route("/health", get(health::health).options(health::health))
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn serve(port: u16, config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config));
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let doc = openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for path in [
            "/health",
            "/v1/mfa/status",
            SETUP_PATH,
            "/v1/mfa/setup/confirm",
            VERIFY_PATH,
            ADMIN_FILES_PATH,
            "/v1/admin/files/restore",
            "/v1/admin/files/delete",
            "/v1/admin/files/create",
            "/v1/upload",
            "/v1/whitelist",
        ] {
            assert!(paths.contains(&path), "{path} missing from {paths:?}");
        }
    }
}
