use crate::{
    api::{
        handlers::{blocking, client_ip},
        AppState,
    },
    versioning::{StoreError, Stored},
};
use axum::{
    extract::{multipart::Field, ConnectInfo, Extension, Multipart},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

pub const EVENT_BLOCK_ALLOWLIST: &str = "BLOCK IP NOT IN ALLOWLIST";
pub const EVENT_BLOCK_API: &str = "BLOCK INVALID API";
pub const EVENT_RATE_LIMIT: &str = "RATE LIMIT HIT";
pub const EVENT_BLOCK_DIR: &str = "BLOCK INVALID DIR";
pub const EVENT_NO_FILE: &str = "FAIL NO FILE";
pub const EVENT_FAIL: &str = "FAIL UPLOAD";
pub const EVENT_SUCCESS: &str = "SUCCESS";

const DEFAULT_DIRECTORY: &str = "uploads";
const DEFAULT_SOURCE: &str = "powershell";
const DEFAULT_COMPUTER: &str = "N/A";

/// Multipart form accepted by the upload endpoint.
#[derive(ToSchema, Deserialize, Debug)]
pub struct UploadForm {
    /// Shared API key.
    pub api: String,
    /// Allowed directory, `uploads` when absent.
    pub directory: Option<String>,
    /// Client label, `powershell` when absent.
    pub source: Option<String>,
    /// Reporting machine name.
    pub computer: Option<String>,
    #[serde(rename = "fileToUpload")]
    #[schema(value_type = String, format = Binary)]
    pub file_to_upload: Vec<u8>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct UploadReply {
    /// `success`, `blocked`, `ratelimited` or `error`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displaced: Option<String>,
}

#[derive(Debug, Default)]
struct Form {
    api: Option<String>,
    pub directory: Option<String>,
    pub source: Option<String>,
    pub computer: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

fn reply(status: StatusCode, kind: &str, reason: &str) -> Response {
    (
        status,
        Json(UploadReply {
            status: kind.to_string(),
            reason: Some(reason.to_string()),
            ..UploadReply::default()
        }),
    )
        .into_response()
}

/// Last path segment of a client-supplied file name.
fn basename(name: &str) -> &str {
    name.rsplit(&['/', '\\'][..]).next().unwrap_or(name).trim()
}

async fn text(field: Field<'_>) -> Option<String> {
    field.text().await.ok()
}

async fn read_form(mut multipart: Multipart) -> Result<Form, String> {
    let mut form = Form::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "api" => form.api = text(field).await,
            "directory" => form.directory = text(field).await,
            "source" => form.source = text(field).await,
            "computer" => form.computer = text(field).await,
            "fileToUpload" => {
                let file_name = field.file_name().map(str::to_string).unwrap_or_default();
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                if !file_name.is_empty() {
                    form.file = Some((file_name, bytes.to_vec()));
                }
            }
            other => debug!("Ignoring upload field {other:?}"),
        }
    }
    Ok(form)
}

#[utoipa::path(
    post,
    path= "/v1/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses (
        (status = 200, description = "File stored", body = UploadReply),
        (status = 400, description = "Invalid directory, file name or form", body = UploadReply),
        (status = 403, description = "Caller not allowlisted or wrong API key", body = UploadReply),
        (status = 429, description = "Upload rate limit reached", body = UploadReply),
    ),
    tag = "upload",
)]
/// Store an uploaded file, versioning any file it replaces.
///
/// Checks run in order: allowlist, API key, per-IP rate limit, directory.
#[instrument(skip_all)]
pub async fn upload(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: axum::http::HeaderMap,
    multipart: Multipart,
) -> Response {
    let ip = client_ip(&headers, connect_info.as_ref(), state.config.trust_proxy());
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => {
            warn!("Malformed upload from {ip}: {e}");
            return reply(StatusCode::BAD_REQUEST, "error", "Malformed form data");
        }
    };

    match blocking(&state, move |state| accept(state, &ip, form)).await {
        Ok(response) | Err(response) => response,
    }
}

fn accept(state: &AppState, ip: &str, form: Form) -> Response {
    let source = form
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    let log = &state.upload_log;

    if !state.allowlist.is_allowed(ip) {
        warn!("Upload blocked: {ip} is not allowlisted");
        log.record(EVENT_BLOCK_ALLOWLIST, &[("IP", ip), ("SRC", source.as_str())]);
        return reply(StatusCode::FORBIDDEN, "blocked", "IP not allowed");
    }

    if form.api.as_deref() != Some(state.config.api_key().expose_secret()) {
        warn!("Upload blocked: invalid API key from {ip}");
        log.record(EVENT_BLOCK_API, &[("IP", ip), ("SRC", source.as_str())]);
        return reply(StatusCode::FORBIDDEN, "blocked", "Invalid API Key");
    }

    let limit = state.config.upload_rate_limit();
    if limit > 0 {
        let since = Utc::now() - Duration::seconds(state.config.upload_rate_window_seconds());
        let recent = log
            .entries_since(since)
            .iter()
            .filter(|entry| entry.has_field("IP", ip))
            .count();
        if recent >= limit {
            warn!("Upload rate limit hit by {ip} ({recent} in window)");
            state
                .rate_limit_log
                .record(EVENT_RATE_LIMIT, &[("IP", ip), ("SRC", source.as_str())]);
            return reply(
                StatusCode::TOO_MANY_REQUESTS,
                "ratelimited",
                "Upload limit reached, retry later",
            );
        }
    }

    let directory = form
        .directory
        .unwrap_or_else(|| DEFAULT_DIRECTORY.to_string());
    if !state.store.is_allowed_directory(&directory) {
        log.record(EVENT_BLOCK_DIR, &[("IP", ip), ("DIR", directory.as_str())]);
        return reply(StatusCode::BAD_REQUEST, "blocked", "Invalid directory");
    }

    let Some((name, bytes)) = form.file else {
        log.record(EVENT_NO_FILE, &[("IP", ip), ("SRC", source.as_str())]);
        return reply(StatusCode::BAD_REQUEST, "error", "No file uploaded");
    };
    let file_name = basename(&name).to_string();
    let computer = form
        .computer
        .unwrap_or_else(|| DEFAULT_COMPUTER.to_string());
    let fields = [
        ("IP", ip),
        ("FILE", file_name.as_str()),
        ("SRC", source.as_str()),
        ("PC", computer.as_str()),
    ];

    match state.store.store_versioned(&directory, &file_name, &bytes) {
        Ok(Stored {
            final_name,
            displaced,
        }) => {
            log.record(EVENT_SUCCESS, &fields);
            if source == DEFAULT_SOURCE {
                state.powershell_log.record(EVENT_SUCCESS, &fields);
            }
            info!("Upload {directory}/{final_name} from {ip} ({source})");
            Json(UploadReply {
                status: "success".to_string(),
                file: Some(final_name),
                source: Some(source),
                displaced,
                ..UploadReply::default()
            })
            .into_response()
        }
        Err(e) => {
            log.record(EVENT_FAIL, &fields);
            let status = match e {
                StoreError::InvalidFileName(_)
                | StoreError::VersionedName(_)
                | StoreError::PathEscape(_) => StatusCode::BAD_REQUEST,
                _ => {
                    error!("Upload of {file_name} from {ip} failed: {e}");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            reply(status, "error", &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_client_paths() {
        assert_eq!(basename("report.csv"), "report.csv");
        assert_eq!(basename("C:\\Users\\me\\report.csv"), "report.csv");
        assert_eq!(basename("../../etc/passwd"), "passwd");
        assert_eq!(basename("dir/"), "");
    }
}
