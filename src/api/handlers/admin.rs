//! Admin file management.
//!
//! Reaching any of these endpoints allowlists the caller (`SOURCE=admin`);
//! authentication happens upstream. Mutations also need a verified MFA session
//! and answer `303 See Other` toward setup or verify otherwise.

use crate::{
    allowlist::EnrollSource,
    api::{
        handlers::{
            blocking, client_ip, internal_error, message, mfa::challenge, with_session,
            ADMIN_FILES_PATH,
        },
        session::Session,
        AppState,
    },
    mfa::MfaState,
    storage::StorageError,
    versioning::{DeleteOutcome, FileFamily, RestoreOutcome, StoreError},
};
use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, instrument};
use utoipa::{IntoParams, ToSchema};

pub const EVENT_DELETE: &str = "ADMIN DELETE";
pub const EVENT_DELETE_MISSING: &str = "ADMIN DELETE MISSING";
pub const EVENT_RESTORE: &str = "ADMIN RESTORE";
pub const EVENT_RESTORE_MISSING: &str = "ADMIN RESTORE MISSING";
pub const EVENT_CREATE: &str = "ADMIN CREATE FILE";

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Limit the listing to one allowed directory.
    pub directory: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct DirectoryListing {
    pub directory: String,
    pub families: Vec<FileFamily>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct Listing {
    pub mfa: MfaState,
    pub directories: Vec<DirectoryListing>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct FileAction {
    pub directory: String,
    pub file: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateFile {
    pub directory: String,
    pub new_filename: String,
    #[serde(default)]
    pub file_content: String,
    #[serde(default)]
    pub subfolder: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ActionResult {
    pub message: String,
    /// File the action produced, relative to the directory.
    pub file: Option<String>,
    /// Slot the previous current file moved to.
    pub displaced: Option<String>,
}

struct Admitted {
    ip: String,
    session: Session,
}

/// Allowlist the caller, then apply the MFA gate when `gated`.
async fn admit(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    gated: bool,
) -> Result<Admitted, Response> {
    let ip = client_ip(headers, connect_info, state.config.trust_proxy());
    let session = state.sessions.load(headers);

    let caller = ip.clone();
    let (session, decision) = blocking(state, move |state| {
        if let Err(e) = state.allowlist.add(&caller, EnrollSource::Admin) {
            error!("Failed to allowlist admin caller {caller}: {e}");
        }
        let mut session = session;
        let decision = gated.then(|| {
            state
                .mfa
                .require_or_challenge(&mut session.state, ADMIN_FILES_PATH)
        });
        (session, decision)
    })
    .await?;

    if let Some(response) = decision.as_ref().and_then(challenge) {
        return Err(with_session(state, &session, response));
    }
    Ok(Admitted { ip, session })
}

fn store_error(context: &str, err: &StoreError) -> Response {
    match err {
        StoreError::InvalidDirectory(_)
        | StoreError::InvalidFileName(_)
        | StoreError::InvalidSubfolder(_)
        | StoreError::VersionedName(_)
        | StoreError::NotVersioned(_)
        | StoreError::PathEscape(_) => message(StatusCode::BAD_REQUEST, &err.to_string()),
        StoreError::Storage(StorageError::LockTimeout(_)) => {
            message(StatusCode::SERVICE_UNAVAILABLE, "Directory is busy, retry")
        }
        StoreError::Storage(_) | StoreError::Io { .. } => internal_error(context, err),
    }
}

fn result(message: impl Into<String>, file: Option<String>, displaced: Option<String>) -> Response {
    Json(ActionResult {
        message: message.into(),
        file,
        displaced,
    })
    .into_response()
}

#[utoipa::path(
    get,
    path= "/v1/admin/files",
    params(ListQuery),
    responses (
        (status = 200, description = "Files grouped into version families", body = Listing),
        (status = 400, description = "Invalid directory"),
    ),
    tag = "admin",
)]
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let admitted = match admit(&state, &headers, connect_info.as_ref(), false).await {
        Ok(admitted) => admitted,
        Err(response) => return response,
    };

    let directories = match query.directory {
        Some(directory) if !state.store.is_allowed_directory(&directory) => {
            return with_session(
                &state,
                &admitted.session,
                message(StatusCode::BAD_REQUEST, "Invalid directory"),
            );
        }
        Some(directory) => vec![directory],
        None => state.store.directories().to_vec(),
    };

    let session = admitted.session;
    let listed = blocking(&state, move |state| {
        let mut session = session;
        let mfa = state.mfa.state(&mut session.state);
        let listing = directories
            .into_iter()
            .map(|directory| {
                state
                    .store
                    .list_families(&directory)
                    .map(|families| DirectoryListing {
                        directory,
                        families,
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|directories| Listing { mfa, directories });
        (session, listing)
    })
    .await;

    match listed {
        Ok((session, Ok(listing))) => with_session(&state, &session, Json(listing).into_response()),
        Ok((session, Err(e))) => {
            with_session(&state, &session, store_error("Failed to list files", &e))
        }
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path= "/v1/admin/files/restore",
    request_body = FileAction,
    responses (
        (status = 200, description = "Version promoted to current", body = ActionResult),
        (status = 303, description = "MFA setup or verification required"),
        (status = 400, description = "Invalid directory or file"),
        (status = 404, description = "Version no longer exists"),
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn restore(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<FileAction>>,
) -> Response {
    let Admitted { ip, session } =
        match admit(&state, &headers, connect_info.as_ref(), true).await {
            Ok(admitted) => admitted,
            Err(response) => return response,
        };
    let Some(Json(action)) = payload else {
        return with_session(
            &state,
            &session,
            message(StatusCode::BAD_REQUEST, "Missing payload"),
        );
    };
    if !state.store.is_allowed_directory(&action.directory) {
        return with_session(
            &state,
            &session,
            message(StatusCode::BAD_REQUEST, "Invalid directory"),
        );
    }

    let response = match blocking(&state, move |state| {
        let outcome = state.store.restore(&action.directory, &action.file);
        match &outcome {
            Ok(RestoreOutcome::Restored { restored_as, .. }) => {
                let restored = format!("{} -> {restored_as}", action.file);
                state.upload_log.record(
                    EVENT_RESTORE,
                    &[
                        ("IP", ip.as_str()),
                        ("DIR", action.directory.as_str()),
                        ("RESTORED", restored.as_str()),
                    ],
                );
            }
            Ok(RestoreOutcome::Stale) => state.upload_log.record(
                EVENT_RESTORE_MISSING,
                &[
                    ("IP", ip.as_str()),
                    ("DIR", action.directory.as_str()),
                    ("FILE", action.file.as_str()),
                ],
            ),
            Err(_) => {}
        }
        (action.file, outcome)
    })
    .await
    {
        Ok((file, Ok(RestoreOutcome::Restored { restored_as, displaced }))) => result(
            format!("Restored {file} as {restored_as}"),
            Some(restored_as),
            displaced,
        ),
        Ok((_, Ok(RestoreOutcome::Stale))) => {
            message(StatusCode::NOT_FOUND, "Selected version no longer exists")
        }
        Ok((_, Err(e))) => store_error("Failed to restore file", &e),
        Err(response) => response,
    };
    with_session(&state, &session, response)
}

#[utoipa::path(
    post,
    path= "/v1/admin/files/delete",
    request_body = FileAction,
    responses (
        (status = 200, description = "File deleted", body = ActionResult),
        (status = 303, description = "MFA setup or verification required"),
        (status = 400, description = "Invalid directory or file"),
        (status = 404, description = "File already gone"),
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn delete(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<FileAction>>,
) -> Response {
    let Admitted { ip, session } =
        match admit(&state, &headers, connect_info.as_ref(), true).await {
            Ok(admitted) => admitted,
            Err(response) => return response,
        };
    let Some(Json(action)) = payload else {
        return with_session(
            &state,
            &session,
            message(StatusCode::BAD_REQUEST, "Missing payload"),
        );
    };
    if !state.store.is_allowed_directory(&action.directory) {
        return with_session(
            &state,
            &session,
            message(StatusCode::BAD_REQUEST, "Invalid directory"),
        );
    }

    let response = match blocking(&state, move |state| {
        let outcome = state.store.delete_version(&action.directory, &action.file);
        let event = match &outcome {
            Ok(DeleteOutcome::Deleted) => Some(EVENT_DELETE),
            Ok(DeleteOutcome::AlreadyGone) => Some(EVENT_DELETE_MISSING),
            Err(_) => None,
        };
        if let Some(event) = event {
            state.upload_log.record(
                event,
                &[
                    ("IP", ip.as_str()),
                    ("DIR", action.directory.as_str()),
                    ("FILE", action.file.as_str()),
                ],
            );
        }
        (action.file, outcome)
    })
    .await
    {
        Ok((file, Ok(DeleteOutcome::Deleted))) => result(format!("Deleted {file}"), None, None),
        Ok((_, Ok(DeleteOutcome::AlreadyGone))) => {
            message(StatusCode::NOT_FOUND, "Selected file no longer exists")
        }
        Ok((_, Err(e))) => store_error("Failed to delete file", &e),
        Err(response) => response,
    };
    with_session(&state, &session, response)
}

#[utoipa::path(
    post,
    path= "/v1/admin/files/create",
    request_body = CreateFile,
    responses (
        (status = 201, description = "File created, previous content versioned", body = ActionResult),
        (status = 303, description = "MFA setup or verification required"),
        (status = 400, description = "Invalid directory, subfolder or file name"),
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn create(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<CreateFile>>,
) -> Response {
    let Admitted { ip, session } =
        match admit(&state, &headers, connect_info.as_ref(), true).await {
            Ok(admitted) => admitted,
            Err(response) => return response,
        };
    let Some(Json(request)) = payload else {
        return with_session(
            &state,
            &session,
            message(StatusCode::BAD_REQUEST, "Missing payload"),
        );
    };
    if !state.store.is_allowed_directory(&request.directory) {
        return with_session(
            &state,
            &session,
            message(StatusCode::BAD_REQUEST, "Invalid directory"),
        );
    }

    let response = match blocking(&state, move |state| {
        let stored = state.store.create(
            &request.directory,
            request.subfolder.as_deref(),
            &request.new_filename,
            request.file_content.as_bytes(),
        );
        if stored.is_ok() {
            state.upload_log.record(
                EVENT_CREATE,
                &[
                    ("IP", ip.as_str()),
                    ("DIR", request.directory.as_str()),
                    ("FILE", request.new_filename.trim()),
                    ("SUBFOLDER", request.subfolder.as_deref().unwrap_or_default().trim()),
                ],
            );
        }
        stored
    })
    .await
    {
        Ok(Ok(stored)) => {
            let mut response = result(
                format!("Created {}", stored.final_name),
                Some(stored.final_name),
                stored.displaced,
            );
            *response.status_mut() = StatusCode::CREATED;
            response
        }
        Ok(Err(e)) => store_error("Failed to create file", &e),
        Err(response) => response,
    };
    with_session(&state, &session, response)
}
