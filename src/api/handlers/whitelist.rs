use crate::{
    allowlist::EnrollDecision,
    api::{
        handlers::{blocking, client_ip, internal_error, message},
        AppState,
    },
};
use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct WhitelistRequest {
    password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WhitelistReply {
    pub ip: String,
    pub message: String,
}

#[utoipa::path(
    post,
    path= "/v1/whitelist",
    request_body = WhitelistRequest,
    responses (
        (status = 200, description = "Caller added to the allowlist", body = WhitelistReply),
        (status = 400, description = "Missing payload or unknown caller address"),
        (status = 403, description = "Wrong password"),
        (status = 429, description = "Already enrolled within the last hour"),
    ),
    tag = "whitelist",
)]
/// Password-gated self-enrollment of the calling address.
#[instrument(skip_all)]
pub async fn whitelist(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<WhitelistRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return message(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let ip = client_ip(&headers, connect_info.as_ref(), state.config.trust_proxy());
    if ip == super::UNKNOWN_IP {
        return message(StatusCode::BAD_REQUEST, "Cannot determine caller address");
    }

    let caller = ip.clone();
    let decision = match blocking(&state, move |state| {
        state.allowlist.self_enroll(&caller, &request.password)
    })
    .await
    {
        Ok(decision) => decision,
        Err(response) => return response,
    };

    match decision {
        Ok(EnrollDecision::Enrolled) => Json(WhitelistReply {
            message: format!("{ip} added to the allowlist"),
            ip,
        })
        .into_response(),
        Ok(EnrollDecision::WrongPassword) => message(StatusCode::FORBIDDEN, "Wrong password"),
        Ok(EnrollDecision::RateLimited) => message(
            StatusCode::TOO_MANY_REQUESTS,
            "This address was already enrolled within the last hour",
        ),
        Err(e) => internal_error("Failed to update the allowlist", &e),
    }
}
