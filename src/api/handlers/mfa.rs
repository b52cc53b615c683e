use crate::{
    api::{
        handlers::{
            blocking, client_ip, internal_error, message, safe_redirect, see_other, with_session,
        },
        AppState,
    },
    mfa::{EnrollmentOutcome, MfaDecision, MfaError, MfaState, VerifyOutcome, SETUP_PATH},
};
use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{
        header::{CACHE_CONTROL, LOCATION},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, instrument, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaStatus {
    pub state: MfaState,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SetupStart {
    /// Base32 secret to enter into an authenticator app.
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct CodeRequest {
    /// Six-digit code from the authenticator.
    pub code: String,
    /// Local path to continue to after verification.
    pub redirect: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Verified {
    pub state: MfaState,
    pub redirect: String,
}

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
pub struct RedirectQuery {
    pub redirect: Option<String>,
}

/// 303 response for a gate decision; `None` when the request may proceed.
pub fn challenge(decision: &MfaDecision) -> Option<Response> {
    decision.location().map(|location| see_other(&location))
}

fn verify_challenge(target: &str) -> Response {
    challenge(&MfaDecision::RedirectToVerify {
        redirect: target.to_string(),
    })
    .unwrap_or_else(|| see_other(crate::mfa::VERIFY_PATH))
}

#[utoipa::path(
    get,
    path= "/v1/mfa/status",
    responses (
        (status = 200, description = "MFA state of the current session", body = MfaStatus)
    ),
    tag = "mfa",
)]
pub async fn status(Extension(state): Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = state.sessions.load(&headers);
    match blocking(&state, move |state| {
        let mut session = session;
        let mfa_state = state.mfa.state(&mut session.state);
        (session, mfa_state)
    })
    .await
    {
        Ok((session, mfa_state)) => with_session(
            &state,
            &session,
            Json(MfaStatus { state: mfa_state }).into_response(),
        ),
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path= "/v1/mfa/setup/start",
    responses (
        (status = 200, description = "Pending secret for enrollment", body = SetupStart),
        (status = 303, description = "A secret is enrolled; verify first"),
    ),
    tag = "mfa",
)]
/// Start enrollment. Repeated calls in one session return the same pending secret.
pub async fn setup_start(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let session = state.sessions.load(&headers);
    let (session, result) = match blocking(&state, move |state| {
        let mut session = session;
        let result = state.mfa.begin_enrollment(&mut session.state);
        (session, result)
    })
    .await
    {
        Ok(done) => done,
        Err(response) => return response,
    };

    let response = match result {
        Ok(enrollment) => (
            [(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
            Json(SetupStart {
                secret: enrollment.secret,
                otpauth_uri: enrollment.otpauth_uri,
            }),
        )
            .into_response(),
        Err(MfaError::VerificationRequired) => verify_challenge(SETUP_PATH),
        Err(e) => internal_error("Failed to start MFA setup", &e),
    };
    with_session(&state, &session, response)
}

#[utoipa::path(
    post,
    path= "/v1/mfa/setup/confirm",
    request_body = CodeRequest,
    responses (
        (status = 200, description = "Secret saved and session verified", body = Verified),
        (status = 303, description = "A secret is enrolled; verify first"),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid code"),
        (status = 409, description = "No enrollment in progress"),
        (status = 429, description = "Too many failed attempts"),
    ),
    tag = "mfa",
)]
#[instrument(skip_all)]
pub async fn setup_confirm(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<CodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return message(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let ip = client_ip(&headers, connect_info.as_ref(), state.config.trust_proxy());
    let session = state.sessions.load(&headers);

    let code = request.code.clone();
    let (session, result) = match blocking(&state, move |state| {
        let mut session = session;
        let result = state.mfa.confirm_enrollment(&mut session.state, &ip, &code);
        (session, result)
    })
    .await
    {
        Ok(done) => done,
        Err(response) => return response,
    };

    let response = match result {
        Ok(EnrollmentOutcome::Confirmed) => Json(Verified {
            state: MfaState::ConfiguredVerified,
            redirect: safe_redirect(request.redirect.as_deref()),
        })
        .into_response(),
        Ok(EnrollmentOutcome::InvalidCode) => message(StatusCode::UNAUTHORIZED, "Invalid code"),
        Ok(EnrollmentOutcome::NoPendingEnrollment) => {
            message(StatusCode::CONFLICT, "No enrollment in progress")
        }
        Ok(EnrollmentOutcome::Throttled) => {
            message(StatusCode::TOO_MANY_REQUESTS, "Too many failed attempts")
        }
        Err(MfaError::VerificationRequired) => verify_challenge(SETUP_PATH),
        Err(e) => internal_error("Failed to confirm MFA setup", &e),
    };
    with_session(&state, &session, response)
}

#[utoipa::path(
    get,
    path= "/v1/mfa/verify",
    params(RedirectQuery),
    responses (
        (status = 200, description = "Verification is required or already done", body = Verified),
        (status = 303, description = "No secret enrolled; set up first"),
    ),
    tag = "mfa",
)]
pub async fn verify_prompt(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RedirectQuery>,
) -> Response {
    let session = state.sessions.load(&headers);
    let (session, mfa_state) = match blocking(&state, move |state| {
        let mut session = session;
        let mfa_state = state.mfa.state(&mut session.state);
        (session, mfa_state)
    })
    .await
    {
        Ok(done) => done,
        Err(response) => return response,
    };

    let response = if mfa_state == MfaState::Unconfigured {
        see_other(SETUP_PATH)
    } else {
        Json(Verified {
            state: mfa_state,
            redirect: safe_redirect(query.redirect.as_deref()),
        })
        .into_response()
    };
    with_session(&state, &session, response)
}

#[utoipa::path(
    post,
    path= "/v1/mfa/verify",
    params(RedirectQuery),
    request_body = CodeRequest,
    responses (
        (status = 303, description = "Verified, continue to the redirect target; or no secret enrolled"),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid code"),
        (status = 429, description = "Too many failed attempts"),
    ),
    tag = "mfa",
)]
#[instrument(skip_all)]
pub async fn verify(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<RedirectQuery>,
    payload: Option<Json<CodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return message(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let ip = client_ip(&headers, connect_info.as_ref(), state.config.trust_proxy());
    let session = state.sessions.load(&headers);
    let redirect = safe_redirect(request.redirect.as_deref().or(query.redirect.as_deref()));

    let code = request.code;
    let log_ip = ip.clone();
    let (session, result) = match blocking(&state, move |state| {
        let mut session = session;
        let result = state.mfa.verify_code(&mut session.state, &ip, &code);
        (session, result)
    })
    .await
    {
        Ok(done) => done,
        Err(response) => return response,
    };

    let response = match result {
        Ok(VerifyOutcome::Verified) => {
            debug!("MFA verified for {log_ip}");
            let body = Json(Verified {
                state: MfaState::ConfiguredVerified,
                redirect: redirect.clone(),
            });
            match HeaderValue::from_str(&redirect) {
                Ok(location) => {
                    (StatusCode::SEE_OTHER, [(LOCATION, location)], body).into_response()
                }
                Err(_) => body.into_response(),
            }
        }
        Ok(VerifyOutcome::NotConfigured) => see_other(SETUP_PATH),
        Ok(VerifyOutcome::InvalidCode) => {
            warn!("Invalid MFA code from {log_ip}");
            message(StatusCode::UNAUTHORIZED, "Invalid code")
        }
        Ok(VerifyOutcome::Throttled) => {
            message(StatusCode::TOO_MANY_REQUESTS, "Too many failed attempts")
        }
        Err(e) => internal_error("Failed to verify MFA code", &e),
    };
    with_session(&state, &session, response)
}
