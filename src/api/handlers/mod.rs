pub mod admin;
pub mod health;
pub mod mfa;
pub mod upload;
pub mod whitelist;

// common functions for the handlers
use crate::api::{session::Session, AppState};
use axum::{
    extract::ConnectInfo,
    http::{header::LOCATION, header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tracing::error;

pub const ADMIN_FILES_PATH: &str = "/v1/admin/files";
pub const UNKNOWN_IP: &str = "UNKNOWN";

/// Caller address: the socket peer, or the proxy headers when trusted.
pub fn client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(ip) = forwarded.or(real_ip) {
            return ip.to_string();
        }
    }

    connect_info.map_or_else(
        || UNKNOWN_IP.to_string(),
        |ConnectInfo(addr)| addr.ip().to_canonical().to_string(),
    )
}

/// Keep only local absolute paths; anything else falls back to the admin page.
pub fn safe_redirect(target: Option<&str>) -> String {
    match target.map(str::trim) {
        Some(target)
            if target.starts_with('/')
                && !target.starts_with("//")
                && !target.contains('\\')
                && !target.chars().any(char::is_control) =>
        {
            target.to_string()
        }
        _ => ADMIN_FILES_PATH.to_string(),
    }
}

/// JSON body with a `message` field.
pub fn message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

pub fn see_other(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::SEE_OTHER, [(LOCATION, value)]).into_response(),
        Err(e) => {
            error!("Invalid redirect location {location:?}: {e}");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Invalid redirect")
        }
    }
}

pub fn internal_error(context: &str, err: &dyn std::fmt::Display) -> Response {
    error!("{context}: {err}");
    message(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// Persist the session and, when it was kept, attach its cookie to `response`.
pub fn with_session(state: &AppState, session: &Session, mut response: Response) -> Response {
    if !state.sessions.save(session) {
        return response;
    }
    if let Some(cookie) = state.sessions.cookie(session) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// Run file-backed work off the async executor.
pub async fn blocking<F, R>(state: &Arc<AppState>, work: F) -> Result<R, Response>
where
    F: FnOnce(&AppState) -> R + Send + 'static,
    R: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| internal_error("Background task failed", &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn client_ip_prefers_socket_unless_proxy_trusted() {
        let peer = ConnectInfo(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 9), 4000)));
        let proxied = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);

        assert_eq!(client_ip(&proxied, Some(&peer), false), "10.0.0.9");
        assert_eq!(client_ip(&proxied, Some(&peer), true), "203.0.113.7");
        assert_eq!(
            client_ip(&headers(&[("x-real-ip", "198.51.100.2")]), Some(&peer), true),
            "198.51.100.2"
        );
        assert_eq!(client_ip(&HeaderMap::new(), None, true), UNKNOWN_IP);
    }

    #[test]
    fn client_ip_unmaps_ipv4() {
        let mapped = Ipv4Addr::LOCALHOST.to_ipv6_mapped();
        let peer = ConnectInfo(SocketAddr::from((mapped, 4000)));
        assert_eq!(client_ip(&HeaderMap::new(), Some(&peer), false), "127.0.0.1");

        let v6 = ConnectInfo(SocketAddr::from((Ipv6Addr::LOCALHOST, 4000)));
        assert_eq!(client_ip(&HeaderMap::new(), Some(&v6), false), "::1");
    }

    #[test]
    fn redirects_stay_local() {
        assert_eq!(
            safe_redirect(Some("/v1/admin/files?directory=uploads")),
            "/v1/admin/files?directory=uploads"
        );
        for bad in [
            None,
            Some(""),
            Some("https://evil.example"),
            Some("//evil.example"),
            Some("/\\evil.example"),
            Some("admin"),
            Some("/a\r\nSet-Cookie: x"),
        ] {
            assert_eq!(safe_redirect(bad), ADMIN_FILES_PATH, "{bad:?}");
        }
    }
}
