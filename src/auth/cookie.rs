use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};

pub const REFRESH_COOKIE: &str = "refresh_token";

fn build(value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{REFRESH_COOKIE}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value carrying the refresh token for `max_age`.
pub fn refresh_cookie(token: &str, max_age: Duration, secure: bool) -> HeaderValue {
    // JWTs are base64url and dots, always valid header bytes
    HeaderValue::from_str(&build(token, max_age.as_secs(), secure))
        .unwrap_or_else(|_| clear_refresh_cookie(secure))
}

/// `Set-Cookie` value that makes the browser drop the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> HeaderValue {
    HeaderValue::from_str(&build("", 0, secure))
        .unwrap_or_else(|_| HeaderValue::from_static("refresh_token=; Max-Age=0; Path=/"))
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
