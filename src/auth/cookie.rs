use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};

pub const SESSION_COOKIE: &str = "session_key";

fn attributes(secure: bool) -> &'static str {
    if secure {
        "Path=/; HttpOnly; Secure; SameSite=Lax"
    } else {
        "Path=/; HttpOnly; SameSite=Lax"
    }
}

pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Max-Age={max_age_secs}; {}",
        attributes(secure)
    )
}

/// Overwrites the browser's session cookie with an already-expired empty one.
pub fn clearing_cookie(secure: bool) -> String {
    format!(
        "{SESSION_COOKIE}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; {}",
        attributes(secure)
    )
}

pub fn append(headers: &mut HeaderMap, cookie: &str) -> Result<(), axum::http::header::InvalidHeaderValue> {
    headers.append(SET_COOKIE, HeaderValue::from_str(cookie)?);
    Ok(())
}

/// Value of the session cookie across all `Cookie` headers; the first match wins.
pub fn read_session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
}
