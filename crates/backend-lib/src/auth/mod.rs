// ============================
// livecollab-backend-lib/src/auth/mod.rs
// ============================
//! Connection admission: credential extraction from the handshake.
//!
//! A token reaches the server through one of two carriers: an explicit
//! `token` query parameter supplied at connect time, or the session cookie
//! set by the credential issuer. The explicit carrier wins when both are
//! present. Extraction happens before the WebSocket upgrade, so a rejected
//! attempt never reaches room handling.

pub mod verifier;

pub use verifier::{CredentialVerifier, InMemoryUserDirectory, JwtVerifier, UserDirectory};

use axum::http::HeaderMap;

use crate::error::AppError;

/// Name of the session cookie carrying the bearer token.
pub const SESSION_COOKIE: &str = "jwt";

/// Pick the bearer token out of a connection attempt.
///
/// Preference order: explicit connect-time token, then the `jwt` cookie
/// from the handshake's `Cookie` header. Neither present is an admission
/// failure.
pub fn extract_token(auth_param: Option<&str>, headers: &HeaderMap) -> Result<String, AppError> {
    if let Some(token) = auth_param {
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    let cookie_header = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::NoCredential)?;

    cookie_value(cookie_header, SESSION_COOKIE).ok_or(AppError::NoCredential)
}

/// Minimal `Cookie` header parsing: `name=value` pairs separated by `;`.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k.trim() == name && !v.trim().is_empty() {
            Some(v.trim().to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, value.parse().unwrap());
        headers
    }

    #[test]
    fn explicit_token_wins_over_cookie() {
        let headers = headers_with_cookie("jwt=cookie-token");
        let token = extract_token(Some("query-token"), &headers).unwrap();
        assert_eq!(token, "query-token");
    }

    #[test]
    fn falls_back_to_session_cookie() {
        let headers = headers_with_cookie("theme=dark; jwt=cookie-token; lang=en");
        let token = extract_token(None, &headers).unwrap();
        assert_eq!(token, "cookie-token");
    }

    #[test]
    fn empty_explicit_token_falls_back() {
        let headers = headers_with_cookie("jwt=cookie-token");
        let token = extract_token(Some(""), &headers).unwrap();
        assert_eq!(token, "cookie-token");
    }

    #[test]
    fn missing_both_carriers_is_no_credential() {
        let headers = HeaderMap::new();
        let err = extract_token(None, &headers).unwrap_err();
        assert!(matches!(err, AppError::NoCredential));
    }

    #[test]
    fn cookie_without_session_entry_is_no_credential() {
        let headers = headers_with_cookie("theme=dark");
        let err = extract_token(None, &headers).unwrap_err();
        assert!(matches!(err, AppError::NoCredential));
    }

    #[test]
    fn cookie_parsing_handles_whitespace() {
        assert_eq!(
            cookie_value("a=1;  jwt = tok ; b=2", "jwt"),
            Some("tok".to_string())
        );
        assert_eq!(cookie_value("jwt=", "jwt"), None);
        assert_eq!(cookie_value("", "jwt"), None);
    }
}
