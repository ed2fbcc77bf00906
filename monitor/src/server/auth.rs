//! Bearer token check for write endpoints

use crate::audit;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,
    #[error("Invalid authorization header encoding")]
    BadEncoding,
    #[error("Missing Bearer prefix")]
    MissingBearer,
    #[error("Invalid token")]
    InvalidToken,
}

impl AuthError {
    fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing authorization header",
            AuthError::BadEncoding => "invalid authorization header encoding",
            AuthError::MissingBearer => "missing Bearer prefix",
            AuthError::InvalidToken => "invalid token",
        }
    }
}

/// Validate `authorization: Bearer <token>` against `expected_token`.
///
/// If `expected_token` is `None`, authentication is disabled and all requests pass.
pub fn check_bearer(headers: &HeaderMap, expected_token: Option<&str>, path: &str) -> Result<(), AuthError> {
    let result = verify(headers, expected_token);
    match &result {
        Ok(()) => audit::ingest_auth_success(path),
        Err(e) => audit::ingest_auth_failure(path, e.reason()),
    }
    result
}

fn verify(headers: &HeaderMap, expected_token: Option<&str>) -> Result<(), AuthError> {
    let Some(expected) = expected_token else {
        return Ok(());
    };
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingHeader)?;
    let value = value.to_str().map_err(|_| AuthError::BadEncoding)?;
    let token = value.strip_prefix("Bearer ").ok_or(AuthError::MissingBearer)?;
    if token == expected {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(auth: Option<&'static str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(v) = auth {
            map.insert(AUTHORIZATION, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_auth_disabled() {
        assert!(check_bearer(&headers(None), None, "/api/transaction").is_ok());
    }

    #[test]
    fn test_valid_token() {
        let h = headers(Some("Bearer secret123"));
        assert!(check_bearer(&h, Some("secret123"), "/api/transaction").is_ok());
    }

    #[test]
    fn test_invalid_token() {
        let h = headers(Some("Bearer wrong"));
        assert_eq!(
            check_bearer(&h, Some("secret123"), "/api/transaction"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(
            check_bearer(&headers(None), Some("secret123"), "/api/evaluate"),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn test_missing_bearer_prefix() {
        let h = headers(Some("secret123"));
        assert_eq!(
            check_bearer(&h, Some("secret123"), "/api/transaction"),
            Err(AuthError::MissingBearer)
        );
    }
}
