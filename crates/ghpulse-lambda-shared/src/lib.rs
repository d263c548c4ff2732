/**
 * ghpulse-lambda-shared contains common helper functions and utilities for all ghpulse lambdas
 */
use lambda_http::http::HeaderMap;
use lambda_http::{Body, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::log::*;

pub mod config;
pub mod trigger;

pub use config::*;
pub use trigger::*;

/// Header carrying the preshared secret for mutating requests
pub const SECRET_HEADER: &str = "x-ghpulse-secret";

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("missing `x-ghpulse-secret` header")]
    Missing,
    #[error("invalid authorization")]
    Invalid,
}

impl AuthError {
    pub fn status(&self) -> u16 {
        401
    }
}

/**
 * Compare the preshared secret header of a request against the expected secret.
 *
 * An empty expected secret never matches, so an unconfigured function refuses everything.
 */
pub fn check_secret(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let provided = headers
        .get(SECRET_HEADER)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Invalid)?;

    if expected.is_empty() || provided != expected {
        warn!("Rejecting a request with an invalid secret");
        return Err(AuthError::Invalid);
    }
    Ok(())
}

/// Build a plain text response
pub fn respond(status: u16, body: impl Into<Body>) -> Result<Response<Body>, lambda_http::Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(body.into())
        .map_err(Box::new)?)
}

/// Build a JSON response from any serializable value
pub fn respond_json<T: Serialize>(
    status: u16,
    value: &T,
) -> Result<Response<Body>, lambda_http::Error> {
    let body = serde_json::to_string(value)?;
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(body.into())
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_http::http::HeaderValue;

    fn headers(secret: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret {
            headers.insert(SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
        }
        headers
    }

    #[test]
    fn test_check_secret() {
        assert_eq!(Ok(()), check_secret(&headers(Some("hunter2")), "hunter2"));
        assert_eq!(
            Err(AuthError::Invalid),
            check_secret(&headers(Some("hunter3")), "hunter2")
        );
        assert_eq!(
            Err(AuthError::Missing),
            check_secret(&headers(None), "hunter2")
        );
    }

    #[test]
    fn test_unconfigured_secret_rejects() {
        assert_eq!(Err(AuthError::Invalid), check_secret(&headers(Some("")), ""));
    }

    #[test]
    fn test_respond_json() {
        let response = respond_json(201, &serde_json::json!({"paths": []})).unwrap();
        assert_eq!(201, response.status().as_u16());
        assert_eq!(
            "application/json",
            response.headers()["content-type"].to_str().unwrap()
        );
        match response.body() {
            Body::Text(text) => assert_eq!(r#"{"paths":[]}"#, text.as_str()),
            other => panic!("Unexpected body {other:?}"),
        }
    }
}
