//! Uniform classification of server responses.
//!
//! Every endpoint used by the dump/restore protocol can fail the same way:
//! transport error, non-2xx status with an ArangoDB error envelope, or a
//! 2xx status whose body does not parse. Centralizing that here means job
//! code only ever sees "got `T`" or "got a `ClientError`".

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::error::ClientError;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

/// Turns a raw `reqwest::blocking::Response` into `Ok(Response)` if its
/// status is successful, or a descriptive [`ClientError::ServerError`]
/// otherwise. Consumes the response on the error path to read its body.
///
/// # Errors
///
/// Returns [`ClientError::ServerError`] for any non-2xx status.
pub fn check_response(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error_message)
        .unwrap_or(body);
    Err(ClientError::ServerError { url, status, message })
}

/// Checks the response status, then decodes the body as `T`.
///
/// # Errors
///
/// Returns [`ClientError::ServerError`] for a non-2xx status, or
/// [`ClientError::Decode`] if the body does not parse as `T`.
pub fn check_and_decode<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T, ClientError> {
    let response = check_response(response)?;
    let url = response.url().to_string();
    response.json::<T>().map_err(|source| ClientError::Decode { url, source })
}
