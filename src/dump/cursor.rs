//! The server-side dump cursor protocol: create a context, pull batches by
//! number, delete the context when done.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::http::ManagedClient;

use super::error::DumpError;

/// A server-side dump context, created once per collection (or shard) and
/// torn down after the last batch.
#[derive(Debug, Clone)]
pub struct DumpContext {
    /// Opaque id returned by the server.
    pub id: String,
    /// Seconds the server will keep this context alive between batch requests.
    pub ttl_seconds: u64,
}

#[derive(Serialize)]
struct CreateContextRequest<'a> {
    collection: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    shard_id: Option<&'a str>,
    ttl: u64,
}

#[derive(Deserialize)]
struct CreateContextResponse {
    id: String,
    ttl: u64,
}

/// One batch pulled from a dump context: raw line-delimited document
/// payload plus whether more batches remain.
pub struct DumpBatch {
    /// Monotonically increasing batch number this payload corresponds to.
    pub batch_number: u64,
    /// Raw line-delimited JSON payload for this batch.
    pub payload: Vec<u8>,
    /// `true` if the server has more batches queued for this context.
    pub more: bool,
}

#[derive(Deserialize)]
struct BatchEnvelope {
    more: bool,
    #[serde(default)]
    result: String,
}

/// Opens a dump context for `collection` (and, in shard mode, `shard_id`).
///
/// # Errors
///
/// Returns [`DumpError::Client`] if the request fails or the server
/// response cannot be decoded.
#[instrument(skip(client), fields(collection))]
pub fn create_dump_context(
    client: &ManagedClient,
    collection: &str,
    shard_id: Option<&str>,
    ttl_seconds: u64,
) -> Result<DumpContext, DumpError> {
    let url = client.rewrite_location("/_api/replication/dump-batch");
    let body = CreateContextRequest { collection, shard_id, ttl: ttl_seconds };
    let response = client
        .authed(client.http().post(&url).json(&body))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    let decoded: CreateContextResponse = crate::http::check_and_decode(response)?;
    Ok(DumpContext { id: decoded.id, ttl_seconds: decoded.ttl })
}

/// Requests the next batch from `context`, passing `last_batch_acked` so the
/// server may release buffered state for earlier batches.
///
/// # Errors
///
/// Returns [`DumpError::Client`] on transport failure, or
/// [`DumpError::MalformedBatch`] if the response body is not valid UTF-8
/// line-delimited JSON with a `more` flag.
#[instrument(skip(client), fields(context_id = %context.id, batch_number))]
pub fn receive_next_batch(
    client: &ManagedClient,
    context: &DumpContext,
    batch_number: u64,
    last_batch_acked: u64,
) -> Result<DumpBatch, DumpError> {
    let url = client.rewrite_location(&format!(
        "/_api/replication/dump-next/{}?batch={batch_number}&lastBatch={last_batch_acked}",
        context.id
    ));
    let response = client
        .authed(client.http().post(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    let checked = crate::http::check_response(response)?;
    let more = checked
        .headers()
        .get("x-arango-replication-checkmore")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true")
        .unwrap_or(false);
    let bytes = checked
        .bytes()
        .map_err(|source| DumpError::Client(crate::http::ClientError::Decode { url: url.clone(), source }))?;
    if bytes.is_empty() {
        return Ok(DumpBatch { batch_number, payload: Vec::new(), more });
    }
    if let Ok(envelope) = serde_json::from_slice::<BatchEnvelope>(&bytes) {
        return Ok(DumpBatch { batch_number, payload: envelope.result.into_bytes(), more: envelope.more });
    }
    Ok(DumpBatch { batch_number, payload: bytes.to_vec(), more })
}

/// Deletes a dump context, best-effort tidy-up run even on the error path.
///
/// # Errors
///
/// Returns [`DumpError::Client`] if the request itself fails; a server
/// 404 (context already expired) is treated as success.
#[instrument(skip(client), fields(context_id = %context.id))]
pub fn delete_dump_context(client: &ManagedClient, context: &DumpContext) -> Result<(), DumpError> {
    let url = client.rewrite_location(&format!("/_api/replication/dump-batch/{}", context.id));
    let response = client
        .authed(client.http().delete(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(());
    }
    crate::http::check_response(response)?;
    Ok(())
}
