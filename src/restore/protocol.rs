//! The server-side restore protocol: create-collection, send-data, and
//! restore-indexes requests, plus the auto-create-database handshake.
//!
//! Query parameters and body shapes are grounded on ArangoDB's
//! `arangorestore` client (`RestoreFeature.cpp`): `restore-collection` takes
//! the full `{parameters, indexes}` structure as its body and only appends
//! `numberOfShards`/`replicationFactor` when the structure itself omits
//! them and the target is a cluster; `restore-data` takes the raw chunk
//! bytes as its body with the collection name as a query parameter;
//! `restore-indexes` takes the same full structure body as
//! `restore-collection`.

use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::http::ManagedClient;

use super::error::RestoreError;

/// Sends one collection's `{parameters, indexes}` structure to
/// `restore-collection`.
///
/// # Errors
///
/// Returns [`RestoreError::Client`] if the request fails or the server
/// rejects it with a non-2xx status.
#[instrument(skip(client, structure), fields(collection))]
#[allow(clippy::too_many_arguments)]
pub(super) fn send_restore_collection(
    client: &ManagedClient,
    structure: &Value,
    overwrite: bool,
    force: bool,
    ignore_distribute_shards_like_errors: bool,
    cluster_mode: bool,
    default_number_of_shards: u64,
    default_replication_factor: u64,
) -> Result<(), RestoreError> {
    let mut url = client.rewrite_location(&format!(
        "/_api/replication/restore-collection?overwrite={overwrite}&force={force}&ignoreDistributeShardsLikeErrors={ignore_distribute_shards_like_errors}"
    ));
    if cluster_mode {
        let parameters = structure.get("parameters");
        let has_shards = parameters.and_then(|p| p.get("shards")).is_some()
            || parameters.and_then(|p| p.get("numberOfShards")).is_some();
        if !has_shards {
            url.push_str(&format!("&numberOfShards={default_number_of_shards}"));
        }
        let has_replication_factor = parameters.and_then(|p| p.get("replicationFactor")).is_some();
        if !has_replication_factor {
            url.push_str(&format!("&replicationFactor={default_replication_factor}"));
        }
    }
    let response = client
        .authed(client.http().put(&url).json(structure))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    crate::http::check_response(response)?;
    Ok(())
}

/// Sends one collection's full structure to `restore-indexes`.
///
/// # Errors
///
/// Returns [`RestoreError::Client`] if the request fails or the server
/// rejects it with a non-2xx status.
#[instrument(skip(client, structure), fields(collection))]
pub(super) fn send_restore_indexes(client: &ManagedClient, structure: &Value, force: bool) -> Result<(), RestoreError> {
    let url = client.rewrite_location(&format!("/_api/replication/restore-indexes?force={force}"));
    let response = client
        .authed(client.http().put(&url).json(structure))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    crate::http::check_response(response)?;
    Ok(())
}

/// Sends one raw, newline-delimited chunk of `collection`'s data to
/// `restore-data`.
///
/// # Errors
///
/// Returns [`RestoreError::Client`] if the request fails or the server
/// rejects it with a non-2xx status.
#[instrument(skip(client, chunk), fields(collection, bytes = chunk.len()))]
pub(super) fn send_restore_data(
    client: &ManagedClient,
    collection: &str,
    chunk: &[u8],
    force: bool,
) -> Result<(), RestoreError> {
    let encoded = urlencoding::encode(collection);
    let url = client.rewrite_location(&format!("/_api/replication/restore-data?collection={encoded}&force={force}"));
    let response = client
        .authed(client.http().put(&url).body(chunk.to_vec()))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    crate::http::check_response(response)?;
    Ok(())
}

#[derive(Serialize)]
struct CreateDatabaseUser<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    passwd: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateDatabaseRequest<'a> {
    name: &'a str,
    users: Vec<CreateDatabaseUser<'a>>,
}

/// Creates database `name` via a client already connected to `_system`.
///
/// # Errors
///
/// Returns [`RestoreError::Client`] if the request fails or the server
/// rejects it with a non-2xx status (including "already exists", which
/// callers only reach this function to avoid by probing first).
#[instrument(skip(system_client))]
pub(super) fn try_create_database(
    system_client: &ManagedClient,
    name: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(), RestoreError> {
    let url = system_client.rewrite_location("/_api/database");
    let users = match username {
        Some(username) => vec![CreateDatabaseUser { username, passwd: password }],
        None => Vec::new(),
    };
    let body = CreateDatabaseRequest { name, users };
    let response = system_client
        .authed(system_client.http().post(&url).json(&body))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    crate::http::check_response(response)?;
    Ok(())
}
