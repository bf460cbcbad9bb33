//! Construction of the blocking HTTP client used by every job, plus the
//! handful of admin endpoints used to characterize the target server.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{instrument, warn};

use super::error::ClientError;
use super::response_check::check_and_decode;

const DB_PATH_PREFIX: &str = "/_db/";

/// Lowest server major version this client speaks the replication protocol
/// with. Matched against the leading digit run of `/_api/version`'s
/// `version` field.
const MIN_SUPPORTED_MAJOR_VERSION: u32 = 3;

/// Delay before each retried initial connect attempt; kept short since a
/// caller configures the retry *count*, not a backoff curve.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Connection parameters for a single ArangoDB-like server endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Base server URL, e.g. `http://localhost:8529`.
    pub base_url: String,
    /// Database to operate against; rewritten into every relative path.
    pub database: String,
    /// HTTP basic auth username, if any.
    pub username: Option<String>,
    /// HTTP basic auth password, if any.
    pub password: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Downgrade an incompatible server version from a fatal error to a
    /// logged warning.
    pub force: bool,
}

/// A connected client bound to one database on one server.
///
/// Wraps a single `reqwest::blocking::Client`; cheap to clone (the inner
/// client is reference-counted by `reqwest` itself), so each worker thread
/// in [`crate::workers::ClientTaskQueue`] owns one.
#[derive(Clone)]
pub struct ManagedClient {
    http: reqwest::blocking::Client,
    options: ConnectionOptions,
}

impl ManagedClient {
    /// Builds a client and connects it, verifying the target database
    /// exists and that the server's major version is supported (downgraded
    /// to a logged warning instead of an error when `options.force` is
    /// set).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Build`] if the client cannot be constructed,
    /// or [`ClientError::DatabaseNotFound`] / [`ClientError::Request`] /
    /// [`ClientError::IncompatibleVersion`] if the initial handshake fails.
    #[instrument(skip(options), fields(base_url = %options.base_url, database = %options.database))]
    pub fn connect(options: ConnectionOptions) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(ClientError::Build)?;
        let force = options.force;
        let client = Self { http, options };
        client.version_handshake(force)?;
        Ok(client)
    }

    /// Same as [`Self::connect`], but retries the whole handshake up to
    /// `retries` additional times (so `retries = 0` behaves exactly like
    /// [`Self::connect`]) on transport-level failures. Does not retry a
    /// [`ClientError::DatabaseNotFound`] or
    /// [`ClientError::IncompatibleVersion`], since neither is transient.
    #[instrument(skip(options), fields(base_url = %options.base_url, database = %options.database))]
    pub fn connect_with_retries(options: ConnectionOptions, retries: u32) -> Result<Self, ClientError> {
        let mut attempt = 0;
        loop {
            match Self::connect(options.clone()) {
                Ok(client) => return Ok(client),
                Err(err @ (ClientError::DatabaseNotFound(_) | ClientError::IncompatibleVersion { .. })) => {
                    return Err(err);
                }
                Err(err) if attempt < retries => {
                    warn!(attempt, %err, "initial connect failed, retrying");
                    attempt += 1;
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies basic auth (if configured) to a request builder produced
    /// from [`Self::http`] and [`Self::rewrite_location`].
    #[must_use]
    pub fn authed(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match (&self.options.username, &self.options.password) {
            (Some(user), pass) => builder.basic_auth(user, pass.clone()),
            (None, _) => builder,
        }
    }

    fn version_handshake(&self, force: bool) -> Result<(), ClientError> {
        #[derive(Deserialize)]
        struct VersionResponse {
            version: String,
        }
        let url = self.rewrite_location("/_api/version");
        let response = self
            .authed(self.http.get(&url))
            .send()
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::DatabaseNotFound(self.options.database.clone()));
        }
        let decoded: VersionResponse = check_and_decode(response)?;
        let major = leading_major_version(&decoded.version);
        if major < MIN_SUPPORTED_MAJOR_VERSION {
            let err = ClientError::IncompatibleVersion {
                server_version: decoded.version.clone(),
                required: format!("{MIN_SUPPORTED_MAJOR_VERSION}.0.0"),
            };
            if force {
                warn!(server_version = %decoded.version, "incompatible server version, continuing because --force was set");
            } else {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Conditionally prefixes a relative path with `/_db/<database>/`; an
    /// already-absolute path outside that prefix (e.g. `/_admin/...`) is
    /// left untouched, matching the original's `rewriteLocation` behavior
    /// of only redirecting requests meant for the selected database.
    #[must_use]
    pub fn rewrite_location(&self, location: &str) -> String {
        let path = if location.starts_with(DB_PATH_PREFIX) {
            location.to_string()
        } else {
            let encoded_db = urlencoding::encode(&self.options.database);
            format!("{DB_PATH_PREFIX}{encoded_db}{location}")
        };
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    /// Access to the underlying blocking client for endpoints not wrapped
    /// here (dump/restore jobs build their own requests against rewritten
    /// URLs).
    #[must_use]
    pub fn http(&self) -> &reqwest::blocking::Client {
        &self.http
    }

    /// The database this client is bound to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.options.database
    }

    /// Determines whether the server is running as part of a cluster, and
    /// if so which role this endpoint has.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the probe request fails or decodes
    /// unexpectedly.
    #[instrument(skip(self))]
    pub fn get_arango_is_cluster(&self) -> Result<ClusterRole, ClientError> {
        #[derive(Deserialize)]
        struct RoleResponse {
            role: String,
        }
        let url = self.rewrite_location("/_admin/server/role");
        let response = self
            .authed(self.http.get(&url))
            .send()
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        let decoded: RoleResponse = check_and_decode(response)?;
        Ok(match decoded.role.as_str() {
            "COORDINATOR" => ClusterRole::Coordinator,
            "PRIMARY" | "DBSERVER" => ClusterRole::DbServer,
            "SINGLE" => ClusterRole::Single,
            other => ClusterRole::Other(other.to_string()),
        })
    }

    /// Determines whether the server is using the named storage engine.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the probe request fails or decodes
    /// unexpectedly.
    #[instrument(skip(self))]
    pub fn get_arango_is_using_engine(&self, name: &str) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        struct EngineResponse {
            name: String,
        }
        let url = self.rewrite_location("/_api/engine");
        let response = self
            .authed(self.http.get(&url))
            .send()
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        let decoded: EngineResponse = check_and_decode(response)?;
        Ok(decoded.name == name)
    }
}

/// Parses the leading `<major>` run of a `"3.11.2"`-style version string,
/// treating anything unparseable as version `0` (i.e. incompatible).
fn leading_major_version(version: &str) -> u32 {
    version.split('.').next().and_then(|head| head.parse().ok()).unwrap_or(0)
}

/// Role reported by `/_admin/server/role`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterRole {
    /// A standalone, non-clustered server.
    Single,
    /// A cluster coordinator.
    Coordinator,
    /// A cluster database server (shard holder).
    DbServer,
    /// Any role string this build does not specifically recognize.
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options_for(base_url: String) -> ConnectionOptions {
        ConnectionOptions {
            base_url,
            database: "_system".into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(5),
            force: false,
        }
    }

    #[test]
    fn rewrite_location_prefixes_relative_paths() {
        let client = ManagedClient {
            http: reqwest::blocking::Client::new(),
            options: options_for("http://example.invalid".into()),
        };
        assert_eq!(
            client.rewrite_location("/_api/collection"),
            "http://example.invalid/_db/_system/_api/collection"
        );
    }

    #[test]
    fn rewrite_location_leaves_already_prefixed_paths_alone() {
        let client = ManagedClient {
            http: reqwest::blocking::Client::new(),
            options: options_for("http://example.invalid".into()),
        };
        assert_eq!(
            client.rewrite_location("/_db/other/_api/x"),
            "http://example.invalid/_db/other/_api/x"
        );
    }

    #[test]
    fn connect_succeeds_against_mock_server() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "version": "3.11.0",
                    "server": "arango",
                })))
                .mount(&server)
                .await;
            server
        });
        let client = ManagedClient::connect(options_for(server.uri())).unwrap();
        assert_eq!(client.database(), "_system");
    }

    #[test]
    fn connect_reports_database_not_found() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
            server
        });
        let err = ManagedClient::connect(options_for(server.uri())).unwrap_err();
        assert!(matches!(err, ClientError::DatabaseNotFound(_)));
    }

    #[test]
    fn connect_rejects_incompatible_version_without_force() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "2.8.0"})))
                .mount(&server)
                .await;
            server
        });
        let err = ManagedClient::connect(options_for(server.uri())).unwrap_err();
        assert!(matches!(err, ClientError::IncompatibleVersion { .. }));
    }

    #[test]
    fn connect_downgrades_incompatible_version_with_force() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "2.8.0"})))
                .mount(&server)
                .await;
            server
        });
        let mut options = options_for(server.uri());
        options.force = true;
        ManagedClient::connect(options).unwrap();
    }

    #[test]
    fn connect_with_retries_does_not_retry_database_not_found() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;
            server
        });
        let err = ManagedClient::connect_with_retries(options_for(server.uri()), 5).unwrap_err();
        assert!(matches!(err, ClientError::DatabaseNotFound(_)));
    }

    #[test]
    fn cluster_role_probe_decodes_role() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "3.11.0"})))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/_db/_system/_admin/server/role"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"role": "COORDINATOR"})))
                .mount(&server)
                .await;
            server
        });
        let client = ManagedClient::connect(options_for(server.uri())).unwrap();
        assert_eq!(client.get_arango_is_cluster().unwrap(), ClusterRole::Coordinator);
    }
}
