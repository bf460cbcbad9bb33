//! End-to-end dump-then-restore of a small collection against two mock
//! servers, exercising the full `run_dump` -> on-disk container ->
//! `run_restore` path without a real ArangoDB-like server.

use std::time::Duration;

use dumpkit_core::directory::{Compressed, EncryptionScheme, ManagedDirectory};
use dumpkit_core::dump::{run_dump, DumpOptions};
use dumpkit_core::http::ConnectionOptions;
use dumpkit_core::progress::{CollectionState, ProgressTracker};
use dumpkit_core::restore::{run_restore, RestoreOptions};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connection(base_url: String, database: &str) -> ConnectionOptions {
    ConnectionOptions {
        base_url,
        database: database.to_string(),
        username: None,
        password: None,
        request_timeout: Duration::from_secs(5),
        force: false,
    }
}

async fn mount_dump_server(records: &[&str]) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_db/testdb/_api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "3.11.0"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/testdb/_admin/server/role"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"role": "SINGLE"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/testdb/_api/engine"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "rocksdb"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/testdb/_api/database/current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": {"name": "testdb"}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/testdb/_api/collection"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"result": [{"name": "c1", "isSystem": false, "type": 2}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/testdb/_api/index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"indexes": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_db/testdb/_api/replication/dump-batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "ctx1", "ttl": 300})))
        .mount(&server)
        .await;

    let payload: String = records.iter().map(|r| format!("{r}\n")).collect();
    Mock::given(method("POST"))
        .and(path("/_db/testdb/_api/replication/dump-next/ctx1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-arango-replication-checkmore", "false")
                .set_body_bytes(payload.into_bytes()),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/_db/testdb/_api/replication/dump-batch/ctx1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    server
}

async fn mount_restore_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_db/testdb/_api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "3.11.0"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/testdb/_admin/server/role"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"role": "SINGLE"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_db/testdb/_api/replication/restore-collection"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_db/testdb/_api/replication/restore-data"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_db/testdb/_api/replication/restore-indexes"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    server
}

#[test]
fn dump_then_restore_round_trips_a_small_collection() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let records = ["{\"_key\":\"a\"}", "{\"_key\":\"b\"}", "{\"_key\":\"c\"}", "{\"_key\":\"d\"}", "{\"_key\":\"e\"}"];

    let dump_server = rt.block_on(mount_dump_server(&records));
    let work_dir = tempdir().unwrap();
    let dump_dir = work_dir.path().join("dump");

    let dump_options = DumpOptions {
        connection: connection(dump_server.uri(), "testdb"),
        output_directory: dump_dir.clone(),
        overwrite: false,
        include_system_collections: false,
        collections: Vec::new(),
        excluded_collections: Vec::new(),
        dump_views: false,
        dbserver_worker_threads: 1,
        local_writer_threads: 1,
        dbserver_prefetch_batches: 4,
        collection_threads: 2,
        split_files: false,
        max_file_size_bytes: u64::MAX,
        compress: false,
        encryption: EncryptionScheme::None,
        context_ttl: Duration::from_secs(300),
    };
    run_dump(dump_options).expect("dump should succeed against the mock server");

    // The dump produced exactly what the on-disk layout promises: a
    // structure file and a plain (uncompressed, unsplit) data file whose
    // records match what the server emitted, in order.
    let written = ManagedDirectory::open_existing(&dump_dir, None).unwrap();
    let data = written.slurp_file("c1.data.json", Compressed::Plain).unwrap();
    let expected: String = records.iter().map(|r| format!("{r}\n")).collect();
    assert_eq!(data, expected.as_bytes());
    assert!(dump_dir.join("c1.structure.json").exists());

    let restore_server = rt.block_on(mount_restore_server());
    let restore_options = RestoreOptions {
        connection: connection(restore_server.uri(), "testdb"),
        input_directory: dump_dir.clone(),
        collections: Vec::new(),
        include_system_collections: false,
        create_collections: true,
        import_data: true,
        overwrite: true,
        force: false,
        ignore_distribute_shards_like_errors: false,
        default_number_of_shards: 1,
        default_replication_factor: 1,
        chunk_size: 65536,
        create_database: false,
        force_same_database: false,
        all_databases: false,
        ignore_existing_progress: false,
        worker_threads: 2,
        encryption_key: None,
        initial_connect_retries: 0,
    };
    let stats = run_restore(restore_options).expect("restore should succeed against the mock server");
    assert_eq!(stats.documents_transferred(), 5);

    // Every restore-data request concatenated, in arrival order, equals the
    // original dumped stream -- there's only one chunk here since the
    // whole collection fits under the default chunk size.
    let requests = rt.block_on(restore_server.received_requests()).unwrap();
    let sent: Vec<u8> = requests
        .iter()
        .filter(|r| r.url.path() == "/_db/testdb/_api/replication/restore-data")
        .flat_map(|r| r.body.clone())
        .collect();
    assert_eq!(sent, expected.as_bytes());

    // The collection is durably marked RESTORED with a watermark at the
    // end of its one data file, so a second restore run would skip it.
    let progress_dir = ManagedDirectory::open_existing(&dump_dir, None).unwrap();
    let tracker = ProgressTracker::new(progress_dir, false).unwrap();
    let status = tracker.get_status("c1");
    assert_eq!(status.state, CollectionState::Restored);
    assert_eq!(status.bytes_acked.file_no, 0);
    assert_eq!(status.bytes_acked.read_offset, expected.len() as u64);
}

fn write_structure_file(directory: &ManagedDirectory, name: &str) {
    let structure = serde_json::json!({"parameters": {"name": name}, "indexes": []});
    directory.value_to_json_file(&format!("{name}.structure.json"), &structure, Compressed::Plain, true).unwrap();
}

fn write_data_file(directory: &ManagedDirectory, name: &str, record_count: usize) -> Vec<u8> {
    let mut file = directory.writable_file(&format!("{name}.data.json"), Compressed::Plain, true).unwrap();
    let mut bytes = Vec::new();
    for i in 0..record_count {
        let line = format!("{{\"_key\":\"{name}-{i}\"}}\n");
        std::io::Write::write_all(&mut file, line.as_bytes()).unwrap();
        bytes.extend_from_slice(line.as_bytes());
    }
    file.close().unwrap();
    bytes
}

/// A single worker thread plus two collections that each need several
/// `restore-data` chunks: `RestoreMainJob` for one collection dispatches
/// `RestoreSendJob` siblings while its own worker blocks in `wait_for_drain`,
/// and a second collection is still queued behind it. If main jobs and
/// their siblings ever shared one pool, this hangs forever instead of
/// completing.
#[test]
fn restore_with_one_worker_and_multi_chunk_collections_does_not_deadlock() {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let work_dir = tempdir().unwrap();
    let dump_dir = work_dir.path().join("dump");
    let directory = ManagedDirectory::create(dump_dir.clone(), EncryptionScheme::None, false).unwrap();
    directory
        .value_to_json_file("dump.json", &serde_json::json!({"database": "testdb", "properties": {}}), Compressed::Plain, true)
        .unwrap();
    write_structure_file(&directory, "c1");
    write_structure_file(&directory, "c2");
    let c1_bytes = write_data_file(&directory, "c1", 200);
    let c2_bytes = write_data_file(&directory, "c2", 200);

    let restore_server = rt.block_on(mount_restore_server());
    let restore_options = RestoreOptions {
        connection: connection(restore_server.uri(), "testdb"),
        input_directory: dump_dir.clone(),
        collections: Vec::new(),
        include_system_collections: false,
        create_collections: false,
        import_data: true,
        overwrite: true,
        force: false,
        ignore_distribute_shards_like_errors: false,
        default_number_of_shards: 1,
        default_replication_factor: 1,
        // Small enough, relative to 200 records per collection, that each
        // collection streams as many chunks rather than one.
        chunk_size: 256,
        create_database: false,
        force_same_database: false,
        all_databases: false,
        ignore_existing_progress: false,
        worker_threads: 1,
        encryption_key: None,
        initial_connect_retries: 0,
    };
    let stats = run_restore(restore_options).expect("restore should complete without deadlocking");
    assert_eq!(stats.documents_transferred(), 400);

    // Sibling sends and the final inline send race on the wire, so only the
    // *set* of shipped records (not arrival order) is guaranteed to match.
    let requests = rt.block_on(restore_server.received_requests()).unwrap();
    let mut lines_by_collection: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    let mut chunk_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for request in requests.iter().filter(|r| r.url.path() == "/_db/testdb/_api/replication/restore-data") {
        let collection = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "collection")
            .map(|(_, v)| v.into_owned())
            .expect("restore-data request missing collection query param");
        let body = std::str::from_utf8(&request.body).unwrap();
        lines_by_collection.entry(collection.clone()).or_default().extend(body.lines().map(str::to_string));
        *chunk_counts.entry(collection).or_default() += 1;
    }

    for (name, expected_bytes) in [("c1", &c1_bytes), ("c2", &c2_bytes)] {
        let mut received = lines_by_collection.remove(name).unwrap_or_default();
        received.sort_unstable();
        let mut expected: Vec<String> =
            std::str::from_utf8(expected_bytes).unwrap().lines().map(str::to_string).collect();
        expected.sort_unstable();
        assert_eq!(received, expected, "{name} should have every record shipped exactly once");
        assert!(chunk_counts[name] > 1, "expected {name} to need more than one chunk");
    }
}
