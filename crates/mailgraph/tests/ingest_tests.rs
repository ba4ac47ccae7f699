//! Chunked upload and extraction against a mock ingestion service.

use std::path::PathBuf;
use std::sync::Arc;

use httpmock::prelude::*;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;

use mailgraph::config::{IngestConfig, Ontology};
use mailgraph::ingest::{
    ChunkCountPolicy, ChunkedUploader, DbCredentials, ExtractionTrigger, IngestClient,
    IngestError, UploadOutcome,
};

fn credentials() -> DbCredentials {
    DbCredentials {
        uri: "neo4j://graph.test:7687".to_string(),
        username: "neo4j".to_string(),
        password: SecretString::from("test-password".to_string()),
        database: "neo4j".to_string(),
    }
}

fn ingest_config(chunk_size: u64, policy: ChunkCountPolicy) -> IngestConfig {
    IngestConfig {
        chunk_size,
        chunk_count: policy,
        settling_delay_secs: 0,
        ..IngestConfig::default()
    }
}

fn text_file(dir: &TempDir, name: &str, size: usize) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "x".repeat(size)).unwrap();
    path
}

struct ChunkCountCase {
    size: usize,
    exact: u64,
    legacy: u64,
}

const CHUNK_COUNT_CASES: &[ChunkCountCase] = &[
    ChunkCountCase { size: 0, exact: 1, legacy: 1 },
    ChunkCountCase { size: 3, exact: 1, legacy: 1 },
    ChunkCountCase { size: 4, exact: 1, legacy: 2 },
    ChunkCountCase { size: 5, exact: 2, legacy: 2 },
    ChunkCountCase { size: 9, exact: 3, legacy: 3 },
];

#[tokio::test]
async fn test_requests_per_file_size_and_policy() {
    let dir = TempDir::new().unwrap();

    for case in CHUNK_COUNT_CASES {
        for (policy, expected) in [
            (ChunkCountPolicy::Exact, case.exact),
            (ChunkCountPolicy::LegacyPlusOne, case.legacy),
        ] {
            let server = MockServer::start_async().await;
            let upload = server.mock(|when, then| {
                when.method(POST)
                    .path("/upload")
                    .body_includes(format!("name=\"totalChunks\"\r\n\r\n{}\r\n", expected));
                then.status(200)
                    .json_body(json!({ "status": "Success", "message": "ok" }));
            });

            let path = text_file(&dir, &format!("note-{}.txt", case.size), case.size);
            let api = Arc::new(IngestClient::new(&server.base_url()).unwrap());
            let uploader = ChunkedUploader::new(api, &ingest_config(4, policy));
            let outcome = uploader.upload(&path, &credentials()).await.unwrap();

            assert_eq!(
                outcome,
                UploadOutcome::Completed { chunks: expected },
                "size {} with {:?}",
                case.size,
                policy
            );
            upload.assert_calls(expected as usize);
        }
    }
}

#[tokio::test]
async fn test_rejected_chunk_halts_upload() {
    let dir = TempDir::new().unwrap();
    let path = text_file(&dir, "releve.txt", 10);
    let server = MockServer::start_async().await;
    let upload = server.mock(|when, then| {
        when.method(POST).path("/upload");
        then.status(200)
            .json_body(json!({ "status": "Failed", "message": "disk full" }));
    });

    let api = Arc::new(IngestClient::new(&server.base_url()).unwrap());
    let uploader = ChunkedUploader::new(api, &ingest_config(4, ChunkCountPolicy::Exact));
    let outcome = uploader.upload(&path, &credentials()).await.unwrap();

    assert_eq!(
        outcome,
        UploadOutcome::Rejected {
            chunk: 1,
            message: "disk full".to_string()
        }
    );
    upload.assert_calls(1);
}

#[tokio::test]
async fn test_server_error_surfaces_status() {
    let dir = TempDir::new().unwrap();
    let path = text_file(&dir, "releve.txt", 3);
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/upload");
        then.status(502).body("Bad Gateway");
    });

    let api = Arc::new(IngestClient::new(&server.base_url()).unwrap());
    let uploader = ChunkedUploader::new(api, &ingest_config(4, ChunkCountPolicy::Exact));
    let result = uploader.upload(&path, &credentials()).await;

    assert!(matches!(result, Err(IngestError::Api { status: 502, .. })));
}

#[tokio::test]
async fn test_extraction_posts_form_with_credentials() {
    let server = MockServer::start_async().await;
    let extract = server.mock(|when, then| {
        when.method(POST)
            .path("/extract")
            .header("content-type", "application/x-www-form-urlencoded")
            .body_includes("file_name=releve.txt")
            .body_includes("uri=neo4j%3A%2F%2Fgraph.test%3A7687")
            .body_includes("userName=neo4j")
            .body_includes("password=test-password")
            .body_includes("allowedNodes=Client%2CAdresse");
        then.status(200)
            .json_body(json!({ "status": "Success", "data": { "nodeCount": 2 } }));
    });

    let api = Arc::new(IngestClient::new(&server.base_url()).unwrap());
    let ontology = Ontology {
        allowed_nodes: vec!["Client".to_string(), "Adresse".to_string()],
        allowed_relationships: Vec::new(),
    };
    let trigger = ExtractionTrigger::new(
        api,
        &ingest_config(4, ChunkCountPolicy::Exact),
        ontology,
    );
    let reply = trigger
        .extract_after_settling("releve.txt", &credentials())
        .await
        .unwrap();

    extract.assert_calls(1);
    assert_eq!(reply["data"]["nodeCount"], 2);
}

#[tokio::test]
async fn test_extraction_without_ontology_omits_fields() {
    let server = MockServer::start_async().await;
    let with_nodes = server.mock(|when, then| {
        when.method(POST).path("/extract").body_includes("allowedNodes");
        then.status(200).json_body(json!({ "status": "Success" }));
    });
    let plain = server.mock(|when, then| {
        when.method(POST).path("/extract");
        then.status(200).json_body(json!({ "status": "Success" }));
    });

    let api = Arc::new(IngestClient::new(&server.base_url()).unwrap());
    let trigger = ExtractionTrigger::new(
        api,
        &ingest_config(4, ChunkCountPolicy::Exact),
        Ontology::default(),
    );
    trigger.extract("releve.txt", &credentials()).await.unwrap();

    with_nodes.assert_calls(0);
    plain.assert_calls(1);
}
