// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use metrics_core::metric::{Batch, Metric};
use metrics_core::security::compression::{gunzip, gzip};
use metrics_core::security::{
    generate_keypair, DecryptionKey, SealedPayload, SecurityPipeline, Signer, HASH_HEADER,
};
use metrics_server::middleware::SecurityState;
use metrics_server::router::{build_router, MAX_BODY_SIZE};
use metrics_server::storage::{MemoryStorage, MetricStore, Storage, StorageConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const KEY: &str = "shared-secret";

fn batch() -> Batch {
    vec![Metric::gauge("Alloc", 128.0), Metric::counter("PollCount", 1)]
}

fn memory_router(security: SecurityState) -> (Router, Arc<Storage>) {
    let storage = Arc::new(Storage::Memory(MemoryStorage::default()));
    (build_router(Arc::clone(&storage), Arc::new(security)), storage)
}

fn updates_request(sealed: &SealedPayload) -> axum::http::request::Builder {
    let mut builder = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip");
    if let Some(signature) = &sealed.signature {
        builder = builder.header(HASH_HEADER, signature);
    }
    builder
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn test_plain_batch_then_reads() {
    let (router, _) = memory_router(SecurityState::default());
    let sealed = SecurityPipeline::default().seal(&batch()).unwrap();

    for _ in 0..2 {
        let request = updates_request(&sealed)
            .body(Body::from(sealed.body.clone()))
            .unwrap();
        assert_eq!(send(&router, request).await.0, StatusCode::OK);
    }

    assert_eq!(
        get(&router, "/value/gauge/Alloc").await,
        (StatusCode::OK, "128".to_string())
    );
    assert_eq!(
        get(&router, "/value/counter/PollCount").await,
        (StatusCode::OK, "2".to_string())
    );
    assert_eq!(get(&router, "/value/gauge/Missing").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signed_and_encrypted_round_trip() {
    let (private, public) = generate_keypair();
    let (router, storage) = memory_router(SecurityState {
        signer: Some(Signer::new(KEY)),
        decryption_key: Some(private),
        trusted_subnet: None,
    });

    let sealed = SecurityPipeline::new(Some(Signer::new(KEY)), Some(public))
        .seal(&batch())
        .unwrap();
    assert!(sealed.signature.is_some());
    let request = updates_request(&sealed).body(Body::from(sealed.body)).unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::OK);

    assert_eq!(storage.select_gauge("Alloc").await.unwrap(), 128.0);
    assert_eq!(storage.select_counter("PollCount").await.unwrap(), 1);
}

#[tokio::test]
async fn test_tampered_ciphertext_is_rejected_before_decryption() {
    let (private, public) = generate_keypair();
    let (router, storage) = memory_router(SecurityState {
        signer: Some(Signer::new(KEY)),
        decryption_key: Some(private),
        trusted_subnet: None,
    });

    let sealed = SecurityPipeline::new(Some(Signer::new(KEY)), Some(public))
        .seal(&batch())
        .unwrap();
    let mut ciphertext = gunzip(&sealed.body, MAX_BODY_SIZE).unwrap();
    let last = ciphertext.len() - 1;
    ciphertext[last] ^= 0x01;

    let request = updates_request(&sealed)
        .body(Body::from(gzip(&ciphertext).unwrap()))
        .unwrap();
    // a decrypt failure would report "failed to decrypt payload"
    assert_eq!(
        send(&router, request).await,
        (StatusCode::BAD_REQUEST, "hashes do not match".to_string())
    );
    assert!(storage.gauges().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let (router, _) = memory_router(SecurityState {
        signer: Some(Signer::new(KEY)),
        ..SecurityState::default()
    });
    let sealed = SecurityPipeline::new(Some(Signer::new("other")), None)
        .seal(&batch())
        .unwrap();
    let request = updates_request(&sealed).body(Body::from(sealed.body)).unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsigned_request_is_accepted_by_signing_server() {
    let (router, storage) = memory_router(SecurityState {
        signer: Some(Signer::new(KEY)),
        ..SecurityState::default()
    });
    let sealed = SecurityPipeline::default().seal(&batch()).unwrap();
    let request = updates_request(&sealed).body(Body::from(sealed.body)).unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::OK);
    assert_eq!(storage.select_counter("PollCount").await.unwrap(), 1);
}

#[tokio::test]
async fn test_plaintext_to_decrypting_server_is_rejected() {
    let (private, _) = generate_keypair();
    let (router, _) = memory_router(SecurityState {
        decryption_key: Some(private),
        ..SecurityState::default()
    });
    let sealed = SecurityPipeline::default().seal(&batch()).unwrap();
    let request = updates_request(&sealed).body(Body::from(sealed.body)).unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_corrupt_gzip_is_rejected() {
    let (router, _) = memory_router(SecurityState::default());
    let request = Request::post("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from("definitely not gzip"))
        .unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trusted_subnet() {
    let (router, _) = memory_router(SecurityState {
        trusted_subnet: Some("192.168.0.0/16".parse().unwrap()),
        ..SecurityState::default()
    });
    let sealed = SecurityPipeline::default().seal(&batch()).unwrap();

    let untrusted = updates_request(&sealed)
        .header("X-Real-IP", "10.0.0.1")
        .body(Body::from(sealed.body.clone()))
        .unwrap();
    assert_eq!(send(&router, untrusted).await.0, StatusCode::FORBIDDEN);

    let anonymous = updates_request(&sealed)
        .body(Body::from(sealed.body.clone()))
        .unwrap();
    assert_eq!(send(&router, anonymous).await.0, StatusCode::FORBIDDEN);

    let trusted = updates_request(&sealed)
        .header("X-Real-IP", "192.168.1.20")
        .body(Body::from(sealed.body))
        .unwrap();
    assert_eq!(send(&router, trusted).await.0, StatusCode::OK);

    // reads are not restricted
    assert_eq!(get(&router, "/ping").await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_update_response_is_gzipped_on_request() {
    let (router, _) = memory_router(SecurityState::default());
    let request = Request::post("/update/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::from(r#"{"id":"Alloc","type":"gauge","value":1.5}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        gunzip(&body, MAX_BODY_SIZE).unwrap(),
        br#"{"id":"Alloc","type":"gauge","value":1.5}"#
    );
}

#[tokio::test]
async fn test_file_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::File {
        path: dir.path().join("metrics.json"),
        restore: true,
        store_interval: Duration::ZERO,
    };
    let sealed = SecurityPipeline::default().seal(&batch()).unwrap();

    let storage = Arc::new(Storage::open(&config, &CancellationToken::new()).await.unwrap());
    let router = build_router(Arc::clone(&storage), Arc::new(SecurityState::default()));
    for _ in 0..3 {
        let request = updates_request(&sealed)
            .body(Body::from(sealed.body.clone()))
            .unwrap();
        assert_eq!(send(&router, request).await.0, StatusCode::OK);
    }
    storage.close().await.unwrap();

    let restored = Arc::new(Storage::open(&config, &CancellationToken::new()).await.unwrap());
    let router = build_router(Arc::clone(&restored), Arc::new(SecurityState::default()));
    assert_eq!(
        get(&router, "/value/counter/PollCount").await,
        (StatusCode::OK, "3".to_string())
    );
    assert_eq!(
        get(&router, "/value/gauge/Alloc").await,
        (StatusCode::OK, "128".to_string())
    );
}

#[tokio::test]
async fn test_key_files_load() {
    let dir = tempfile::tempdir().unwrap();
    let (private, public) = generate_keypair();
    let path = dir.path().join("private.key");
    std::fs::write(&path, format!("{}\n", private.to_hex())).unwrap();

    let (router, storage) = memory_router(SecurityState {
        decryption_key: Some(DecryptionKey::from_file(&path).unwrap()),
        ..SecurityState::default()
    });
    let sealed = SecurityPipeline::new(None, Some(public)).seal(&batch()).unwrap();
    let request = updates_request(&sealed).body(Body::from(sealed.body)).unwrap();
    assert_eq!(send(&router, request).await.0, StatusCode::OK);
    assert_eq!(storage.select_gauge("Alloc").await.unwrap(), 128.0);
}
