// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_test::TestServer;
use dlhub_remote::{
    ClientFactory, OneFichierClient, OneFichierClientFactory, RemoteConfig, RemoteError,
    RemoteFileService,
};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;

const API_KEY: &str = "secret-key";

#[derive(Clone)]
struct AppState {
    content: Arc<Vec<u8>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"))
}

async fn handle_info(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "url": body["url"],
        "filename": "a.mkv",
        "size": 1000,
        "checksum": "x",
        "content-type": "video/x-matroska",
        "pass": 0,
    }))
    .into_response()
}

async fn handle_token(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body["url"].as_str().is_some_and(|u| u.contains("gone")) {
        return Json(json!({"status": "KO", "message": "Resource not found #469"})).into_response();
    }
    Json(json!({"url": "http://direct/a.mkv", "status": "OK"})).into_response()
}

async fn handle_file(headers: HeaderMap, State(state): State<AppState>) -> Response {
    let total = state.content.len();
    let start = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_open_range);

    match start {
        Some(start) if start >= total => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{total}")).unwrap(),
            );
            (StatusCode::RANGE_NOT_SATISFIABLE, response_headers).into_response()
        }
        Some(start) => {
            let slice = &state.content[start..];
            let mut response_headers = HeaderMap::new();
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {}-{}/{}", start, total - 1, total)).unwrap(),
            );
            (
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                Bytes::copy_from_slice(slice),
            )
                .into_response()
        }
        None => (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response(),
    }
}

fn parse_open_range(value: &str) -> Option<usize> {
    let value = value.strip_prefix("bytes=")?;
    let (start, end) = value.split_once('-')?;
    if !end.is_empty() {
        return None;
    }
    start.parse().ok()
}

fn create_test_server(content: Vec<u8>) -> TestServer {
    let app = Router::new()
        .route("/v1/file/info.cgi", post(handle_info))
        .route("/v1/download/get_token.cgi", post(handle_token))
        .route("/file", get(handle_file))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .with_state(AppState {
            content: Arc::new(content),
        });

    TestServer::builder()
        .http_transport()
        .try_build(app)
        .expect("failed to create test server")
}

fn base_url(server: &TestServer) -> String {
    server
        .server_address()
        .expect("server should have HTTP address")
        .to_string()
        .trim_end_matches('/')
        .to_string()
}

fn client(server: &TestServer, api_key: &str) -> OneFichierClient {
    let config = RemoteConfig::builder()
        .base_url(format!("{}/v1", base_url(server)))
        .build();
    OneFichierClient::new(&config, api_key).unwrap()
}

async fn read_all(body: dlhub_remote::RemoteBody) -> Vec<u8> {
    let mut reader = body.reader;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn file_info_and_token_roundtrip() {
    let server = create_test_server(vec![0; 10]);
    let client = client(&server, API_KEY);

    let info = client.file_info("https://1fichier.com/?abc").await.unwrap();
    assert_eq!(info.filename, "a.mkv");
    assert_eq!(info.size, 1000);
    assert_eq!(info.checksum, "x");
    assert_eq!(info.content_type, "video/x-matroska");
    assert_eq!(info.url, "https://1fichier.com/?abc");

    let token = client
        .download_token("https://1fichier.com/?abc")
        .await
        .unwrap();
    assert_eq!(token.url, "http://direct/a.mkv");
}

#[tokio::test]
async fn rejected_token_carries_message() {
    let server = create_test_server(vec![]);
    let client = client(&server, API_KEY);

    let err = client
        .download_token("https://1fichier.com/?gone")
        .await
        .unwrap_err();
    match err {
        RemoteError::TokenRejected { status, message } => {
            assert_eq!(status, "KO");
            assert_eq!(message, "Resource not found #469");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn wrong_credential_is_http_error() {
    let server = create_test_server(vec![]);
    let client = client(&server, "nope");

    let err = client.file_info("https://1fichier.com/?abc").await.unwrap_err();
    assert!(matches!(err, RemoteError::Http { status: 401, .. }), "{err}");
}

#[tokio::test]
async fn open_without_offset_reads_full_body() {
    let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let server = create_test_server(content.clone());
    let client = client(&server, API_KEY);

    let body = client
        .open(&format!("{}/file", base_url(&server)), 0)
        .await
        .unwrap();
    assert!(!body.partial);
    assert_eq!(body.content_length, Some(1000));
    assert_eq!(read_all(body).await, content);
}

#[tokio::test]
async fn open_with_offset_requests_range() {
    let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let server = create_test_server(content.clone());
    let factory = OneFichierClientFactory::new(RemoteConfig::default()).unwrap();
    let client = factory.build(API_KEY).unwrap();

    let body = client
        .open(&format!("{}/file", base_url(&server)), 400)
        .await
        .unwrap();
    assert!(body.partial);
    assert_eq!(body.content_length, Some(600));
    assert_eq!(read_all(body).await, content[400..]);
}

#[tokio::test]
async fn open_rejects_error_status() {
    let server = create_test_server(vec![]);
    let client = client(&server, API_KEY);

    let err = client
        .open(&format!("{}/missing", base_url(&server)), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Http { status: 404, .. }), "{err}");
}

#[tokio::test]
async fn open_at_end_of_resource_yields_empty_partial_body() {
    let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let server = create_test_server(content);
    let client = client(&server, API_KEY);

    let body = client
        .open(&format!("{}/file", base_url(&server)), 1000)
        .await
        .unwrap();
    assert!(body.partial);
    assert_eq!(body.content_length, Some(0));
    assert!(read_all(body).await.is_empty());
}
