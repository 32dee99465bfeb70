//! Integration tests for the humans.inc API
//!
//! These tests verify the entire application stack including:
//! - HTTP routing
//! - Request/response handling
//! - Database operations
//! - Error handling

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::ServiceExt;
use uuid::Uuid;

// Import from the main crate
use humans_inc::database::{init_db, AppState};
use humans_inc::route::create_app;

/// Helper function to create a test application with a temporary database
fn setup_test_app() -> (axum::Router, NamedTempFile) {
    // Create a temporary database file
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_db.path().to_str().unwrap();

    // Initialize database
    let db = init_db(db_path).expect("Failed to initialize test database");
    let state = AppState { db: Arc::new(db) };

    // Create the app
    let app = create_app(state);

    (app, temp_db)
}

/// Helper function to parse response body as JSON
async fn response_json(body: Body) -> Value {
    let bytes = body
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();

    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

/// Builds an authenticated JSON API request for the given identity
fn api_request(method: &str, uri: &str, identity: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-identity-id", identity.to_string());
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Claims a username for the identity so block authoring works
async fn claim_username(app: &axum::Router, identity: Uuid, username: &str) {
    let response = app
        .clone()
        .oneshot(api_request(
            "PATCH",
            "/api/profile",
            identity,
            Some(json!({ "username": username })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Creates a text block and returns its JSON representation
async fn create_block(app: &axum::Router, identity: Uuid, payload: Value) -> Value {
    let response = app
        .clone()
        .oneshot(api_request("POST", "/api/blocks", identity, Some(payload)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response.into_body()).await
}

fn text_block_payload(identity: Uuid, title: &str) -> Value {
    json!({
        "owner_id": identity,
        "block_type": "text",
        "content": { "type": "text", "text": "hello there" },
        "title": title
    })
}

#[tokio::test]
async fn test_profile_created_on_first_touch() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();

    let response = app
        .oneshot(api_request("GET", "/api/profile", identity, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["id"], identity.to_string());
    assert!(body["username"].is_null());
}

#[tokio::test]
async fn test_username_claim_and_conflict() {
    let (app, _temp_db) = setup_test_app();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    claim_username(&app, first, "ada").await;

    // Same username from a different account is a conflict
    let response = app
        .oneshot(api_request(
            "PATCH",
            "/api/profile",
            second,
            Some(json!({ "username": "ada" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], "username_taken");
}

#[tokio::test]
async fn test_create_block_requires_profile_setup() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();

    let response = app
        .oneshot(api_request(
            "POST",
            "/api/blocks",
            identity,
            Some(text_block_payload(identity, "Too early")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], "setup_required");
}

#[tokio::test]
async fn test_create_block_with_generated_slug() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "writer").await;

    let mut payload = text_block_payload(identity, "Hello, World!");
    payload["generate_slug"] = json!(true);
    let block = create_block(&app, identity, payload).await;

    assert_eq!(block["slug"], "hello-world");
    assert_eq!(block["is_published"], false);
    assert_eq!(block["is_visible"], true);
    assert_eq!(block["position"], 0);

    // Same title again: the probe appends a numeric suffix
    let mut payload = text_block_payload(identity, "Hello, World!");
    payload["generate_slug"] = json!(true);
    let block = create_block(&app, identity, payload).await;
    assert_eq!(block["slug"], "hello-world-2");
}

#[tokio::test]
async fn test_create_block_content_mismatch() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "writer").await;

    let payload = json!({
        "owner_id": identity,
        "block_type": "links",
        "content": { "type": "text", "text": "not links" }
    });
    let response = app
        .oneshot(api_request("POST", "/api/blocks", identity, Some(payload)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], "content_mismatch");
}

#[tokio::test]
async fn test_duplicate_explicit_slug_conflict() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "writer").await;

    let mut payload = text_block_payload(identity, "First");
    payload["slug"] = json!("taken");
    create_block(&app, identity, payload).await;

    let mut payload = text_block_payload(identity, "Second");
    payload["slug"] = json!("taken");
    let response = app
        .oneshot(api_request("POST", "/api/blocks", identity, Some(payload)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], "slug_taken");
}

#[tokio::test]
async fn test_public_page_shows_only_published_blocks() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "page-owner").await;

    let live = create_block(&app, identity, text_block_payload(identity, "Live")).await;
    let _draft = create_block(&app, identity, text_block_payload(identity, "Draft")).await;

    // Publish only the first block
    let response = app
        .clone()
        .oneshot(api_request(
            "PATCH",
            &format!("/api/blocks/{}", live["id"].as_str().unwrap()),
            identity,
            Some(json!({ "is_published": true })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Public page needs no identity
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/page-owner")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["profile"]["username"], "page-owner");
    let blocks = body["blocks"].as_array().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0]["title"], "Live");
}

#[tokio::test]
async fn test_public_page_unknown_username() {
    let (app, _temp_db) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/nobody-here")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_block_slug_and_uuid_addressing() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "essayist").await;

    let mut payload = text_block_payload(identity, "My Essay");
    payload["slug"] = json!("my-essay");
    payload["is_published"] = json!(true);
    let block = create_block(&app, identity, payload).await;
    let block_id = block["id"].as_str().unwrap().to_string();

    // Canonical slug address serves the content
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/essayist/my-essay")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["id"], block_id);

    // UUID address redirects to the canonical slug URL
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/essayist/{}", block_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "/essayist/my-essay"
    );

    // Unknown slug is 404
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/essayist/never-written")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_block_uuid_without_slug_serves_directly() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "noslug").await;

    let mut payload = text_block_payload(identity, "Unslugged");
    payload["is_published"] = json!(true);
    let block = create_block(&app, identity, payload).await;
    let block_id = block["id"].as_str().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/noslug/{}", block_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["id"], block_id);
}

#[tokio::test]
async fn test_draft_block_not_publicly_addressable() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "drafter").await;

    let mut payload = text_block_payload(identity, "Secret");
    payload["slug"] = json!("secret");
    create_block(&app, identity, payload).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/drafter/secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reorder_blocks_endpoint() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "sorter").await;

    let a = create_block(&app, identity, text_block_payload(identity, "A")).await;
    let b = create_block(&app, identity, text_block_payload(identity, "B")).await;
    let c = create_block(&app, identity, text_block_payload(identity, "C")).await;

    let response = app
        .clone()
        .oneshot(api_request(
            "PUT",
            "/api/blocks/reorder",
            identity,
            Some(json!({ "block_ids": [c["id"], a["id"], b["id"]] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(api_request("GET", "/api/blocks", identity, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    let titles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|blk| blk["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["C", "A", "B"]);
}

#[tokio::test]
async fn test_collection_lifecycle() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "curator").await;

    // Create a collection
    let response = app
        .clone()
        .oneshot(api_request(
            "POST",
            "/api/collections",
            identity,
            Some(json!({ "name": "Reading List" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let collection = response_json(response.into_body()).await;
    let collection_id = collection["id"].as_str().unwrap().to_string();
    assert_eq!(collection["display_order"], 0);

    // Move a block into it
    let block = create_block(&app, identity, text_block_payload(identity, "Member")).await;
    let response = app
        .clone()
        .oneshot(api_request(
            "PATCH",
            &format!("/api/blocks/{}/collection", block["id"].as_str().unwrap()),
            identity,
            Some(json!({ "collection_id": collection_id })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Grouped view shows it under the collection
    let response = app
        .clone()
        .oneshot(api_request("GET", "/api/collections/grouped", identity, None))
        .await
        .unwrap();
    let body = response_json(response.into_body()).await;
    assert_eq!(body["collections"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["blocks_by_collection"][&collection_id]
            .as_array()
            .unwrap()
            .len(),
        1
    );
    assert_eq!(body["uncategorized_blocks"].as_array().unwrap().len(), 0);

    // Delete the collection; the block survives uncategorized
    let response = app
        .clone()
        .oneshot(api_request(
            "DELETE",
            &format!("/api/collections/{}", collection_id),
            identity,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(api_request("GET", "/api/collections/grouped", identity, None))
        .await
        .unwrap();
    let body = response_json(response.into_body()).await;
    assert_eq!(body["collections"].as_array().unwrap().len(), 0);
    let uncategorized = body["uncategorized_blocks"].as_array().unwrap();
    assert_eq!(uncategorized.len(), 1);
    assert!(uncategorized[0]["collection_id"].is_null());
}

#[tokio::test]
async fn test_delete_block_endpoint() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "deleter").await;

    let block = create_block(&app, identity, text_block_payload(identity, "Doomed")).await;
    let block_id = block["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(api_request(
            "DELETE",
            &format!("/api/blocks/{}", block_id),
            identity,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["deleted_id"], block_id);

    let response = app
        .oneshot(api_request("GET", "/api/blocks", identity, None))
        .await
        .unwrap();
    let body = response_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_second_bio_block_conflicts_with_existing() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "bio-owner").await;

    let bio_payload = json!({
        "owner_id": identity,
        "block_type": "bio",
        "content": { "type": "bio", "display_name": "Ada" }
    });
    let first = create_block(&app, identity, bio_payload.clone()).await;
    assert!(first["slug"].is_null());

    let response = app
        .oneshot(api_request("POST", "/api/blocks", identity, Some(bio_payload)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], "bio_exists");
    assert_eq!(body["existing_block_id"], first["id"]);
}

#[tokio::test]
async fn test_avatar_upload_and_serving() {
    let (app, _temp_db) = setup_test_app();
    let upload_dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::env::set_var("UPLOAD_DIR", upload_dir.path());

    let identity = Uuid::new_v4();
    claim_username(&app, identity, "pictured").await;

    // Minimal PNG payload (magic bytes are what the sniffer checks)
    let boundary = "test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"avatar.png\"\r\nContent-Type: image/png\r\n\r\n",
            boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3]);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/profile/avatar")
                .header("x-identity-id", identity.to_string())
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    let avatar_url = body["avatar_url"].as_str().unwrap().to_string();
    assert!(avatar_url.contains("/uploads/"));

    // Profile now carries the URL
    let response = app
        .clone()
        .oneshot(api_request("GET", "/api/profile", identity, None))
        .await
        .unwrap();
    let profile = response_json(response.into_body()).await;
    assert_eq!(profile["avatar_url"], avatar_url);

    // And the object is served back
    let path = avatar_url
        .split_once("/uploads/")
        .map(|(_, key)| format!("/uploads/{}", key))
        .unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/png"
    );
}

#[tokio::test]
async fn test_avatar_upload_rejects_non_images() {
    let (app, _temp_db) = setup_test_app();
    let identity = Uuid::new_v4();
    claim_username(&app, identity, "not-an-image").await;

    let boundary = "test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"avatar.png\"\r\nContent-Type: image/png\r\n\r\n",
            boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"%PDF-1.4 definitely not a png");
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/profile/avatar")
                .header("x-identity-id", identity.to_string())
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], "invalid_image");
}
