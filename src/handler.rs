//! HTTP request handlers for the humans.inc API
//!
//! This module is thin glue: extract the request identity and payload,
//! call into `store`/`storage`, map failures through `AppError`. The
//! business rules themselves live in `store`.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::database::AppState;
use crate::error::AppError;
use crate::middleware::Identity;
use crate::model::{
    AvatarResponse, CreateBlockRequest, CreateCollectionRequest, MoveBlockRequest, PublicPage,
    ReorderRequest, UpdateBlockRequest, UpdateCollectionRequest, UpdateProfileRequest,
};
use crate::store::{self, PublicBlockResolution};
use crate::storage;

// ============================================================================
// Public endpoints
// ============================================================================

/// GET /{username} - public page data for a claimed username
///
/// Returns the profile plus its published, visible blocks in public
/// display order. Unknown usernames are 404, not errors.
pub async fn get_public_page(
    Path(username): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PublicPage>, AppError> {
    let profile = store::get_public_profile(&state.db, &username)?
        .ok_or(AppError::NotFound("profile"))?;
    let blocks = store::get_public_user_blocks(&state.db, profile.id)?;
    Ok(Json(PublicPage { profile, blocks }))
}

/// GET /{username}/{token} - individual published block page
///
/// The token may be a slug or a UUID. A UUID hit on a block that owns a
/// slug redirects to the canonical slug URL instead of serving content;
/// everything unresolvable is 404.
pub async fn get_public_block(
    Path((username, token)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let profile = store::get_public_profile(&state.db, &username)?
        .ok_or(AppError::NotFound("profile"))?;

    match store::get_block_by_slug_or_id(&state.db, profile.id, &token)? {
        Some(PublicBlockResolution::Block(block)) => Ok(Json(*block).into_response()),
        Some(PublicBlockResolution::RedirectToSlug(slug)) => {
            Ok(Redirect::temporary(&format!("/{}/{}", username, slug)).into_response())
        }
        None => Err(AppError::NotFound("block")),
    }
}

/// GET /uploads/{owner}/{file} - serves stored avatar objects
pub async fn serve_upload(
    Path((owner, file)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let path = storage::object_path(&owner, &file).ok_or(AppError::NotFound("file"))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::NotFound("file"))?;

    let content_type = match file.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// GET /health - liveness probe
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Profile endpoints
// ============================================================================

/// GET /api/profile - the caller's profile, created on first touch
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
) -> Result<Response, AppError> {
    let profile = store::get_or_create_profile(&state.db, identity)?;
    Ok(Json(profile).into_response())
}

/// PATCH /api/profile - partial profile update (username claim included)
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Response, AppError> {
    // First touch may arrive through PATCH as well.
    store::get_or_create_profile(&state.db, identity)?;
    let profile = store::update_profile(&state.db, identity, payload)?;
    Ok(Json(profile).into_response())
}

/// POST /api/profile/avatar - multipart avatar upload
///
/// Stores the image, points the profile at its public URL, and cleans up
/// the replaced object best-effort (a missing old file is expected and
/// non-fatal).
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidPayload(e.to_string()))?
        .ok_or_else(|| AppError::InvalidPayload("no file provided".to_string()))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::InvalidPayload(e.to_string()))?;

    store::get_or_create_profile(&state.db, identity)?;

    let key = storage::save_avatar(identity, &bytes).await?;
    let url = storage::public_url(&key);
    let (_, previous_url) = store::set_avatar_url(&state.db, identity, url.clone())?;

    if let Some(old_key) = previous_url.as_deref().and_then(storage::key_from_url) {
        storage::delete_object(&old_key).await;
    }

    Ok(Json(AvatarResponse { avatar_url: url }).into_response())
}

// ============================================================================
// Block endpoints
// ============================================================================

/// Query parameters for GET /api/blocks
#[derive(Deserialize)]
pub struct ListBlocksParams {
    /// Scope to list; defaults to the caller. Anything else is forbidden.
    pub owner_id: Option<Uuid>,
}

/// GET /api/blocks - the caller's blocks in authoring order
pub async fn list_blocks(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Query(params): Query<ListBlocksParams>,
) -> Result<Response, AppError> {
    let owner_id = params.owner_id.unwrap_or(identity);
    let blocks = store::list_blocks(&state.db, identity, owner_id)?;
    Ok(Json(blocks).into_response())
}

/// POST /api/blocks - create a block (optionally deriving a slug)
pub async fn create_block(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<CreateBlockRequest>,
) -> Result<Response, AppError> {
    let block = store::create_block_with_slug(&state.db, identity, payload)?;
    Ok((StatusCode::CREATED, Json(block)).into_response())
}

/// PATCH /api/blocks/{id} - partial block update
pub async fn update_block(
    Path(block_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<UpdateBlockRequest>,
) -> Result<Response, AppError> {
    let block = store::update_block(&state.db, identity, block_id, payload)?;
    Ok(Json(block).into_response())
}

/// DELETE /api/blocks/{id} - ownership-checked hard delete
pub async fn delete_block(
    Path(block_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
) -> Result<Response, AppError> {
    store::delete_block(&state.db, identity, block_id)?;
    Ok(Json(json!({
        "message": "Block deleted successfully",
        "deleted_id": block_id
    }))
    .into_response())
}

/// PUT /api/blocks/reorder - apply positions 0..N-1 from the id list
///
/// Not atomic: every update is attempted; any failure surfaces as one
/// aggregate error after the batch ran.
pub async fn reorder_blocks(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Response, AppError> {
    let items: Vec<(Uuid, i64)> = payload
        .block_ids
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, position as i64))
        .collect();
    store::reorder_blocks(&state.db, identity, identity, &items)?;
    Ok(Json(json!({ "message": "Blocks reordered" })).into_response())
}

/// PATCH /api/blocks/{id}/collection - move a block between collections
pub async fn move_block(
    Path(block_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<MoveBlockRequest>,
) -> Result<Response, AppError> {
    let block =
        store::move_block_to_collection(&state.db, identity, block_id, payload.collection_id)?;
    Ok(Json(block).into_response())
}

// ============================================================================
// Collection endpoints
// ============================================================================

/// GET /api/collections - the caller's collections
pub async fn list_collections(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
) -> Result<Response, AppError> {
    let collections = store::get_user_collections(&state.db, identity)?;
    Ok(Json(collections).into_response())
}

/// POST /api/collections - create a collection
pub async fn create_collection(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<CreateCollectionRequest>,
) -> Result<Response, AppError> {
    let collection = store::create_collection(&state.db, identity, payload)?;
    Ok((StatusCode::CREATED, Json(collection)).into_response())
}

/// PATCH /api/collections/{id} - partial collection update
pub async fn update_collection(
    Path(collection_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
    Json(payload): Json<UpdateCollectionRequest>,
) -> Result<Response, AppError> {
    let collection = store::update_collection(&state.db, identity, collection_id, payload)?;
    Ok(Json(collection).into_response())
}

/// DELETE /api/collections/{id} - delete a collection, members survive
pub async fn delete_collection(
    Path(collection_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
) -> Result<Response, AppError> {
    store::delete_collection(&state.db, identity, collection_id)?;
    Ok(Json(json!({
        "message": "Collection deleted successfully",
        "deleted_id": collection_id
    }))
    .into_response())
}

/// GET /api/collections/grouped - blocks partitioned by collection
pub async fn grouped_blocks(
    State(state): State<AppState>,
    Extension(Identity(identity)): Extension<Identity>,
) -> Result<Response, AppError> {
    let grouped = store::get_blocks_by_collection(&state.db, identity)?;
    Ok(Json(grouped).into_response())
}
