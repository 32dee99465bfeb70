//! Application error taxonomy
//!
//! One enum covers every failure a store or handler can produce. Each
//! variant maps to an HTTP status plus a stable machine-readable code,
//! rendered as `{"error": ..., "code": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// No identity on the request.
    #[error("authentication required")]
    AuthRequired,

    /// Identity does not own the resource. Never produces partial effect.
    #[error("you do not own this resource")]
    Forbidden,

    /// Caller has no profile or no username yet; distinct from Forbidden.
    #[error("profile setup is required before creating content")]
    SetupRequired,

    #[error("username is already taken")]
    UsernameTaken,

    #[error("slug '{0}' is already taken")]
    SlugTaken(String),

    /// A bio block already exists; the id points at it so the client can
    /// switch to editing instead.
    #[error("a bio block already exists")]
    BioExists(Uuid),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid slug '{0}'")]
    InvalidSlug(String),

    #[error("invalid username")]
    InvalidUsername,

    /// Content payload variant does not match the block's type.
    #[error("content does not match the block type")]
    ContentMismatch,

    #[error("this block type is not supported yet")]
    UnsupportedBlockType,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Reorder attempted every update; `failed` of `total` did not apply.
    #[error("{failed} of {total} position updates failed")]
    ReorderPartialFailure { failed: usize, total: usize },

    #[error("file is not a supported image")]
    InvalidImage,

    #[error("image exceeds the size limit")]
    ImageTooLarge,

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("storage error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("storage error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A stored row failed to decode against the schema. Surfaced loudly
    /// rather than papered over.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "auth_required",
            AppError::Forbidden => "forbidden",
            AppError::SetupRequired => "setup_required",
            AppError::UsernameTaken => "username_taken",
            AppError::SlugTaken(_) => "slug_taken",
            AppError::BioExists(_) => "bio_exists",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidSlug(_) => "invalid_slug",
            AppError::InvalidUsername => "invalid_username",
            AppError::ContentMismatch => "content_mismatch",
            AppError::UnsupportedBlockType => "unsupported_block_type",
            AppError::InvalidPayload(_) => "invalid_payload",
            AppError::ReorderPartialFailure { .. } => "reorder_partial_failure",
            AppError::InvalidImage => "invalid_image",
            AppError::ImageTooLarge => "image_too_large",
            AppError::Storage(_)
            | AppError::Transaction(_)
            | AppError::Table(_)
            | AppError::Commit(_)
            | AppError::Codec(_)
            | AppError::Io(_) => "storage",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::SetupRequired
            | AppError::UsernameTaken
            | AppError::SlugTaken(_)
            | AppError::BioExists(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidSlug(_)
            | AppError::InvalidUsername
            | AppError::ContentMismatch
            | AppError::UnsupportedBlockType
            | AppError::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidImage => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ImageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ReorderPartialFailure { .. }
            | AppError::Storage(_)
            | AppError::Transaction(_)
            | AppError::Table(_)
            | AppError::Commit(_)
            | AppError::Codec(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        // Point the client at the block it should edit instead.
        if let AppError::BioExists(existing) = &self {
            body["existing_block_id"] = json!(existing);
        }

        (status, Json(body)).into_response()
    }
}
