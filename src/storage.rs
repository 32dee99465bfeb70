//! Avatar blob storage
//!
//! Filesystem-backed object store behind the narrow contract the core
//! needs: save bytes under "{owner_id}/{generated_filename}", build the
//! public URL for a stored key, delete best-effort. The HTTP layer serves
//! the stored files back under /uploads.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::AppError;

/// Upper bound on an avatar upload. The router's body limit backs this up.
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// Root directory for stored objects, configurable via UPLOAD_DIR.
pub fn upload_root() -> PathBuf {
    PathBuf::from(std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()))
}

/// Sniffs the image type from magic bytes; None for anything unsupported.
fn image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: 52 49 46 46 ... 57 45 42 50
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Rejects path traversal and separator characters in served filenames.
pub fn safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}

/// Stores avatar bytes for an owner and returns the object key
/// ("{owner_id}/{uuid}.{ext}").
///
/// The bytes are sniffed: anything that is not a jpeg/png/gif/webp is
/// rejected, as is anything over the size cap.
pub async fn save_avatar(owner_id: Uuid, bytes: &[u8]) -> Result<String, AppError> {
    if bytes.len() > MAX_AVATAR_BYTES {
        return Err(AppError::ImageTooLarge);
    }
    let mime = image_mime(bytes).ok_or(AppError::InvalidImage)?;

    let key = format!("{}/{}.{}", owner_id, Uuid::new_v4(), extension_for(mime));
    let path = upload_root().join(&key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;

    tracing::info!(owner_id = %owner_id, key = %key, size = bytes.len(), "avatar stored");
    Ok(key)
}

/// Public URL for a stored object key.
pub fn public_url(key: &str) -> String {
    let base = std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| {
        let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        format!("http://localhost:{}", port)
    });
    format!("{}/uploads/{}", base.trim_end_matches('/'), key)
}

/// Object key for a public URL previously produced by [`public_url`],
/// if the URL points into this store.
pub fn key_from_url(url: &str) -> Option<String> {
    url.split_once("/uploads/").map(|(_, key)| key.to_string())
}

/// Best-effort delete of a stored object.
///
/// A replaced avatar that is already gone is expected and non-fatal, so
/// failures are logged and swallowed rather than propagated.
pub async fn delete_object(key: &str) {
    let path = upload_root().join(key);
    if let Err(err) = tokio::fs::remove_file(&path).await {
        tracing::warn!(key = %key, "avatar cleanup failed (ignored): {}", err);
    }
}

/// Absolute path for serving a stored object, refusing unsafe segments.
pub fn object_path(owner_id: &str, filename: &str) -> Option<PathBuf> {
    if !safe_filename(owner_id) || !safe_filename(filename) {
        return None;
    }
    Some(upload_root().join(Path::new(owner_id)).join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_image_types() {
        assert_eq!(image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(image_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), Some("image/png"));
        assert_eq!(image_mime(&[0x47, 0x49, 0x46, 0x38, 0x39]), Some("image/gif"));
        assert_eq!(
            image_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some("image/webp")
        );
        assert_eq!(image_mime(b"%PDF-1.4"), None);
        assert_eq!(image_mime(&[]), None);
    }

    #[test]
    fn rejects_unsafe_filenames() {
        assert!(safe_filename("avatar.png"));
        assert!(!safe_filename("../secret"));
        assert!(!safe_filename("a/b.png"));
        assert!(!safe_filename("a\\b.png"));
        assert!(!safe_filename(""));
    }

    #[test]
    fn url_round_trips_to_key() {
        let key = "owner/file.png";
        let url = format!("http://example.test/uploads/{}", key);
        assert_eq!(key_from_url(&url).as_deref(), Some(key));
        assert_eq!(key_from_url("http://example.test/other/file.png"), None);
    }
}
