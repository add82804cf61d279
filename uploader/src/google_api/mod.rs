//! Google REST surfaces used by the uploader: YouTube Data API v3 and Drive API v3.

pub mod client;
pub mod drive;
pub mod playlists;
pub mod resumable;
pub mod videos;

pub use client::GoogleClient;
pub use resumable::ResumableSession;

use std::path::Path;

/// Best-effort MIME type from a file's extension.
pub(crate) fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
