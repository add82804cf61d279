//! Drive v3 file uploads and sharing, used to publish replay files.

use crate::credentials::{Credential, TokenSource};
use crate::error::Result;
use crate::google_api::{GoogleClient, ResumableSession};
use http::Method;
use serde::Serialize;
use std::path::Path;
use tracing::instrument;

/// Metadata of a file being created.
///
/// See: <https://developers.google.com/drive/api/reference/rest/v3/files/create>
#[derive(Debug, Serialize)]
pub struct DriveFileMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

/// See: <https://developers.google.com/drive/api/reference/rest/v3/permissions#Permission>
#[derive(Debug, Serialize)]
pub struct Permission {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
}

/// Link anyone can use to view a shared Drive file.
pub fn share_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view?usp=sharing")
}

impl GoogleClient {
    /// Prepares a resumable upload of `path` into `folder_id` (the Drive root if `None`).
    pub async fn drive_upload_session<'a>(
        &self,
        tokens: &'a mut dyn TokenSource,
        path: &Path,
        name: String,
        folder_id: Option<&str>,
        chunk_size: u64,
    ) -> Result<ResumableSession<'a>> {
        let metadata = DriveFileMetadata {
            name,
            parents: folder_id.map(str::to_string).into_iter().collect(),
        };
        ResumableSession::open(
            self,
            tokens,
            self.url("/upload/drive/v3/files"),
            &[("uploadType", "resumable"), ("fields", "id")],
            &metadata,
            path,
            chunk_size,
        )
        .await
    }

    /// Lets anyone with the link read `file_id`.
    #[instrument(skip(self, credential))]
    pub async fn share_publicly(&self, credential: &Credential, file_id: &str) -> eyre::Result<()> {
        let permission = Permission {
            kind: "anyone",
            role: "reader",
        };
        self.make_authenticated_request(
            credential,
            Method::POST,
            &self.url(&format!("/drive/v3/files/{file_id}/permissions")),
            None,
            Some(&permission),
        )
        .await?;
        tracing::debug!(file_id, "file shared publicly");
        Ok(())
    }
}
