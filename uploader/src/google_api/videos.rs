//! YouTube Videos and Thumbnails API types and functionality.

use crate::credentials::{Credential, TokenSource};
use crate::error::Result;
use crate::google_api::{GoogleClient, ResumableSession, mime_type_for};
use crate::metadata::{Localizations, VideoMetadata};
use eyre::Context;
use http::Method;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::instrument;

/// Request body for `videos.insert`.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/insert>
#[derive(Debug, Serialize)]
pub struct VideoInsertRequest<'a> {
    pub snippet: InsertSnippet<'a>,
    pub status: InsertStatus,
}

#[derive(Debug, Serialize)]
pub struct InsertSnippet<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub tags: &'a [String],
    #[serde(rename = "categoryId")]
    pub category_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct InsertStatus {
    #[serde(rename = "privacyStatus")]
    pub privacy_status: &'static str,
    /// Only honored for private videos.
    #[serde(rename = "publishAt", skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<Timestamp>,
}

impl<'a> From<&'a VideoMetadata> for VideoInsertRequest<'a> {
    fn from(metadata: &'a VideoMetadata) -> Self {
        Self {
            snippet: InsertSnippet {
                title: &metadata.title,
                description: &metadata.description,
                tags: &metadata.tags,
                category_id: &metadata.category_id,
            },
            status: InsertStatus {
                privacy_status: metadata.privacy.as_str(),
                publish_at: metadata.publish_at,
            },
        }
    }
}

/// Response structure for the `videos.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<LocalizedVideo>,
}

/// The `snippet` and `localizations` parts of a `video` resource.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct LocalizedVideo {
    pub id: String,
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub localizations: Localizations,
}

/// A video's snippet, as read back from and written back to the API.
///
/// `videos.update` replaces the whole snippet, so fields we do not touch are carried along
/// untouched in `rest`.
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoSnippet {
    pub title: String,
    #[serde(rename = "categoryId")]
    pub category_id: String,
    #[serde(rename = "defaultLanguage", skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl GoogleClient {
    /// Prepares a `videos.insert` resumable upload of `path` described by `metadata`.
    pub async fn video_upload_session<'a>(
        &self,
        tokens: &'a mut dyn TokenSource,
        metadata: &VideoMetadata,
        path: &Path,
        chunk_size: u64,
    ) -> Result<ResumableSession<'a>> {
        ResumableSession::open(
            self,
            tokens,
            self.url("/upload/youtube/v3/videos"),
            &[("uploadType", "resumable"), ("part", "snippet,status")],
            &VideoInsertRequest::from(metadata),
            path,
            chunk_size,
        )
        .await
    }

    /// Uploads `path` as the custom thumbnail of `video_id`.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/thumbnails/set>
    #[instrument(skip(self, credential))]
    pub async fn set_thumbnail(
        &self,
        credential: &Credential,
        video_id: &str,
        path: &Path,
    ) -> eyre::Result<()> {
        let image = tokio::fs::read(path)
            .await
            .with_context(|| format!("read thumbnail {}", path.display()))?;
        self.send_authenticated_bytes(
            credential,
            Method::POST,
            &self.url("/upload/youtube/v3/thumbnails/set"),
            &[("videoId", video_id), ("uploadType", "media")],
            mime_type_for(path),
            image,
        )
        .await?;
        tracing::debug!(video_id, "thumbnail set");
        Ok(())
    }

    /// Fetches a video's snippet and existing localizations.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self, credential))]
    pub async fn get_video_localizations(
        &self,
        credential: &Credential,
        video_id: &str,
    ) -> eyre::Result<LocalizedVideo> {
        let response = self
            .make_authenticated_request(
                credential,
                Method::GET,
                &self.url("/youtube/v3/videos"),
                Some(&[("part", "snippet,localizations"), ("id", video_id)]),
                None::<&()>,
            )
            .await?;
        let list: VideoListResponse = response
            .json()
            .await
            .context("parse YouTube API videos.list response as JSON")?;
        list.items
            .into_iter()
            .find(|v| v.id == video_id)
            .ok_or_else(|| eyre::eyre!("video {video_id} not found"))
    }

    /// Adds `localizations` to the video, keeping localizations it already has for other
    /// languages, and marks English as its default language.
    ///
    /// See: <https://developers.google.com/youtube/v3/docs/videos/update>
    #[instrument(skip(self, credential, localizations))]
    pub async fn update_video_localizations(
        &self,
        credential: &Credential,
        video_id: &str,
        localizations: &Localizations,
    ) -> eyre::Result<()> {
        let mut video = self.get_video_localizations(credential, video_id).await?;
        video.localizations.extend(
            localizations
                .iter()
                .map(|(language, text)| (language.clone(), text.clone())),
        );
        video.snippet.default_language = Some("en".to_string());

        self.make_authenticated_request(
            credential,
            Method::PUT,
            &self.url("/youtube/v3/videos"),
            Some(&[("part", "snippet,localizations")]),
            Some(&video),
        )
        .await?;
        tracing::debug!(
            video_id,
            languages = video.localizations.len(),
            "localizations updated"
        );
        Ok(())
    }
}
