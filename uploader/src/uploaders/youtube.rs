use crate::credentials::{Credential, Provider, TokenSource};
use crate::engine::ResumableUploader;
use crate::error::{Error, Result};
use crate::google_api::GoogleClient;
use crate::metadata::{Localizations, VideoMetadata};
use crate::uploaders::Uploader;
use async_trait::async_trait;
use std::path::Path;
use tracing::instrument;

/// Publishes through the YouTube Data API, with the video itself sent as a resumable upload.
#[derive(Debug, Clone)]
pub struct YouTubeUploader {
    client: GoogleClient,
    engine: ResumableUploader,
    chunk_size: u64,
}

impl YouTubeUploader {
    pub fn new(client: GoogleClient, engine: ResumableUploader, chunk_size: u64) -> Self {
        Self {
            client,
            engine,
            chunk_size,
        }
    }
}

#[async_trait]
impl Uploader for YouTubeUploader {
    fn platform(&self) -> &'static str {
        "YouTube"
    }

    fn provider(&self) -> Result<Provider> {
        Ok(Provider::YouTube)
    }

    #[instrument(skip(self, tokens, metadata), fields(title = %metadata.title))]
    async fn upload(
        &self,
        tokens: &mut dyn TokenSource,
        video_path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<String> {
        let mut session = self
            .client
            .video_upload_session(tokens, metadata, video_path, self.chunk_size)
            .await?;
        tracing::info!(bytes = session.total_bytes(), "uploading video");
        self.engine.upload(&mut session).await
    }

    async fn set_thumbnail(
        &self,
        credential: &Credential,
        video_id: &str,
        thumbnail_path: &Path,
    ) -> Result<()> {
        self.client
            .set_thumbnail(credential, video_id, thumbnail_path)
            .await
            .map_err(|e| Error::api("set thumbnail", e))
    }

    async fn add_to_playlist(
        &self,
        credential: &Credential,
        video_id: &str,
        playlist_id: &str,
    ) -> Result<()> {
        self.client
            .add_to_playlist(credential, playlist_id, video_id)
            .await
            .map_err(|e| Error::api("add to playlist", e))
    }

    async fn update_localizations(
        &self,
        credential: &Credential,
        video_id: &str,
        localizations: &Localizations,
    ) -> Result<()> {
        self.client
            .update_video_localizations(credential, video_id, localizations)
            .await
            .map_err(|e| Error::api("update localizations", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Privacy;
    use crate::credentials::tests::{RotatingTokens, fresh_credential};
    use mockito::Matcher;

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "Protoss vs Zerg".to_string(),
            description: "#starcraft2\nProtoss vs Zerg".to_string(),
            tags: vec!["SC2".to_string()],
            category_id: "20".to_string(),
            privacy: Privacy::Private,
            publish_at: None,
        }
    }

    #[tokio::test]
    async fn uploads_video_and_returns_its_id() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.mp4");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let location = format!("{}/session/9", server.url());
        server
            .mock("POST", Matcher::Regex("^/upload/youtube/v3/videos".to_string()))
            .match_query(Matcher::UrlEncoded(
                "part".to_string(),
                "snippet,status".to_string(),
            ))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "snippet": {"title": "Protoss vs Zerg", "categoryId": "20"},
                "status": {"privacyStatus": "private"}
            })))
            .with_status(200)
            .with_header("location", &location)
            .create_async()
            .await;
        server
            .mock("PUT", "/session/9")
            .match_header("content-range", "bytes 0-4095/4096")
            .with_status(201)
            .with_body(r#"{"id": "fresh-video"}"#)
            .create_async()
            .await;

        let uploader = YouTubeUploader::new(
            GoogleClient::with_base_url(server.url()).unwrap(),
            ResumableUploader::new(3),
            256 * 1024,
        );
        let id = uploader
            .upload(&mut RotatingTokens::new(["token"]), &path, &metadata())
            .await
            .unwrap();
        assert_eq!(id, "fresh-video");
    }

    #[tokio::test]
    async fn rejected_upload_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.mp4");
        std::fs::write(&path, vec![0u8; 16]).unwrap();
        let mock = server
            .mock("POST", Matcher::Regex("^/upload/youtube/v3/videos".to_string()))
            .with_status(401)
            .with_body("invalid credentials")
            .expect(1)
            .create_async()
            .await;

        let uploader = YouTubeUploader::new(
            GoogleClient::with_base_url(server.url()).unwrap(),
            ResumableUploader::default(),
            256 * 1024,
        );
        let err = uploader
            .upload(&mut RotatingTokens::new(["token"]), &path, &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected { status: 401, .. }), "{err:?}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_failures_are_classified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("^/youtube/v3/playlistItems".to_string()))
            .with_status(403)
            .create_async()
            .await;
        let uploader = YouTubeUploader::new(
            GoogleClient::with_base_url(server.url()).unwrap(),
            ResumableUploader::default(),
            256 * 1024,
        );
        let err = uploader
            .add_to_playlist(&fresh_credential("token"), "vid", "PL")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Api { context: "add to playlist", .. }),
            "{err:?}"
        );
    }
}
