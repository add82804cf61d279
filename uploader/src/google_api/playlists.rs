//! YouTube PlaylistItems API types and functionality.

use crate::credentials::Credential;
use crate::google_api::GoogleClient;
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Request body for `playlistItems.insert`.
///
/// See: <https://developers.google.com/youtube/v3/docs/playlistItems/insert>
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub snippet: PlaylistItemSnippet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItemSnippet {
    #[serde(rename = "playlistId")]
    pub playlist_id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: ResourceId,
}

/// Identifies the resource a playlist item points at.
///
/// See: <https://developers.google.com/youtube/v3/docs/playlistItems#snippet.resourceId>
#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceId {
    /// Always `youtube#video` for us.
    pub kind: String,
    #[serde(rename = "videoId")]
    pub video_id: String,
}

impl GoogleClient {
    /// Appends `video_id` to the end of `playlist_id`.
    #[instrument(skip(self, credential))]
    pub async fn add_to_playlist(
        &self,
        credential: &Credential,
        playlist_id: &str,
        video_id: &str,
    ) -> eyre::Result<()> {
        let item = PlaylistItem {
            snippet: PlaylistItemSnippet {
                playlist_id: playlist_id.to_string(),
                resource_id: ResourceId {
                    kind: "youtube#video".to_string(),
                    video_id: video_id.to_string(),
                },
            },
        };
        self.make_authenticated_request(
            credential,
            Method::POST,
            &self.url("/youtube/v3/playlistItems"),
            Some(&[("part", "snippet")]),
            Some(&item),
        )
        .await?;
        tracing::debug!(playlist_id, video_id, "added video to playlist");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::fresh_credential;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn inserts_playlist_item() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("^/youtube/v3/playlistItems".to_string()))
            .match_query(Matcher::UrlEncoded("part".to_string(), "snippet".to_string()))
            .match_header("authorization", "Bearer token")
            .match_body(Matcher::Json(json!({
                "snippet": {
                    "playlistId": "PLpvz",
                    "resourceId": {"kind": "youtube#video", "videoId": "vid"}
                }
            })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let client = GoogleClient::with_base_url(server.url()).unwrap();
        client
            .add_to_playlist(&fresh_credential("token"), "PLpvz", "vid")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_playlist_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("^/youtube/v3/playlistItems".to_string()))
            .with_status(404)
            .with_body("playlistNotFound")
            .create_async()
            .await;

        let client = GoogleClient::with_base_url(server.url()).unwrap();
        let err = client
            .add_to_playlist(&fresh_credential("token"), "PLgone", "vid")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("playlistNotFound"), "{err}");
    }
}
