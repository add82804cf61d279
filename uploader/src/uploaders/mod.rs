//! Video platforms we can publish to, and places replays can be backed up to.

mod bilibili;
mod drive;
mod youtube;

pub use bilibili::BilibiliUploader;
pub use drive::DriveBackup;
pub use youtube::YouTubeUploader;

use crate::config::{Config, Platform};
use crate::credentials::{Credential, Provider, TokenSource};
use crate::engine::ResumableUploader;
use crate::error::Result;
use crate::google_api::GoogleClient;
use crate::metadata::{Localizations, VideoMetadata};
use async_trait::async_trait;
use std::path::Path;

/// A video platform.
///
/// Every call is handed a credential for [`Uploader::provider`], obtained right before the call.
/// Uploads, which can outlive an access token, get a [`TokenSource`] to ask instead.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Display name, for logs and reports.
    fn platform(&self) -> &'static str;

    /// Which credential the calls below need.
    fn provider(&self) -> Result<Provider>;

    /// Creates the video and returns the platform's id for it.
    async fn upload(
        &self,
        tokens: &mut dyn TokenSource,
        video_path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<String>;

    async fn set_thumbnail(
        &self,
        credential: &Credential,
        video_id: &str,
        thumbnail_path: &Path,
    ) -> Result<()>;

    async fn add_to_playlist(
        &self,
        credential: &Credential,
        video_id: &str,
        playlist_id: &str,
    ) -> Result<()>;

    /// Adds per-language titles and descriptions, keeping any the video already has.
    async fn update_localizations(
        &self,
        credential: &Credential,
        video_id: &str,
        localizations: &Localizations,
    ) -> Result<()>;
}

/// Somewhere to publish the replay file a video was recorded from.
#[async_trait]
pub trait ReplayBackup: Send + Sync {
    fn provider(&self) -> Provider;

    /// Uploads `replay_path` and returns a link viewers can download it from.
    async fn backup(&self, tokens: &mut dyn TokenSource, replay_path: &Path) -> Result<String>;
}

/// The uploader for the platform `config` selects.
pub fn uploader_for(config: &Config, client: GoogleClient) -> Box<dyn Uploader> {
    match config.upload.platform {
        Platform::YouTube => Box::new(YouTubeUploader::new(
            client,
            ResumableUploader::new(config.upload.max_retries),
            config.upload.chunk_size(),
        )),
        Platform::Bilibili => Box::new(BilibiliUploader),
    }
}
