use crate::credentials::{Credential, Provider, TokenSource};
use crate::error::{Error, Result};
use crate::metadata::{Localizations, VideoMetadata};
use crate::uploaders::Uploader;
use async_trait::async_trait;
use std::path::Path;

const PLATFORM: &str = "Bilibili";

/// Placeholder so that Bilibili can be selected in the config; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct BilibiliUploader;

#[async_trait]
impl Uploader for BilibiliUploader {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn provider(&self) -> Result<Provider> {
        Err(Error::NotSupported(PLATFORM))
    }

    async fn upload(
        &self,
        _tokens: &mut dyn TokenSource,
        _video_path: &Path,
        _metadata: &VideoMetadata,
    ) -> Result<String> {
        Err(Error::NotSupported(PLATFORM))
    }

    async fn set_thumbnail(
        &self,
        _credential: &Credential,
        _video_id: &str,
        _thumbnail_path: &Path,
    ) -> Result<()> {
        Err(Error::NotSupported(PLATFORM))
    }

    async fn add_to_playlist(
        &self,
        _credential: &Credential,
        _video_id: &str,
        _playlist_id: &str,
    ) -> Result<()> {
        Err(Error::NotSupported(PLATFORM))
    }

    async fn update_localizations(
        &self,
        _credential: &Credential,
        _video_id: &str,
        _localizations: &Localizations,
    ) -> Result<()> {
        Err(Error::NotSupported(PLATFORM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::fresh_credential;

    #[tokio::test]
    async fn every_call_is_unsupported() {
        let uploader = BilibiliUploader;
        let credential = fresh_credential("token");
        assert!(matches!(uploader.provider(), Err(Error::NotSupported("Bilibili"))));
        assert!(matches!(
            uploader
                .add_to_playlist(&credential, "vid", "PL")
                .await,
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            uploader
                .update_localizations(&credential, "vid", &Localizations::new())
                .await,
            Err(Error::NotSupported(_))
        ));
    }
}
