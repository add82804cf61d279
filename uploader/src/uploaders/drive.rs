use crate::credentials::{Provider, TokenSource};
use crate::engine::ResumableUploader;
use crate::error::{Error, Result};
use crate::google_api::GoogleClient;
use crate::google_api::drive::share_url;
use crate::uploaders::ReplayBackup;
use async_trait::async_trait;
use std::path::Path;
use tracing::instrument;

/// Replay file names are trimmed to start here, dropping recorder-specific prefixes.
const NAME_ANCHOR: &str = "【StarCraft II】";

/// Backs replays up to a Drive folder and shares them with anyone holding the link.
#[derive(Debug, Clone)]
pub struct DriveBackup {
    client: GoogleClient,
    engine: ResumableUploader,
    folder_id: Option<String>,
    chunk_size: u64,
}

impl DriveBackup {
    pub fn new(
        client: GoogleClient,
        engine: ResumableUploader,
        folder_id: Option<String>,
        chunk_size: u64,
    ) -> Self {
        Self {
            client,
            engine,
            folder_id,
            chunk_size,
        }
    }
}

/// The name a replay is stored under on Drive.
pub(crate) fn drive_file_name(replay_path: &Path) -> String {
    let name = replay_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(NAME_ANCHOR) {
        Some(start) => name[start..].to_string(),
        None => name,
    }
}

#[async_trait]
impl ReplayBackup for DriveBackup {
    fn provider(&self) -> Provider {
        Provider::GoogleDrive
    }

    #[instrument(skip(self, tokens))]
    async fn backup(&self, tokens: &mut dyn TokenSource, replay_path: &Path) -> Result<String> {
        let mut session = self
            .client
            .drive_upload_session(
                &mut *tokens,
                replay_path,
                drive_file_name(replay_path),
                self.folder_id.as_deref(),
                self.chunk_size,
            )
            .await?;
        let file_id = self.engine.upload(&mut session).await?;
        drop(session);

        let credential = tokens.credential().await?;
        self.client
            .share_publicly(&credential, &file_id)
            .await
            .map_err(|e| Error::api("share replay", e))?;
        Ok(share_url(&file_id))
    }
}
