//! Takes a video from "file on disk" to "scheduled on the channel", one step at a time.
//!
//! Per video: back up the replay, build metadata, upload, then thumbnail, playlists and
//! localizations. Only a failed upload (or an unusable record) fails the video; everything after
//! it is best effort and ends up as a warning in the [`UploadReport`].

use crate::credentials::{Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::metadata::{MetadataBuilder, VideoMetadata};
use crate::record::{UploadStatus, VideoRecord};
use crate::uploaders::{ReplayBackup, Uploader};
use jiff::Timestamp;
use serde::Serialize;
use std::path::Path;
use tracing::instrument;

/// What happened to one video beyond its final status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub video_id: Option<String>,
    pub replay_url: Option<String>,
    /// Best-effort steps that failed.
    pub warnings: Vec<String>,
}

impl UploadReport {
    fn note(&mut self, step: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => tracing::info!(step, "done"),
            Err(e) => {
                tracing::warn!(step, error = %e, "step failed, continuing");
                self.warnings.push(format!("{step}: {e}"));
            }
        }
    }
}

/// Whether a batch goes on after a video failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    Continue,
    Halt,
}

/// The operator's view of a running batch.
pub trait BatchObserver {
    /// Called after every attempted video, successful or not.
    fn on_progress(&mut self, done: usize, total: usize, record: &VideoRecord, report: &UploadReport);

    fn on_failure(&mut self, record: &VideoRecord, error: &Error) -> BatchDecision;

    /// Checked before each video; a `true` ends the batch there.
    fn should_stop(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    /// Still pending when the batch ended.
    pub remaining: usize,
}

impl BatchSummary {
    pub fn of(records: &[VideoRecord]) -> Self {
        let count = |status| records.iter().filter(|r| r.status() == status).count();
        Self {
            completed: count(UploadStatus::Completed),
            failed: count(UploadStatus::Failed),
            remaining: count(UploadStatus::Pending),
        }
    }
}

/// Sequences the upload steps, owning the credentials and platform clients they need.
pub struct Pipeline {
    credentials: CredentialStore,
    uploader: Box<dyn Uploader>,
    backup: Option<Box<dyn ReplayBackup>>,
    builder: MetadataBuilder,
}

impl Pipeline {
    pub fn new(
        credentials: CredentialStore,
        uploader: Box<dyn Uploader>,
        backup: Option<Box<dyn ReplayBackup>>,
        builder: MetadataBuilder,
    ) -> Self {
        Self {
            credentials,
            uploader,
            backup,
            builder,
        }
    }

    /// Runs every step for one pending record, leaving it `completed` or `failed`.
    ///
    /// The error is the reason the record failed; best-effort failures only show up in the
    /// returned report.
    pub async fn process(&mut self, record: &mut VideoRecord) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        self.process_into(record, &mut report).await?;
        Ok(report)
    }

    /// [`Self::process`], filling in `report` as the steps go so that it survives a failure.
    #[instrument(skip_all, fields(title = %record.title, platform = self.uploader.platform()))]
    async fn process_into(
        &mut self,
        record: &mut VideoRecord,
        report: &mut UploadReport,
    ) -> Result<()> {
        record.start_upload()?;
        if let Err(e) = record.validate() {
            tracing::error!(error = %e, "video record is incomplete");
            record.fail(e.to_string())?;
            return Err(e);
        }

        if let Some(replay) = record.replay() {
            let backup = self.backup_replay(replay).await;
            match backup {
                Ok(Some(url)) => {
                    tracing::info!(%url, "replay backed up");
                    record.attach_replay_url(url);
                }
                Ok(None) => {}
                Err(e) => report.note("replay backup", Err(e)),
            }
        }
        report.replay_url = record.replay_url().map(str::to_string);

        let metadata =
            self.builder
                .video_metadata(record, report.replay_url.as_deref(), Timestamp::now());
        let video_id = match self.submit(&record.video_path, &metadata).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "video upload failed");
                record.fail(e.to_string())?;
                return Err(e);
            }
        };
        tracing::info!(%video_id, "video uploaded");
        record.complete(video_id.clone())?;
        report.video_id = Some(video_id.clone());

        if let Some(thumbnail) = record.thumbnail() {
            let outcome = match self.platform_credential().await {
                Ok(credential) => {
                    self.uploader
                        .set_thumbnail(&credential, &video_id, thumbnail)
                        .await
                }
                Err(e) => Err(e),
            };
            report.note("thumbnail", outcome);
        }

        for playlist_id in &record.playlist_ids {
            let outcome = match self.platform_credential().await {
                Ok(credential) => {
                    self.uploader
                        .add_to_playlist(&credential, &video_id, playlist_id)
                        .await
                }
                Err(e) => Err(e),
            };
            report.note(&format!("playlist {playlist_id}"), outcome);
        }

        if !record.subtitle_languages.is_empty() {
            let localizations = self
                .builder
                .localizations(record, report.replay_url.as_deref());
            let outcome = match self.platform_credential().await {
                Ok(credential) => {
                    self.uploader
                        .update_localizations(&credential, &video_id, &localizations)
                        .await
                }
                Err(e) => Err(e),
            };
            report.note("localizations", outcome);
        }

        Ok(())
    }

    /// Processes the pending records in order.
    ///
    /// A failed video is handed to the observer, which decides whether the batch goes on. Videos
    /// not reached stay `pending`.
    #[instrument(skip_all)]
    pub async fn run_batch(
        &mut self,
        records: &mut [VideoRecord],
        observer: &mut dyn BatchObserver,
    ) -> BatchSummary {
        let pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status() == UploadStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        let total = pending.len();
        tracing::info!(total, "starting batch");

        for (n, i) in pending.into_iter().enumerate() {
            if observer.should_stop() {
                tracing::info!(done = n, total, "stop requested, ending batch");
                break;
            }
            let record = &mut records[i];
            let mut report = UploadReport::default();
            let outcome = self.process_into(record, &mut report).await;
            observer.on_progress(n + 1, total, record, &report);
            if let Err(e) = outcome
                && observer.on_failure(record, &e) == BatchDecision::Halt
            {
                tracing::info!(done = n + 1, total, "batch halted after failure");
                break;
            }
        }

        let summary = BatchSummary::of(records);
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            remaining = summary.remaining,
            "batch finished"
        );
        summary
    }

    async fn backup_replay(&mut self, replay: &Path) -> Result<Option<String>> {
        let Some(backup) = &self.backup else {
            tracing::debug!("no replay backup configured, skipping");
            return Ok(None);
        };
        let mut tokens = self.credentials.tokens(backup.provider());
        backup.backup(&mut tokens, replay).await.map(Some)
    }

    async fn platform_credential(&mut self) -> Result<Credential> {
        let provider = self.uploader.provider()?;
        self.credentials.get_valid_credential(provider).await
    }

    async fn submit(&mut self, video_path: &Path, metadata: &VideoMetadata) -> Result<String> {
        let provider = self.uploader.provider()?;
        // fail before touching the file if there is no credential at all
        self.credentials.get_valid_credential(provider).await?;
        let mut tokens = self.credentials.tokens(provider);
        self.uploader.upload(&mut tokens, video_path, metadata).await
    }
}
