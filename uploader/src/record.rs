//! The in-memory description of one video queued for upload, and its lifecycle.

use crate::error::{Error, Result};
use jiff::civil::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a [`VideoRecord`] is in its upload lifecycle.
///
/// `pending → uploading → completed | failed`, and `failed → pending` when the operator asks
/// for a retry. Nothing skips `uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        })
    }
}

/// Race-vs-race classification of a game, from the uploader's (Protoss) point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Matchup {
    #[serde(rename = "PVP")]
    Pvp,
    #[serde(rename = "PVZ")]
    Pvz,
    #[serde(rename = "PVT")]
    Pvt,
    /// Protoss vs Random.
    #[serde(rename = "PVR")]
    Pvr,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl Matchup {
    pub fn as_str(self) -> &'static str {
        match self {
            Matchup::Pvp => "PVP",
            Matchup::Pvz => "PVZ",
            Matchup::Pvt => "PVT",
            Matchup::Pvr => "PVR",
            Matchup::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Matchup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Matchup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            Matchup::Pvp,
            Matchup::Pvz,
            Matchup::Pvt,
            Matchup::Pvr,
            Matchup::Unknown,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown matchup `{s}`"))
    }
}

/// Languages a video can carry a title/description for.
///
/// English is the language videos are authored in; the others are produced by term
/// substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "zh-TW")]
    TraditionalChinese,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "zh-CN")]
    SimplifiedChinese,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::English,
        Language::TraditionalChinese,
        Language::Japanese,
        Language::Korean,
        Language::SimplifiedChinese,
    ];

    /// The BCP-47 tag YouTube expects as a localization key.
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::TraditionalChinese => "zh-TW",
            Language::Japanese => "ja",
            Language::Korean => "ko",
            Language::SimplifiedChinese => "zh-CN",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown language `{s}`"))
    }
}

pub const DEFAULT_GAME_NAME: &str = "StarCraft II";

/// One candidate upload.
///
/// The descriptive fields are public and freely editable while the record is pending. The
/// lifecycle fields (status, remote video id, error message) only change through the
/// transition methods, which keep them consistent: the video id is present iff the record is
/// [`UploadStatus::Completed`], the error message iff it is [`UploadStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredVideoRecord")]
pub struct VideoRecord {
    pub video_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_path: Option<PathBuf>,
    pub title: String,
    pub description: String,
    pub game_name: String,
    /// Local wall-clock time the video should go public.
    pub publish_at: DateTime,
    pub playlist_ids: Vec<String>,
    pub subtitle_languages: Vec<Language>,
    pub matchup: Matchup,
    status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replay_url: Option<String>,
}

impl VideoRecord {
    /// Creates a pending record scheduled for 18:00 local time today.
    pub fn new(video_path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            video_path: video_path.into(),
            thumbnail_path: None,
            replay_path: None,
            title: title.into(),
            description: String::new(),
            game_name: DEFAULT_GAME_NAME.to_string(),
            publish_at: default_publish_at(),
            playlist_ids: Vec::new(),
            subtitle_languages: default_subtitle_languages(),
            matchup: Matchup::Unknown,
            status: UploadStatus::Pending,
            video_id: None,
            error_message: None,
            replay_url: None,
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn replay_url(&self) -> Option<&str> {
        self.replay_url.as_deref()
    }

    pub fn attach_replay_url(&mut self, url: impl Into<String>) {
        self.replay_url = Some(url.into());
    }

    /// The thumbnail to apply, ignoring an empty path.
    pub fn thumbnail(&self) -> Option<&Path> {
        non_empty(self.thumbnail_path.as_deref())
    }

    /// The replay file to back up, ignoring an empty path.
    pub fn replay(&self) -> Option<&Path> {
        non_empty(self.replay_path.as_deref())
    }

    /// `YYYY-MM-DD HH:MM`, for listings.
    pub fn publish_time_display(&self) -> String {
        self.publish_at.strftime("%Y-%m-%d %H:%M").to_string()
    }

    /// Checks that the record carries what a submission needs.
    pub fn validate(&self) -> Result<()> {
        if self.video_path.as_os_str().is_empty() {
            return Err(Error::Validation("video path"));
        }
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title"));
        }
        Ok(())
    }

    /// `pending → uploading`.
    pub fn start_upload(&mut self) -> Result<()> {
        self.ensure_status(UploadStatus::Pending, UploadStatus::Uploading)?;
        self.status = UploadStatus::Uploading;
        Ok(())
    }

    /// `uploading → completed`, recording the id the remote assigned.
    pub fn complete(&mut self, video_id: impl Into<String>) -> Result<()> {
        self.ensure_status(UploadStatus::Uploading, UploadStatus::Completed)?;
        self.status = UploadStatus::Completed;
        self.video_id = Some(video_id.into());
        Ok(())
    }

    /// `uploading → failed`, recording why.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.ensure_status(UploadStatus::Uploading, UploadStatus::Failed)?;
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        self.status = UploadStatus::Failed;
        self.error_message = Some(error);
        Ok(())
    }

    /// `failed → pending`, for an explicit operator retry.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_status(UploadStatus::Failed, UploadStatus::Pending)?;
        self.status = UploadStatus::Pending;
        self.error_message = None;
        Ok(())
    }

    fn ensure_status(&self, from: UploadStatus, to: UploadStatus) -> Result<()> {
        if self.status == from {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// 18:00 on the current local calendar day.
pub fn default_publish_at() -> DateTime {
    jiff::Zoned::now().date().at(18, 0, 0, 0)
}

fn default_subtitle_languages() -> Vec<Language> {
    vec![Language::English, Language::TraditionalChinese]
}

fn default_game_name() -> String {
    DEFAULT_GAME_NAME.to_string()
}

/// The storable form of a [`VideoRecord`], as it appears in manifests and reports.
///
/// Everything but the video path and title may be omitted. Deserialization goes through this
/// type so that a stored record whose lifecycle fields contradict each other is rejected instead
/// of loaded.
#[derive(Deserialize)]
struct StoredVideoRecord {
    video_path: PathBuf,
    #[serde(default)]
    thumbnail_path: Option<PathBuf>,
    #[serde(default)]
    replay_path: Option<PathBuf>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_game_name")]
    game_name: String,
    #[serde(default = "default_publish_at")]
    publish_at: DateTime,
    #[serde(default)]
    playlist_ids: Vec<String>,
    #[serde(default = "default_subtitle_languages")]
    subtitle_languages: Vec<Language>,
    #[serde(default)]
    matchup: Matchup,
    #[serde(default)]
    status: UploadStatus,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    replay_url: Option<String>,
}

impl TryFrom<StoredVideoRecord> for VideoRecord {
    type Error = String;

    fn try_from(stored: StoredVideoRecord) -> std::result::Result<Self, Self::Error> {
        let completed = stored.status == UploadStatus::Completed;
        let failed = stored.status == UploadStatus::Failed;
        if completed != stored.video_id.is_some() {
            return Err(format!(
                "a {} record must {}carry a video_id",
                stored.status,
                if completed { "" } else { "not " }
            ));
        }
        if failed != stored.error_message.is_some() {
            return Err(format!(
                "a {} record must {}carry an error_message",
                stored.status,
                if failed { "" } else { "not " }
            ));
        }

        Ok(Self {
            video_path: stored.video_path,
            thumbnail_path: stored.thumbnail_path,
            replay_path: stored.replay_path,
            title: stored.title,
            description: stored.description,
            game_name: stored.game_name,
            publish_at: stored.publish_at,
            playlist_ids: stored.playlist_ids,
            subtitle_languages: stored.subtitle_languages,
            matchup: stored.matchup,
            status: stored.status,
            video_id: stored.video_id,
            error_message: stored.error_message,
            replay_url: stored.replay_url,
        })
    }
}
