//! Batch uploader for StarCraft II replay videos.
//!
//! Given a list of [`VideoRecord`]s, the [`Pipeline`] backs each replay up to Google Drive,
//! uploads the video to YouTube with resumable chunked transfers, and then sets the thumbnail,
//! playlists and per-language titles. Credentials for both Google services are obtained through
//! the installed-app OAuth flow in [`oauth`] and cached on disk by [`CredentialStore`].

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod google_api;
pub mod metadata;
pub mod oauth;
pub mod pipeline;
pub mod record;
pub mod uploaders;

pub use config::Config;
pub use credentials::{Credential, CredentialStatus, CredentialStore, Provider};
pub use engine::ResumableUploader;
pub use error::{Error, Result};
pub use metadata::MetadataBuilder;
pub use oauth::OAuthManager;
pub use pipeline::{BatchDecision, BatchObserver, BatchSummary, Pipeline, UploadReport};
pub use record::{Language, Matchup, UploadStatus, VideoRecord};
