//! Error taxonomy shared by every stage of the upload pipeline.
//!
//! Collaborator calls (OAuth flows, Google REST helpers, config loading) report through
//! [`eyre::Report`] the same way the rest of the crate's glue code does; the variants here are
//! what those reports get classified into once they reach the credential store, the upload
//! engine or the orchestrator.

use crate::credentials::Provider;
use crate::record::UploadStatus;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credential can be obtained without interactive consent.
    #[error("no usable {provider} credential: {reason}")]
    Auth { provider: Provider, reason: String },

    /// A refresh was attempted but could not produce a new access token.
    #[error("refreshing the {provider} credential failed: {reason}")]
    Refresh { provider: Provider, reason: String },

    /// Transient transport fault (connection reset, timeout, ...).
    ///
    /// Produced by chunk transports and consumed by the upload engine; it only escapes the
    /// engine wrapped in [`Error::RetryExhausted`].
    #[error("transient transfer failure: {0}")]
    RetriableTransfer(String),

    #[error("upload abandoned after {retries} retries, last failure: {last_error}")]
    RetryExhausted { retries: u32, last_error: String },

    /// The remote API answered with a status code.
    ///
    /// Whether this is worth retrying is decided by the upload engine, not by the producer.
    #[error("remote API answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The remote API reported success but the response does not identify the new resource.
    #[error("upload finished with an unexpected response: {0}")]
    Protocol(String),

    #[error("video record is missing its {0}")]
    Validation(&'static str),

    #[error("uploading to {0} is not supported yet")]
    NotSupported(&'static str),

    #[error("a video cannot move from {from} to {to}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },

    #[error("cannot read {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    /// A best-effort remote call (thumbnail, playlist, localization, ...) failed.
    #[error("{context}: {message}")]
    Api {
        context: &'static str,
        message: String,
    },
}

impl Error {
    pub(crate) fn api(context: &'static str, report: eyre::Report) -> Self {
        Self::Api {
            context,
            message: format!("{report:#}"),
        }
    }
}
