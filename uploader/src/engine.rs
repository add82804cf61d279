//! Drives a chunked upload to completion, retrying transient faults with randomized backoff.

use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::instrument;

pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Statuses Google documents as "try again later" for upload requests.
pub const RETRIABLE_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

/// Outcome of one successful chunk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    /// The remote committed `sent` of `total` bytes and expects more.
    InProgress { sent: u64, total: u64 },
    /// The remote accepted the last byte. Carries the new resource's id, if the response had one.
    Complete(Option<String>),
}

/// One step of an upload protocol at a time.
///
/// Implementations report transport faults as [`Error::RetriableTransfer`], remote refusals as
/// [`Error::Rejected`], and are expected to pick up where the remote left off when called again
/// after either.
#[async_trait]
pub trait ChunkTransport: Send {
    async fn next_chunk(&mut self) -> Result<ChunkProgress>;
}

/// The retry policy around a [`ChunkTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumableUploader {
    max_retries: u32,
}

impl Default for ResumableUploader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl ResumableUploader {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Issues chunk operations until the remote hands back an id.
    ///
    /// Retriable failures count against a single budget for the whole upload; the
    /// `max_retries + 1`-th one ends the upload with [`Error::RetryExhausted`] without sleeping.
    /// Between retries we sleep a uniformly random duration in `[0, 2^retry]` seconds.
    #[instrument(skip_all, fields(max_retries = self.max_retries))]
    pub async fn upload(&self, transport: &mut dyn ChunkTransport) -> Result<String> {
        let mut retry = 0;
        loop {
            let error = match transport.next_chunk().await {
                Ok(ChunkProgress::InProgress { sent, total }) => {
                    tracing::debug!(sent, total, "chunk committed");
                    continue;
                }
                Ok(ChunkProgress::Complete(Some(id))) => {
                    tracing::debug!(%id, retries = retry, "upload complete");
                    return Ok(id);
                }
                Ok(ChunkProgress::Complete(None)) => {
                    return Err(Error::Protocol(
                        "upload response did not contain a resource id".to_string(),
                    ));
                }
                Err(e) if is_retriable(&e) => e,
                Err(e) => {
                    tracing::error!(error = %e, "upload failed");
                    return Err(e);
                }
            };

            retry += 1;
            if retry > self.max_retries {
                tracing::error!(error = %error, "giving up on upload");
                return Err(Error::RetryExhausted {
                    retries: self.max_retries,
                    last_error: error.to_string(),
                });
            }
            let delay = backoff(retry);
            tracing::warn!(retry, ?delay, error = %error, "retrying upload");
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn is_retriable(error: &Error) -> bool {
    match error {
        Error::RetriableTransfer(_) => true,
        Error::Rejected { status, .. } => RETRIABLE_STATUS_CODES.contains(status),
        _ => false,
    }
}

fn backoff(retry: u32) -> Duration {
    let max_sleep = 2f64.powi(retry.min(62) as i32);
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max_sleep))
}
