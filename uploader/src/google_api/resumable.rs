//! Google's resumable upload protocol, one chunk per call.
//!
//! See: <https://developers.google.com/youtube/v3/guides/using_resumable_upload_protocol>

use crate::credentials::TokenSource;
use crate::engine::{ChunkProgress, ChunkTransport};
use crate::error::{Error, Result};
use crate::google_api::GoogleClient;
use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk sizes must be a multiple of this, except for the final chunk.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Rounds `requested` down to a usable chunk size (a non-zero multiple of 256 KiB).
pub fn normalize_chunk_size(requested: u64) -> u64 {
    (requested / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
}

/// The session-creating request, sent on the first call to [`ResumableSession::next_chunk`].
#[derive(Debug)]
struct Initiation {
    url: String,
    query: Vec<(String, String)>,
    metadata: serde_json::Value,
}

/// One file being sent through a resumable upload session.
///
/// The session is created lazily so that a failure to create it is retried by the engine like
/// any other chunk failure. After a failed chunk the committed offset is re-queried before
/// anything else is sent. Every request asks `tokens` for the current credential, and a 401 is
/// answered by renewing it once and repeating the request.
pub struct ResumableSession<'a> {
    http: reqwest::Client,
    tokens: &'a mut dyn TokenSource,
    initiation: Option<Initiation>,
    session_url: Option<String>,
    file: tokio::fs::File,
    path: PathBuf,
    content_type: &'static str,
    total: u64,
    offset: u64,
    chunk_size: u64,
    resync: bool,
}

impl std::fmt::Debug for ResumableSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableSession")
            .field("session_url", &self.session_url)
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl<'a> ResumableSession<'a> {
    /// Prepares an upload of `path` to `url`, to be described by `metadata`.
    ///
    /// Fails only if the file cannot be opened; nothing is sent until the first chunk.
    pub(crate) async fn open(
        client: &GoogleClient,
        tokens: &'a mut dyn TokenSource,
        url: String,
        query: &[(&str, &str)],
        metadata: &impl Serialize,
        path: &Path,
        chunk_size: u64,
    ) -> Result<Self> {
        let local_io = |source| Error::LocalIo {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(local_io)?;
        let total = file.metadata().await.map_err(local_io)?.len();
        let metadata = serde_json::to_value(metadata)
            .map_err(|e| Error::Protocol(format!("encode upload metadata: {e}")))?;

        Ok(Self {
            http: client.http_client().clone(),
            tokens,
            initiation: Some(Initiation {
                url,
                query: query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                metadata,
            }),
            session_url: None,
            file,
            path: path.to_path_buf(),
            content_type: super::mime_type_for(path),
            total,
            offset: 0,
            chunk_size: normalize_chunk_size(chunk_size),
            resync: false,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    async fn initiate(&mut self) -> Result<String> {
        let Some(initiation) = &self.initiation else {
            return Err(Error::Protocol("upload session was never initiated".to_string()));
        };
        tracing::debug!(url = %initiation.url, total = self.total, "initiating resumable upload");
        let (content_type, total) = (self.content_type, self.total);
        let response = send_authorized(&self.http, &mut *self.tokens, |client| {
            client.post(&initiation.url)
                .query(&initiation.query)
                .header("X-Upload-Content-Type", content_type)
                .header("X-Upload-Content-Length", total)
                .json(&initiation.metadata)
        })
        .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        let session_url = response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Protocol("upload session response carried no Location header".to_string())
            })?;
        self.initiation = None;
        self.session_url = Some(session_url.clone());
        Ok(session_url)
    }

    /// Asks the session how much it has committed. `Some` if it turns out to be complete.
    async fn query_offset(&mut self, session_url: &str) -> Result<Option<ChunkProgress>> {
        let content_range = format!("bytes */{}", self.total);
        let response = send_authorized(&self.http, &mut *self.tokens, |client| {
            client.put(session_url)
                .header(http::header::CONTENT_RANGE, &content_range)
                .header(http::header::CONTENT_LENGTH, 0)
        })
        .await?;

        match response.status() {
            StatusCode::PERMANENT_REDIRECT => {
                self.offset = committed_offset(&response);
                self.resync = false;
                tracing::debug!(offset = self.offset, total = self.total, "resumed upload session");
                Ok(None)
            }
            StatusCode::OK | StatusCode::CREATED => Ok(Some(completion(response).await)),
            _ => Err(rejected(response).await),
        }
    }

    async fn read_chunk(&mut self, len: u64) -> Result<Vec<u8>> {
        let local_io = |source| Error::LocalIo {
            path: self.path.clone(),
            source,
        };
        self.file
            .seek(std::io::SeekFrom::Start(self.offset))
            .await
            .map_err(local_io)?;
        let mut buf = vec![0; len as usize];
        self.file.read_exact(&mut buf).await.map_err(local_io)?;
        Ok(buf)
    }

    async fn send_chunk(&mut self, session_url: &str) -> Result<ChunkProgress> {
        let Some(remaining) = self.total.checked_sub(self.offset) else {
            return Err(Error::Protocol(format!(
                "upload session claims {} bytes of a {}-byte file",
                self.offset, self.total
            )));
        };
        let len = self.chunk_size.min(remaining);
        let body = self.read_chunk(len).await?;
        let content_type = self.content_type;
        let content_range = (len > 0).then(|| {
            format!("bytes {}-{}/{}", self.offset, self.offset + len - 1, self.total)
        });
        let response = send_authorized(&self.http, &mut *self.tokens, |client| {
            let request = client
                .put(session_url)
                .header(http::header::CONTENT_TYPE, content_type);
            let request = match &content_range {
                Some(range) => request.header(http::header::CONTENT_RANGE, range),
                None => request,
            };
            request.body(body.clone())
        })
        .await?;

        match response.status() {
            StatusCode::PERMANENT_REDIRECT => {
                self.offset = committed_offset(&response);
                Ok(ChunkProgress::InProgress {
                    sent: self.offset,
                    total: self.total,
                })
            }
            StatusCode::OK | StatusCode::CREATED => Ok(completion(response).await),
            _ => Err(rejected(response).await),
        }
    }
}

#[async_trait]
impl ChunkTransport for ResumableSession<'_> {
    async fn next_chunk(&mut self) -> Result<ChunkProgress> {
        let session_url = match self.session_url.clone() {
            Some(url) => url,
            None => self.initiate().await?,
        };

        if self.resync {
            if let Some(done) = self.query_offset(&session_url).await? {
                return Ok(done);
            }
        }

        let result = self.send_chunk(&session_url).await;
        if matches!(
            result,
            Err(Error::RetriableTransfer(_) | Error::Rejected { .. })
        ) {
            self.resync = true;
        }
        result
    }
}

/// Offset following the last byte in a `Range: bytes=0-N` header; zero if nothing is committed.
fn committed_offset(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split('-').nth(1))
        .and_then(|end| end.trim().parse::<u64>().ok())
        .map_or(0, |end| end + 1)
}

async fn completion(response: reqwest::Response) -> ChunkProgress {
    let id = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("id")?.as_str().map(str::to_string));
    ChunkProgress::Complete(id)
}

async fn rejected(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Error::Rejected { status, body }
}

/// Sends the request `build` describes with the current bearer token.
///
/// A 401 renews the token and sends the request once more; whatever comes back then is returned.
async fn send_authorized(
    http: &reqwest::Client,
    tokens: &mut dyn TokenSource,
    build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let credential = tokens.credential().await?;
    let response = build(http)
        .bearer_auth(credential.access_token())
        .send()
        .await
        .map_err(transfer_error)?;
    if response.status() != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }

    tracing::info!("access token refused mid-upload, renewing");
    let credential = tokens.renew(&credential).await?;
    build(http)
        .bearer_auth(credential.access_token())
        .send()
        .await
        .map_err(transfer_error)
}

fn transfer_error(e: reqwest::Error) -> Error {
    Error::RetriableTransfer(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::RotatingTokens;
    use crate::engine::ResumableUploader;
    use mockito::Matcher;

    const TOTAL: usize = 300_000;

    async fn session_for<'a>(
        server: &mockito::Server,
        dir: &tempfile::TempDir,
        tokens: &'a mut RotatingTokens,
    ) -> ResumableSession<'a> {
        let path = dir.path().join("game.mp4");
        std::fs::write(&path, vec![7u8; TOTAL]).unwrap();
        let client = GoogleClient::with_base_url(server.url()).unwrap();
        ResumableSession::open(
            &client,
            tokens,
            client.url("/upload/youtube/v3/videos"),
            &[("uploadType", "resumable"), ("part", "snippet,status")],
            &serde_json::json!({"snippet": {"title": "t"}}),
            &path,
            CHUNK_GRANULARITY,
        )
        .await
        .unwrap()
    }

    async fn mock_initiation(server: &mut mockito::Server) -> mockito::Mock {
        let location = format!("{}/session/1", server.url());
        server
            .mock("POST", Matcher::Regex("^/upload/youtube/v3/videos".to_string()))
            .match_query(Matcher::UrlEncoded(
                "uploadType".to_string(),
                "resumable".to_string(),
            ))
            .match_header("authorization", "Bearer token")
            .match_header("x-upload-content-length", "300000")
            .match_header("x-upload-content-type", "video/mp4")
            .with_status(200)
            .with_header("location", &location)
            .expect(1)
            .create_async()
            .await
    }

    fn chunk_mock(server: &mut mockito::Server, content_range: &str) -> mockito::Mock {
        server
            .mock("PUT", "/session/1")
            .match_header("content-range", content_range)
    }

    #[test]
    fn chunk_size_rounding() {
        assert_eq!(normalize_chunk_size(DEFAULT_CHUNK_SIZE), DEFAULT_CHUNK_SIZE);
        assert_eq!(normalize_chunk_size(CHUNK_GRANULARITY + 1), CHUNK_GRANULARITY);
        assert_eq!(normalize_chunk_size(3 * CHUNK_GRANULARITY - 1), 2 * CHUNK_GRANULARITY);
        assert_eq!(normalize_chunk_size(0), CHUNK_GRANULARITY);
    }

    #[tokio::test]
    async fn uploads_in_chunks_and_resumes_from_committed_offset() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let initiation = mock_initiation(&mut server).await;
        let first = chunk_mock(&mut server, "bytes 0-262143/300000")
            .with_status(308)
            .with_header("range", "bytes=0-262143")
            .expect(1)
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        assert_eq!(session.total_bytes(), TOTAL as u64);
        assert_eq!(
            session.next_chunk().await.unwrap(),
            ChunkProgress::InProgress {
                sent: 262_144,
                total: 300_000
            }
        );

        let failing = chunk_mock(&mut server, "bytes 262144-299999/300000")
            .with_status(503)
            .with_body("backend error")
            .create_async()
            .await;
        let err = session.next_chunk().await.unwrap_err();
        assert!(matches!(err, Error::Rejected { status: 503, .. }), "{err:?}");
        failing.remove_async().await;

        let resync = chunk_mock(&mut server, "bytes */300000")
            .with_status(308)
            .with_header("range", "bytes=0-262143")
            .expect(1)
            .create_async()
            .await;
        let last = chunk_mock(&mut server, "bytes 262144-299999/300000")
            .with_status(201)
            .with_body(r#"{"kind": "youtube#video", "id": "abc123"}"#)
            .expect(1)
            .create_async()
            .await;
        assert_eq!(
            session.next_chunk().await.unwrap(),
            ChunkProgress::Complete(Some("abc123".to_string()))
        );

        initiation.assert_async().await;
        first.assert_async().await;
        resync.assert_async().await;
        last.assert_async().await;
    }

    #[tokio::test]
    async fn offset_query_can_report_completion() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        mock_initiation(&mut server).await;
        let failing = chunk_mock(&mut server, "bytes 0-262143/300000")
            .with_status(502)
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        assert!(session.next_chunk().await.is_err());
        failing.remove_async().await;

        chunk_mock(&mut server, "bytes */300000")
            .with_status(200)
            .with_body(r#"{"id": "already-there"}"#)
            .create_async()
            .await;
        assert_eq!(
            session.next_chunk().await.unwrap(),
            ChunkProgress::Complete(Some("already-there".to_string()))
        );
    }

    #[tokio::test]
    async fn success_without_id_is_reported_as_such() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        mock_initiation(&mut server).await;
        chunk_mock(&mut server, "bytes 0-262143/300000")
            .with_status(308)
            .with_header("range", "bytes=0-262143")
            .create_async()
            .await;
        chunk_mock(&mut server, "bytes 262144-299999/300000")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        session.next_chunk().await.unwrap();
        assert_eq!(
            session.next_chunk().await.unwrap(),
            ChunkProgress::Complete(None)
        );
    }

    #[tokio::test]
    async fn rejected_initiation_is_not_swallowed() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        server
            .mock("POST", Matcher::Regex("^/upload/youtube/v3/videos".to_string()))
            .with_status(403)
            .with_body(r#"{"error": {"errors": [{"reason": "quotaExceeded"}]}}"#)
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        let err = session.next_chunk().await.unwrap_err();
        assert!(
            matches!(err, Error::Rejected { status: 403, ref body } if body.contains("quotaExceeded")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn initiation_without_location_is_a_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        server
            .mock("POST", Matcher::Regex("^/upload/youtube/v3/videos".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        let err = session.next_chunk().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    }

    #[tokio::test]
    async fn expired_token_mid_upload_is_renewed_once() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let location = format!("{}/session/1", server.url());
        server
            .mock("POST", Matcher::Regex("^/upload/youtube/v3/videos".to_string()))
            .match_header("authorization", "Bearer old-token")
            .with_status(200)
            .with_header("location", &location)
            .expect(1)
            .create_async()
            .await;
        chunk_mock(&mut server, "bytes 0-262143/300000")
            .match_header("authorization", "Bearer old-token")
            .with_status(308)
            .with_header("range", "bytes=0-262143")
            .expect(1)
            .create_async()
            .await;
        let refused = chunk_mock(&mut server, "bytes 262144-299999/300000")
            .match_header("authorization", "Bearer old-token")
            .with_status(401)
            .with_body("Invalid Credentials")
            .expect(1)
            .create_async()
            .await;
        let accepted = chunk_mock(&mut server, "bytes 262144-299999/300000")
            .match_header("authorization", "Bearer new-token")
            .with_status(200)
            .with_body(r#"{"id": "abc123"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["old-token", "new-token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        let id = ResumableUploader::default()
            .upload(&mut session)
            .await
            .unwrap();
        assert_eq!(id, "abc123");
        drop(session);
        assert_eq!(tokens.renewals, 1);
        refused.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn refused_token_that_cannot_be_renewed_fails_the_upload() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        mock_initiation(&mut server).await;
        let refused = chunk_mock(&mut server, "bytes 0-262143/300000")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        let err = ResumableUploader::default()
            .upload(&mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth { .. }), "{err:?}");
        drop(session);
        assert_eq!(tokens.renewals, 1);
        refused.assert_async().await;
    }

    #[tokio::test]
    async fn committed_offset_past_end_of_file_is_a_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        mock_initiation(&mut server).await;
        chunk_mock(&mut server, "bytes 0-262143/300000")
            .with_status(308)
            .with_header("range", "bytes=0-999999")
            .create_async()
            .await;

        let mut tokens = RotatingTokens::new(["token"]);
        let mut session = session_for(&server, &dir, &mut tokens).await;
        session.next_chunk().await.unwrap();
        let err = session.next_chunk().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_file_is_a_local_error() {
        let server = mockito::Server::new_async().await;
        let client = GoogleClient::with_base_url(server.url()).unwrap();
        let mut tokens = RotatingTokens::new(["token"]);
        let err = ResumableSession::open(
            &client,
            &mut tokens,
            client.url("/upload/youtube/v3/videos"),
            &[],
            &serde_json::json!({}),
            Path::new("/definitely/not/here.mp4"),
            DEFAULT_CHUNK_SIZE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::LocalIo { .. }), "{err:?}");
    }
}
