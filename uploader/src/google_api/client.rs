//! Authenticated access to the Google REST endpoints we call.

use crate::credentials::Credential;
use eyre::Context;
use http::Method;
use serde::Serialize;
use tracing::instrument;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

/// Client for the YouTube Data API v3 and the Drive API v3.
///
/// The client does not own credentials: every call is handed the credential the caller got from
/// the [`crate::credentials::CredentialStore`], which is responsible for keeping it fresh.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleClient {
    pub fn new() -> eyre::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Points every endpoint at `base_url` instead of `https://www.googleapis.com`.
    pub fn with_base_url(base_url: impl Into<String>) -> eyre::Result<Self> {
        let http = reqwest::ClientBuilder::new()
            // Resumable uploads answer 308 without a Location; that must reach us, not be followed.
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Joins `path` (starting with `/`) onto the base URL.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Makes a Bearer-authenticated request and fails on any non-success status.
    ///
    /// The raw [`reqwest::Response`] is returned for method-specific JSON parsing.
    #[instrument(skip(self, credential, json_body), level = tracing::Level::TRACE)]
    pub(crate) async fn make_authenticated_request(
        &self,
        credential: &Credential,
        method: Method,
        url: &str,
        query_params: Option<&[(&str, &str)]>,
        json_body: Option<&impl Serialize>,
    ) -> eyre::Result<reqwest::Response> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(credential.access_token());
        if let Some(params) = query_params {
            request = request.query(params);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("send {method} request to {url}"))?;
        ensure_success(response, &method).await
    }

    /// Like [`Self::make_authenticated_request`], with a raw body instead of JSON.
    #[instrument(skip(self, credential, body), level = tracing::Level::TRACE)]
    pub(crate) async fn send_authenticated_bytes(
        &self,
        credential: &Credential,
        method: Method,
        url: &str,
        query_params: &[(&str, &str)],
        content_type: &str,
        body: Vec<u8>,
    ) -> eyre::Result<reqwest::Response> {
        let response = self
            .http
            .request(method.clone(), url)
            .bearer_auth(credential.access_token())
            .query(query_params)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("send {method} request to {url}"))?;
        ensure_success(response, &method).await
    }
}

async fn ensure_success(response: reqwest::Response, method: &Method) -> eyre::Result<reqwest::Response> {
    let status_code = response.status();
    if status_code.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(eyre::eyre!(
        "Google API {} {} failed with status {}: {}",
        method,
        url.path(),
        status_code,
        error_text
    ))
}
