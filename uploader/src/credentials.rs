//! Per-provider OAuth credentials: persistence, expiry tracking and refresh.

use crate::error::{Error, Result};
use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::instrument;

/// Access tokens are treated as expired this long before Google says they are.
const EXPIRY_MARGIN: SignedDuration = SignedDuration::from_mins(5);

/// Lifetime assumed for a token response that carries no `expires_in`.
const ASSUMED_LIFETIME: SignedDuration = SignedDuration::from_mins(55);

/// An API surface we hold a separate grant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "youtube")]
    YouTube,
    #[serde(rename = "google-drive")]
    GoogleDrive,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::YouTube, Provider::GoogleDrive];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::GoogleDrive => "google-drive",
        }
    }

    /// OAuth scopes requested when authorizing this provider.
    pub fn scopes(self) -> &'static [&'static str] {
        match self {
            Provider::YouTube => &[
                "https://www.googleapis.com/auth/youtube.upload",
                "https://www.googleapis.com/auth/youtube.force-ssl",
            ],
            Provider::GoogleDrive => &["https://www.googleapis.com/auth/drive.file"],
        }
    }

    /// Name of the file, inside the token directory, holding this provider's credential.
    pub fn token_file_name(self) -> &'static str {
        match self {
            Provider::YouTube => "youtube_token.json",
            Provider::GoogleDrive => "google_drive_token.json",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown provider `{s}` (expected youtube or google-drive)"))
    }
}

/// An OAuth token response together with the instant we stop trusting its access token.
///
/// This is also the on-disk format: the `oauth2` token response as Google returned it, plus the
/// computed expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    token: BasicTokenResponse,
    expires_at: Timestamp,
}

impl Credential {
    /// Wraps a token that was issued just now.
    pub fn new(token: BasicTokenResponse) -> Self {
        Self::issued(token, Timestamp::now())
    }

    /// Wraps a token that was issued at `issued_at`.
    pub fn issued(token: BasicTokenResponse, issued_at: Timestamp) -> Self {
        Self {
            expires_at: Self::expiry_for(&token, issued_at),
            token,
        }
    }

    pub fn token(&self) -> &BasicTokenResponse {
        &self.token
    }

    pub fn access_token(&self) -> &str {
        self.token.access_token().secret()
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    pub fn can_refresh(&self) -> bool {
        self.token.refresh_token().is_some()
    }

    /// Replaces the token with the outcome of a refresh exchange, keeping our refresh token if
    /// Google did not hand out a new one.
    fn refreshed(mut self, new_token: BasicTokenResponse, now: Timestamp) -> Self {
        let old_token = std::mem::replace(&mut self.token, new_token);
        if self.token.refresh_token().is_none() {
            tracing::trace!("new token lacks refresh token, preserving original");
            self.token
                .set_refresh_token(old_token.refresh_token().cloned());
        }
        self.expires_at = Self::expiry_for(&self.token, now);
        self
    }

    fn expiry_for(token: &BasicTokenResponse, issued_at: Timestamp) -> Timestamp {
        let lifetime = match token.expires_in() {
            Some(expires_in) => SignedDuration::try_from(expires_in)
                .unwrap_or(SignedDuration::MAX)
                .saturating_sub(EXPIRY_MARGIN),
            None => ASSUMED_LIFETIME,
        };
        issued_at.checked_add(lifetime).unwrap_or(Timestamp::MAX)
    }
}

/// Something that can run the interactive consent flow and exchange refresh tokens.
///
/// [`crate::oauth::OAuthManager`] is the real implementation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Runs the interactive consent flow for `provider`'s scopes.
    async fn authorize(&self, provider: Provider) -> eyre::Result<BasicTokenResponse>;

    /// Exchanges the refresh token in `token`.
    ///
    /// Returns `Ok(None)` when there is no refresh token or the grant was rejected, in which case
    /// only [`IdentityProvider::authorize`] can produce a new credential.
    async fn refresh(
        &self,
        provider: Provider,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>>;
}

/// Hands out credentials for one provider over the course of a long operation.
///
/// Asked before every request instead of once up front, so a multi-chunk upload keeps going
/// when its access token runs out partway through.
#[async_trait]
pub trait TokenSource: Send {
    /// A credential whose access token is valid right now.
    async fn credential(&mut self) -> Result<Credential>;

    /// A replacement for `rejected`, whose access token the remote refused.
    async fn renew(&mut self, rejected: &Credential) -> Result<Credential>;
}

/// The [`TokenSource`] for one provider of a [`CredentialStore`].
#[derive(Debug)]
pub struct ProviderTokens<'a> {
    store: &'a mut CredentialStore,
    provider: Provider,
}

#[async_trait]
impl TokenSource for ProviderTokens<'_> {
    async fn credential(&mut self) -> Result<Credential> {
        self.store.get_valid_credential(self.provider).await
    }

    async fn renew(&mut self, rejected: &Credential) -> Result<Credential> {
        self.store.renew(self.provider, rejected).await
    }
}

/// Result of a side-effect-free credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub provider: Provider,
    pub valid: bool,
    pub expires_at: Option<Timestamp>,
    pub diagnostic: String,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {}",
            self.provider,
            if self.valid { "valid" } else { "invalid" },
            self.diagnostic
        )?;
        if let Some(expires_at) = self.expires_at {
            write!(f, " (expires {expires_at})")?;
        }
        Ok(())
    }
}

/// Owns every provider's credential, on disk and in memory.
///
/// Methods take `&mut self`; concurrent refreshes of the same provider are not coordinated.
pub struct CredentialStore {
    token_dir: PathBuf,
    identity: Box<dyn IdentityProvider>,
    cache: HashMap<Provider, Credential>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("token_dir", &self.token_dir)
            .field("cached", &self.cache.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(token_dir: impl Into<PathBuf>, identity: impl IdentityProvider + 'static) -> Self {
        Self {
            token_dir: token_dir.into(),
            identity: Box::new(identity),
            cache: HashMap::new(),
        }
    }

    pub fn token_path(&self, provider: Provider) -> PathBuf {
        self.token_dir.join(provider.token_file_name())
    }

    /// Returns a credential whose access token is valid right now.
    ///
    /// Prefers the in-memory copy, then the stored one, refreshing (and persisting) it if it
    /// expired. Fails with [`Error::Auth`] when only interactive consent could help.
    #[instrument(skip(self))]
    pub async fn get_valid_credential(&mut self, provider: Provider) -> Result<Credential> {
        let now = Timestamp::now();
        if let Some(credential) = self.cache.get(&provider)
            && !credential.is_expired_at(now)
        {
            return Ok(credential.clone());
        }

        let auth_error = |reason: String| Error::Auth { provider, reason };
        let credential = match self.load(provider).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Err(auth_error(format!(
                    "no stored credential, run `sc2-upload auth login {provider}`"
                )));
            }
            Err(e) => return Err(auth_error(e.to_string())),
        };

        if !credential.is_expired_at(now) {
            self.cache.insert(provider, credential.clone());
            return Ok(credential);
        }
        if !credential.can_refresh() {
            return Err(auth_error(
                "stored credential expired and has no refresh token".to_string(),
            ));
        }

        tracing::debug!("stored credential expired, attempting refresh");
        self.exchange_refresh(provider, credential)
            .await
            .map_err(|e| auth_error(e.to_string()))
    }

    /// Borrows the store as a [`TokenSource`] for `provider`.
    pub fn tokens(&mut self, provider: Provider) -> ProviderTokens<'_> {
        ProviderTokens {
            store: self,
            provider,
        }
    }

    /// Replaces a credential the remote refused before its computed expiry.
    ///
    /// If the store already holds a different, unexpired credential (another request renewed it
    /// first) that one is returned. Otherwise the refresh token is exchanged regardless of the
    /// recorded expiry. Fails with [`Error::Auth`] when only interactive consent could help.
    #[instrument(skip(self, rejected))]
    pub async fn renew(&mut self, provider: Provider, rejected: &Credential) -> Result<Credential> {
        let auth_error = |reason: String| Error::Auth { provider, reason };
        let current = match self.cache.get(&provider) {
            Some(credential) => credential.clone(),
            None => self
                .load(provider)
                .await
                .map_err(|e| auth_error(e.to_string()))?
                .ok_or_else(|| auth_error("no stored credential".to_string()))?,
        };
        if current.access_token() != rejected.access_token()
            && !current.is_expired_at(Timestamp::now())
        {
            return Ok(current);
        }

        self.cache.remove(&provider);
        if !current.can_refresh() {
            return Err(auth_error(
                "access token was refused and there is no refresh token".to_string(),
            ));
        }
        tracing::info!(%provider, "access token refused, refreshing");
        self.exchange_refresh(provider, current)
            .await
            .map_err(|e| auth_error(e.to_string()))
    }

    /// Runs the interactive consent flow and stores the resulting credential.
    #[instrument(skip(self))]
    pub async fn authenticate(&mut self, provider: Provider) -> Result<Credential> {
        let token = self
            .identity
            .authorize(provider)
            .await
            .map_err(|e| Error::Auth {
                provider,
                reason: format!("{e:#}"),
            })?;
        let credential = Credential::new(token);
        self.save(provider, &credential).await?;
        self.cache.insert(provider, credential.clone());
        tracing::info!(%provider, expires_at = %credential.expires_at, "stored new credential");
        Ok(credential)
    }

    /// Refreshes the stored credential, which must be expired and carry a refresh token.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self, provider: Provider) -> Result<Credential> {
        let refresh_error = |reason: &str| Error::Refresh {
            provider,
            reason: reason.to_string(),
        };
        let Some(credential) = self.load(provider).await? else {
            return Err(refresh_error("no stored credential"));
        };
        if !credential.is_expired_at(Timestamp::now()) {
            return Err(refresh_error("credential has not expired yet"));
        }
        if !credential.can_refresh() {
            return Err(refresh_error("credential has no refresh token"));
        }
        self.exchange_refresh(provider, credential).await
    }

    /// Reports on the stored credential without refreshing or writing anything.
    pub async fn check_status(&self, provider: Provider) -> CredentialStatus {
        let (valid, expires_at, diagnostic) = match self.load(provider).await {
            Ok(None) => (false, None, "no stored credential".to_string()),
            Err(e) => (false, None, e.to_string()),
            Ok(Some(credential)) => {
                let expires_at = Some(credential.expires_at);
                if !credential.is_expired_at(Timestamp::now()) {
                    (true, expires_at, "access token valid".to_string())
                } else if credential.can_refresh() {
                    (false, expires_at, "expired, refreshable".to_string())
                } else {
                    (false, expires_at, "expired, needs login".to_string())
                }
            }
        };
        CredentialStatus {
            provider,
            valid,
            expires_at,
            diagnostic,
        }
    }

    pub async fn check_all(&self) -> Vec<CredentialStatus> {
        let mut statuses = Vec::with_capacity(Provider::ALL.len());
        for provider in Provider::ALL {
            statuses.push(self.check_status(provider).await);
        }
        statuses
    }

    async fn exchange_refresh(
        &mut self,
        provider: Provider,
        credential: Credential,
    ) -> Result<Credential> {
        let refreshed = self
            .identity
            .refresh(provider, credential.token())
            .await
            .map_err(|e| Error::Refresh {
                provider,
                reason: format!("{e:#}"),
            })?;
        let Some(token) = refreshed else {
            tracing::warn!(%provider, "refresh token rejected");
            return Err(Error::Refresh {
                provider,
                reason: "refresh token was rejected, log in again".to_string(),
            });
        };

        let credential = credential.refreshed(token, Timestamp::now());
        self.save(provider, &credential).await?;
        self.cache.insert(provider, credential.clone());
        tracing::debug!(%provider, expires_at = %credential.expires_at, "refreshed credential");
        Ok(credential)
    }

    async fn load(&self, provider: Provider) -> Result<Option<Credential>> {
        let path = self.token_path(provider);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| storage_error(&path, e))
    }

    async fn save(&self, provider: Provider, credential: &Credential) -> Result<()> {
        let path = self.token_path(provider);
        tokio::fs::create_dir_all(&self.token_dir)
            .await
            .map_err(|e| storage_error(&self.token_dir, e))?;
        let bytes = serde_json::to_vec_pretty(credential).map_err(|e| storage_error(&path, e))?;

        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| storage_error(&staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| storage_error(&path, e))
    }
}

fn storage_error(path: &Path, e: impl fmt::Display) -> Error {
    Error::Storage {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
