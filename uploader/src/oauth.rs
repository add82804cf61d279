//! Installed-application OAuth 2.0 flow against Google's identity endpoints.
//!
//! The consent screen itself lives in the user's browser; we open it, catch the redirect on a
//! loopback listener and exchange the code (with PKCE) for a token response.

use crate::credentials::{IdentityProvider, Provider};
use async_trait::async_trait;
use bytes::Bytes;
use eyre::Context;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RevocationUrl, Scope, TokenResponse, TokenUrl, reqwest,
};
use std::future::Future;
use tracing::instrument;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Used for both the code exchange and refreshes.
const TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v3/token";
const REVOCATION_URL: &str = "https://oauth2.googleapis.com/revoke";

const OAUTH_DONE_HTML: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>sc2-upload</title></head>\
<body><p>Authorization complete. You can close this tab and return to the terminal.</p></body></html>";

/// Runs Google's OAuth flows on behalf of one registered desktop client.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl OAuthManager {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> eyre::Result<Self> {
        let http = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")?;
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
        })
    }

    /// Opens the consent page for `provider`'s scopes and exchanges the resulting code.
    #[instrument(skip(self))]
    pub async fn authenticate(&self, provider: Provider) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(AUTH_URL.to_string()).context("authorization endpoint")?)
            .set_token_uri(TokenUrl::new(TOKEN_URL.to_string()).context("token endpoint")?)
            .set_redirect_uri(redirect_url)
            .set_revocation_url(
                RevocationUrl::new(REVOCATION_URL.to_string()).context("revocation endpoint")?,
            );

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // The flow runs exactly once per CSRF token.
            .authorize_url(move || csrf.clone())
            .add_scopes(
                provider
                    .scopes()
                    .iter()
                    .map(|scope| Scope::new(scope.to_string())),
            )
            // Google only hands out a refresh token on offline consent.
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, %provider, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_ref()) {
            tracing::warn!(error = %e, "could not open a browser, open the URL above manually");
        }
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        let token = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .context("exchange authorization code with access token")?;
        if token.refresh_token().is_none() {
            tracing::warn!(%provider, "grant came without a refresh token");
        }
        Ok(token)
    }

    /// Exchanges `token`'s refresh token for a new access token.
    ///
    /// `Ok(None)` means the token cannot be refreshed (no refresh token, or Google answered
    /// `invalid_grant`) and the user has to go through [`Self::authenticate`] again.
    #[instrument(skip(self, token))]
    pub async fn refresh_token(
        &self,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(TokenUrl::new(TOKEN_URL.to_string()).context("token endpoint")?);

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http)
            .await
        {
            Ok(new_token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(new_token))
            }
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(
                    sr.error(),
                    oauth2::basic::BasicErrorResponseType::InvalidGrant
                ) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthManager {
    async fn authorize(&self, provider: Provider) -> eyre::Result<BasicTokenResponse> {
        self.authenticate(provider).await
    }

    async fn refresh(
        &self,
        _provider: Provider,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        self.refresh_token(token).await
    }
}

/// Binds a loopback listener that accepts exactly one OAuth redirect.
///
/// Returns the redirect URL to register with the authorization request, and a future that
/// resolves to the authorization code once the browser comes back with a matching `state`.
async fn setup_redirect(
    csrf: CsrfToken,
) -> eyre::Result<(
    RedirectUrl,
    impl Future<Output = eyre::Result<AuthorizationCode>>,
)> {
    let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind to localhost")?;
    let addr = socket.local_addr().context("get local address")?;
    let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
        .context("construct redirect url")?;
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let r = async move {
            let (conn, _) = socket.accept().await.context("accept")?;
            let conn = hyper_util::rt::TokioIo::new(conn);
            let (got, mut gotten) = tokio::sync::mpsc::channel(1);
            let service = service_fn(move |req: Request<body::Incoming>| {
                let csrf = csrf.clone();
                let got = got.clone();
                async move {
                    let mut presented_state = None;
                    let mut presented_code = None;
                    let mut presented_error = None;
                    for (k, v) in form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                    {
                        match &*k {
                            "state" => presented_state = Some(v),
                            "code" => presented_code = Some(v),
                            "error" => presented_error = Some(v),
                            _ => {}
                        }
                    }
                    if presented_state.as_deref() != Some(csrf.secret().as_str()) {
                        return Err("invalid csrf token");
                    }
                    if let Some(error) = presented_error {
                        tracing::warn!(%error, "authorization was not granted");
                        return Err("authorization was not granted");
                    }
                    let Some(code) = presented_code else {
                        return Err("no authorization code found");
                    };
                    let code = AuthorizationCode::new(code.into_owned());
                    if got.send(code).await.is_err() {
                        return Err("redirect server already shut down");
                    }
                    Ok(Response::new(Full::<Bytes>::from(OAUTH_DONE_HTML)))
                }
            });
            let mut serve = std::pin::pin!(
                hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
            );

            tokio::select! {
                exit = &mut serve => {
                    if let Err(e) = exit {
                        Err(e).context("redirect server got bad request")
                    } else {
                        eyre::bail!("redirect server exit prematurely");
                    }
                }
                code = gotten.recv() => {
                    serve.as_mut().graceful_shutdown();
                    // Let the success page reach the browser.
                    let _ = serve.await;
                    code.ok_or_else(|| eyre::eyre!("redirect handler went away"))
                }
            }
        };
        let _ = tx.send(r.await);
    });
    Ok((url, async move {
        rx.await.context("redirect future dropped prematurely")?
    }))
}
