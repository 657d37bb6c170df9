//! Adapter using the Auth0 PKCE login that Peloton's web app performs.
//!
//! The flow is:
//! 1. `GET /authorize` (following redirects) to obtain the `_csrf` cookie,
//! 2. `POST /usernamepassword/login` with the credentials,
//! 3. submit the hidden callback form (when the login answers with one),
//! 4. follow redirects until an authorization `code` shows up,
//! 5. exchange the code for a bearer token at `/oauth/token`.

use crate::config::Endpoints;
use crate::http_client::{self, AUTH_TIMEOUT, ApiHttp, USER_AGENT, WORKOUT_JOINS};
use crate::{
    Credentials, PelotonClient, PelotonError, ProfileRecord, WorkoutRecord, WorkoutSummary,
};
use async_trait::async_trait;
use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use regex::Regex;
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::LOCATION;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, LazyLock};
use tokio::sync::OnceCell;
use tracing::debug;

pub const NAME: &str = "oauth";

const CLIENT_ID: &str = "WVoJxVDdPoFx4RNewvvg6ch2mZ7bwnsM";
const AUDIENCE: &str = "https://api.onepeloton.com/";
const SCOPE: &str = "offline_access openid peloton-api.members:default";
const REDIRECT_URI: &str = "https://members.onepeloton.com/callback";
const AUTH0_CLIENT: &str = "eyJuYW1lIjoiYXV0aDAtc3BhLWpzIiwidmVyc2lvbiI6IjIuMS4zIn0=";
const AUTH0_CLIENT_ULP: &str = "eyJuYW1lIjoiYXV0aDAuanMtdWxwIiwidmVyc2lvbiI6IjkuMTQuMyJ9";
const MAX_REDIRECTS: usize = 10;

/// Registry factory.
pub fn factory(credentials: Credentials, endpoints: &Endpoints) -> Box<dyn PelotonClient> {
    Box::new(OAuthPelotonClient::new(credentials, endpoints))
}

/// PKCE verifier/challenge pair plus the anti-replay values sent with it.
#[derive(Debug)]
struct PkceParams {
    verifier: String,
    challenge: String,
    state: String,
    nonce: String,
}

impl PkceParams {
    fn generate() -> Self {
        let verifier = random_urlsafe(64);
        let challenge = code_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: random_urlsafe(32),
            nonce: random_urlsafe(32),
        }
    }
}

/// URL-safe random string of exactly `len` characters.
pub fn random_urlsafe(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    let mut s = URL_SAFE.encode(bytes);
    s.truncate(len);
    s
}

/// S256 code challenge for a PKCE verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug)]
pub struct OAuthPelotonClient {
    http: ApiHttp,
    auth_base_url: String,
    credentials: Credentials,
    jar: Arc<Jar>,
    token: OnceCell<SecretString>,
    user_id: OnceCell<String>,
}

impl OAuthPelotonClient {
    pub fn new(credentials: Credentials, endpoints: &Endpoints) -> Self {
        let jar = Arc::new(Jar::default());
        // Redirects are followed by hand: the authorization code arrives in a
        // Location header pointing at the web app, which must not be fetched.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(Arc::clone(&jar))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client build should not fail");
        Self {
            http: ApiHttp::new(&endpoints.api_base_url, client),
            auth_base_url: endpoints.auth_base_url.clone(),
            credentials,
            jar,
            token: OnceCell::new(),
            user_id: OnceCell::new(),
        }
    }

    async fn token(&self) -> Result<&SecretString, PelotonError> {
        self.token.get_or_try_init(|| self.login()).await
    }

    async fn user_id(&self) -> Result<&str, PelotonError> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let profile = self.fetch_profile().await?;
                profile
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| PelotonError::Decode("profile response has no `id`".into()))
            })
            .await?;
        Ok(id.as_str())
    }

    fn auth_url(&self, segments: &[&str]) -> Result<Url, PelotonError> {
        http_client::join_segments(&self.auth_base_url, segments)
    }

    fn authed_get(&self, token: &SecretString, url: Url) -> reqwest::RequestBuilder {
        self.http.get(url).bearer_auth(token.expose_secret())
    }

    async fn login(&self) -> Result<SecretString, PelotonError> {
        let pkce = PkceParams::generate();
        let authorize_url = self.authorize_url(&pkce)?;
        let (csrf, state) = self.initiate_auth_flow(authorize_url, &pkce.state).await?;
        let next = self.submit_credentials(&csrf, &state, &pkce).await?;
        let code = self.follow_auth_redirects(next).await?;
        let token = self.exchange_code_for_token(&code, &pkce.verifier).await?;
        debug!("oauth login complete");
        Ok(token)
    }

    fn authorize_url(&self, pkce: &PkceParams) -> Result<Url, PelotonError> {
        let mut url = self.auth_url(&["authorize"])?;
        url.query_pairs_mut()
            .append_pair("client_id", CLIENT_ID)
            .append_pair("audience", AUDIENCE)
            .append_pair("scope", SCOPE)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("redirect_uri", REDIRECT_URI)
            .append_pair("state", &pkce.state)
            .append_pair("nonce", &pkce.nonce)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("auth0Client", AUTH0_CLIENT);
        Ok(url)
    }

    /// Load the login page and return the CSRF token and the state Auth0 settled on.
    async fn initiate_auth_flow(
        &self,
        authorize_url: Url,
        state: &str,
    ) -> Result<(String, String), PelotonError> {
        let mut current = authorize_url;
        for _ in 0..=MAX_REDIRECTS {
            let resp = self
                .http
                .client()
                .get(current.clone())
                .timeout(AUTH_TIMEOUT)
                .send()
                .await?;
            if resp.status().is_redirection() {
                current = location(&resp).ok_or_else(|| {
                    PelotonError::Auth("redirect without location while starting auth flow".into())
                })?;
                continue;
            }
            if !resp.status().is_success() {
                return Err(auth_failure("authorize", resp).await);
            }

            let state = query_param(resp.url(), "state").unwrap_or_else(|| state.to_string());
            let csrf = self.csrf_token()?;
            return Ok((csrf, state));
        }
        Err(PelotonError::Auth(
            "too many redirects while starting auth flow".into(),
        ))
    }

    fn csrf_token(&self) -> Result<String, PelotonError> {
        let login_url = self.auth_url(&["usernamepassword", "login"])?;
        self.jar
            .cookies(&login_url)
            .and_then(|header| header.to_str().ok().map(str::to_owned))
            .and_then(|cookies| cookie_value(&cookies, "_csrf"))
            .ok_or_else(|| PelotonError::Auth("failed to get CSRF token from auth flow".into()))
    }

    /// Post the credentials; returns the URL to continue the flow from.
    async fn submit_credentials(
        &self,
        csrf: &str,
        state: &str,
        pkce: &PkceParams,
    ) -> Result<Url, PelotonError> {
        let login_url = self.auth_url(&["usernamepassword", "login"])?;
        let payload = serde_json::json!({
            "client_id": CLIENT_ID,
            "redirect_uri": REDIRECT_URI,
            "tenant": "peloton-prod",
            "response_type": "code",
            "scope": SCOPE,
            "audience": AUDIENCE,
            "_csrf": csrf,
            "state": state,
            "_intstate": "deprecated",
            "nonce": pkce.nonce,
            "username": self.credentials.username,
            "password": self.credentials.password.expose_secret(),
            "connection": "pelo-user-password",
            "code_challenge": pkce.challenge,
            "code_challenge_method": "S256",
        });
        let origin = self.auth_url(&[])?;
        let resp = self
            .http
            .client()
            .post(login_url)
            .timeout(AUTH_TIMEOUT)
            .header("Accept", "*/*")
            .header("Origin", origin.origin().ascii_serialization())
            .header("Auth0-Client", AUTH0_CLIENT_ULP)
            .json(&payload)
            .send()
            .await?;

        if resp.status().is_redirection() {
            return location(&resp)
                .ok_or_else(|| PelotonError::Auth("login redirect without location".into()));
        }
        if resp.status().as_u16() != 200 {
            return Err(auth_failure("login", resp).await);
        }

        let html = resp.text().await?;
        let form = parse_hidden_form(&html).ok_or_else(|| {
            PelotonError::Auth(format!(
                "no form action found in login response: {}",
                http_client::snippet(&html)
            ))
        })?;
        self.submit_hidden_form(form).await
    }

    async fn submit_hidden_form(&self, form: HiddenForm) -> Result<Url, PelotonError> {
        let action = self
            .auth_url(&[])?
            .join(&form.action)
            .map_err(|e| PelotonError::Auth(format!("invalid form action {}: {e}", form.action)))?;
        let resp = self
            .http
            .client()
            .post(action)
            .timeout(AUTH_TIMEOUT)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .form(&form.fields)
            .send()
            .await?;
        Ok(location(&resp).unwrap_or_else(|| resp.url().clone()))
    }

    async fn follow_auth_redirects(&self, start: Url) -> Result<String, PelotonError> {
        let mut current = start;
        for _ in 0..MAX_REDIRECTS {
            if let Some(code) = query_param(&current, "code") {
                return Ok(code);
            }
            let resp = self
                .http
                .client()
                .get(current.clone())
                .timeout(AUTH_TIMEOUT)
                .send()
                .await?;
            if let Some(code) = query_param(resp.url(), "code") {
                return Ok(code);
            }
            match location(&resp) {
                Some(next) => current = next,
                None => break,
            }
        }
        if let Some(code) = query_param(&current, "code") {
            return Ok(code);
        }
        Err(PelotonError::Auth(
            "failed to get authorization code from OAuth flow".into(),
        ))
    }

    async fn exchange_code_for_token(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<SecretString, PelotonError> {
        let token_url = self.auth_url(&["oauth", "token"])?;
        let payload = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": CLIENT_ID,
            "code_verifier": verifier,
            "code": code,
            "redirect_uri": REDIRECT_URI,
        });
        let resp = self
            .http
            .client()
            .post(token_url)
            .timeout(AUTH_TIMEOUT)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(auth_failure("token exchange", resp).await);
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PelotonError::Auth(format!("decoding token response: {e}")))?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::new(t.into()))
            .ok_or_else(|| PelotonError::Auth("no access token in token response".into()))
    }
}

#[async_trait]
impl PelotonClient for OAuthPelotonClient {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_profile(&self) -> Result<ProfileRecord, PelotonError> {
        let token = self.token().await?;
        let url = self.http.url(&["api", "me"])?;
        self.http.execute_object(self.authed_get(token, url)).await
    }

    async fn fetch_workouts(
        &self,
        limit: u32,
        page: u32,
    ) -> Result<Vec<WorkoutSummary>, PelotonError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let token = self.token().await?;
        let user_id = self.user_id().await?;
        let url = self.http.url(&["api", "user", user_id, "workouts"])?;
        let request = self
            .authed_get(token, url)
            .query(&http_client::workouts_query(limit, page));
        let payload = self.http.execute_object(request).await?;
        http_client::workout_page(payload, limit)
    }

    async fn fetch_workout(&self, workout_id: &str) -> Result<WorkoutRecord, PelotonError> {
        let workout_id = http_client::validate_workout_id(workout_id)?;
        let token = self.token().await?;
        let url = self.http.url(&["api", "workout", workout_id])?;
        let request = self
            .authed_get(token, url)
            .query(&[("joins", WORKOUT_JOINS)]);
        self.http.execute_object(request).await
    }
}

async fn auth_failure(step: &str, resp: reqwest::Response) -> PelotonError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    PelotonError::Auth(format!(
        "{step} failed with status {status}: {}",
        http_client::snippet(&body)
    ))
}

/// Absolute target of a response's `Location` header, if any.
fn location(resp: &reqwest::Response) -> Option<Url> {
    let value = resp.headers().get(LOCATION)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    resp.url().join(value).ok()
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Value of `name` in a `Cookie` header string (`a=1; b=2`).
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}

/// The callback form Auth0 returns instead of a redirect.
#[derive(Debug, PartialEq, Eq)]
struct HiddenForm {
    action: String,
    fields: Vec<(String, String)>,
}

static FORM_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b[^>]*>").expect("valid form regex"));
static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("valid input regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid attribute regex")
});
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid entity regex")
});

fn parse_hidden_form(html: &str) -> Option<HiddenForm> {
    let action = FORM_TAG
        .find_iter(html)
        .find_map(|tag| attribute(tag.as_str(), "action"))?;

    let fields = INPUT_TAG
        .find_iter(html)
        .filter(|tag| {
            attribute(tag.as_str(), "type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
        })
        .filter_map(|tag| {
            let name = attribute(tag.as_str(), "name").filter(|n| !n.is_empty())?;
            let value = attribute(tag.as_str(), "value").unwrap_or_default();
            Some((name, value))
        })
        .collect();

    Some(HiddenForm { action, fields })
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    ATTRIBUTE.captures_iter(tag).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let raw = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        Some(decode_entities(raw))
    })
}

fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
