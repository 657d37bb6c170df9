//! Adapter for Peloton's legacy username/password session login.
//!
//! `POST /auth/login` returns a user id and a session id; the session id is
//! then sent as the `peloton_session_id` cookie on every API call.

use crate::config::Endpoints;
use crate::http_client::{self, API_TIMEOUT, ApiHttp, USER_AGENT, WORKOUT_JOINS};
use crate::{
    Credentials, PelotonClient, PelotonError, ProfileRecord, WorkoutRecord, WorkoutSummary,
};
use async_trait::async_trait;
use reqwest::header::COOKIE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

pub const NAME: &str = "session";

/// Registry factory.
pub fn factory(credentials: Credentials, endpoints: &Endpoints) -> Box<dyn PelotonClient> {
    Box::new(SessionPelotonClient::new(credentials, endpoints))
}

#[derive(Debug)]
struct LoginSession {
    user_id: String,
    session_id: SecretString,
}

#[derive(Deserialize)]
struct LoginResponse {
    user_id: String,
    session_id: String,
}

#[derive(Debug)]
pub struct SessionPelotonClient {
    http: ApiHttp,
    credentials: Credentials,
    session: OnceCell<LoginSession>,
}

impl SessionPelotonClient {
    pub fn new(credentials: Credentials, endpoints: &Endpoints) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client build should not fail");
        Self {
            http: ApiHttp::new(&endpoints.api_base_url, client),
            credentials,
            session: OnceCell::new(),
        }
    }

    async fn session(&self) -> Result<&LoginSession, PelotonError> {
        self.session.get_or_try_init(|| self.login()).await
    }

    async fn login(&self) -> Result<LoginSession, PelotonError> {
        let url = self.http.url(&["auth", "login"])?;
        let body = serde_json::json!({
            "username_or_email": self.credentials.username,
            "password": self.credentials.password.expose_secret(),
        });
        let resp = self
            .http
            .client()
            .post(url)
            .timeout(API_TIMEOUT)
            .header("peloton-platform", "web")
            .json(&body)
            .send()
            .await?;

        // Any rejected login is an auth failure, whatever the status.
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = http_client::api_message(&text);
            return Err(PelotonError::Auth(format!(
                "Peloton login failed with status {status}: {message}"
            )));
        }

        let text = resp.text().await?;
        let login: LoginResponse = serde_json::from_str(&text).map_err(|e| {
            PelotonError::Decode(format!(
                "decoding login response: {e} - body: {}",
                http_client::snippet(&text)
            ))
        })?;
        debug!(user_id = %login.user_id, "session login complete");
        Ok(LoginSession {
            user_id: login.user_id,
            session_id: SecretString::new(login.session_id.into()),
        })
    }

    fn authed_get(
        &self,
        session: &LoginSession,
        url: reqwest::Url,
    ) -> reqwest::RequestBuilder {
        self.http.get(url).header(
            COOKIE,
            format!("peloton_session_id={}", session.session_id.expose_secret()),
        )
    }
}

#[async_trait]
impl PelotonClient for SessionPelotonClient {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_profile(&self) -> Result<ProfileRecord, PelotonError> {
        let session = self.session().await?;
        let url = self.http.url(&["api", "me"])?;
        self.http
            .execute_object(self.authed_get(session, url))
            .await
    }

    async fn fetch_workouts(
        &self,
        limit: u32,
        page: u32,
    ) -> Result<Vec<WorkoutSummary>, PelotonError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let session = self.session().await?;
        let url = self
            .http
            .url(&["api", "user", session.user_id.as_str(), "workouts"])?;
        let request = self
            .authed_get(session, url)
            .query(&http_client::workouts_query(limit, page));
        let payload = self.http.execute_object(request).await?;
        http_client::workout_page(payload, limit)
    }

    async fn fetch_workout(&self, workout_id: &str) -> Result<WorkoutRecord, PelotonError> {
        let workout_id = http_client::validate_workout_id(workout_id)?;
        let session = self.session().await?;
        let url = self.http.url(&["api", "workout", workout_id])?;
        let request = self
            .authed_get(session, url)
            .query(&[("joins", WORKOUT_JOINS)]);
        self.http.execute_object(request).await
    }
}
