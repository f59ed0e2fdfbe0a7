//! Client for the remote notes API: login, then users → projects → notes.
//!
//! | Call | Request |
//! |------|---------|
//! | [`RemoteClient::login`] | `POST /v1/auth/login/` `{email, password}` → `{access_token, user}` |
//! | [`RemoteClient::try_projects`] | `GET /v1/projects/` → `{items: [{id, title}]}` |
//! | [`RemoteClient::try_notes`] | `GET /v1/projects/{id}/notes/` → `{items: [{id, title, body}]}` |
//!
//! Every request is bounded by `remote.timeout_ms`. Note lists are fetched
//! concurrently and come back in project order.
//!
//! The `try_*` methods return a [`RemoteError`] that keeps timeouts, HTTP
//! statuses and decode failures apart ([`RemoteError::is_transient`]).
//! [`RemoteClient::projects`] is the lenient surface: a failed project list
//! yields an empty list, and a failed notes call leaves that one project
//! without notes.

use futures::future::join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RemoteConfig;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("remote returned {0}")]
    Status(StatusCode),
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("not logged in")]
    NotAuthenticated,
}

impl RemoteError {
    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout | RemoteError::Transport(_) => true,
            RemoteError::Status(s) => *s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error(),
            RemoteError::Decode(_) | RemoteError::NotAuthenticated => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Status(status)
        } else {
            RemoteError::Transport(e)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    user: LoginUser,
}

#[derive(Debug, Default, Deserialize)]
struct LoginUser {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectSummary {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub email: String,
    pub projects: Vec<Project>,
}

/// Ids arrive as strings or numbers depending on the endpoint.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Use an existing access token instead of logging in.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Log in and keep the access token. Returns the account email.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<String, RemoteError> {
        let response = self
            .http
            .post(format!("{}/v1/auth/login/", self.base_url))
            .json(credentials)
            .send()
            .await?
            .error_for_status()?;
        let login: LoginResponse = response.json().await?;

        if login.access_token.is_empty() {
            return Err(RemoteError::Decode("login response has no access_token".to_string()));
        }
        self.token = Some(login.access_token);
        debug!(email = %login.user.email, "logged in");
        Ok(login.user.email)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let token = self.token.as_deref().ok_or(RemoteError::NotAuthenticated)?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn try_notes(&self, project_id: &str) -> Result<Vec<Note>, RemoteError> {
        let page: Page<Note> = self
            .get_json(&format!("/v1/projects/{}/notes/", project_id))
            .await?;
        Ok(page.items)
    }

    /// Every project with its notes, in the order the API lists them.
    pub async fn try_projects(&self) -> Result<Vec<Project>, RemoteError> {
        let page: Page<ProjectSummary> = self.get_json("/v1/projects/").await?;

        let fetches = page.items.into_iter().map(|summary| async move {
            let notes = self.try_notes(&summary.id).await?;
            Ok::<_, RemoteError>(Project {
                id: summary.id,
                title: summary.title,
                notes,
            })
        });

        join_all(fetches).await.into_iter().collect()
    }

    /// Fetch notes for each project concurrently. A project whose notes call
    /// fails is kept with no notes.
    async fn attach_notes(&self, summaries: Vec<ProjectSummary>) -> Vec<Project> {
        let fetches = summaries.into_iter().map(|summary| async move {
            let notes = match self.try_notes(&summary.id).await {
                Ok(notes) => notes,
                Err(e) => {
                    warn!(
                        project = %summary.id,
                        error = %e,
                        transient = e.is_transient(),
                        "fetching notes failed"
                    );
                    Vec::new()
                }
            };
            Project {
                id: summary.id,
                title: summary.title,
                notes,
            }
        });
        join_all(fetches).await
    }

    /// Like [`try_projects`](Self::try_projects), but never fails: a failed
    /// project list yields an empty list and a failed notes call leaves that
    /// project without notes.
    pub async fn projects(&self) -> Vec<Project> {
        match self.get_json::<Page<ProjectSummary>>("/v1/projects/").await {
            Ok(page) => self.attach_notes(page.items).await,
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "fetching projects failed");
                Vec::new()
            }
        }
    }

    /// Log in and load the account's projects and notes. Only login and the
    /// project list are fatal.
    pub async fn user(&mut self, credentials: &Credentials) -> Result<User, RemoteError> {
        let email = self.login(credentials).await?;
        let page: Page<ProjectSummary> = self.get_json("/v1/projects/").await?;
        let projects = self.attach_notes(page.items).await;
        Ok(User { email, projects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_defaults_missing_fields() {
        let parsed: LoginResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.access_token.is_empty());
        assert!(parsed.user.email.is_empty());
    }

    #[test]
    fn page_defaults_items_and_accepts_numeric_ids() {
        let empty: Page<Note> = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());

        let notes: Page<Note> =
            serde_json::from_str(r#"{"items": [{"id": 7, "title": "a"}, {"id": "x"}]}"#).unwrap();
        assert_eq!(notes.items[0].id, "7");
        assert_eq!(notes.items[0].body, None);
        assert_eq!(notes.items[1].title, "");
    }

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::Status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(RemoteError::Status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!RemoteError::Status(StatusCode::UNAUTHORIZED).is_transient());
        assert!(!RemoteError::NotAuthenticated.is_transient());
    }

    #[tokio::test]
    async fn requests_need_a_token() {
        let client = RemoteClient::new(&RemoteConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            client.try_projects().await,
            Err(RemoteError::NotAuthenticated)
        ));
        assert!(client.projects().await.is_empty());
    }
}
