//! Reddit adapter
//!
//! Implements ReputationSource with an application-only OAuth token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{PlatformError, Reputation, ReputationSource};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_URL: &str = "https://oauth.reddit.com";

/// Default user agent when none is configured
pub const DEFAULT_USER_AGENT: &str = "TaskBot/1.0";

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl RedditConfig {
    /// Read credentials from the named environment variables
    pub fn from_env(client_id_env: &str, client_secret_env: &str, user_agent_env: &str) -> Self {
        Self {
            client_id: std::env::var(client_id_env).ok(),
            client_secret: std::env::var(client_secret_env).ok(),
            user_agent: std::env::var(user_agent_env).unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            ..Default::default()
        }
    }
}

pub struct RedditClient {
    client: Client,
    config: RedditConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AboutData {
    #[serde(default)]
    link_karma: i64,
    #[serde(default)]
    comment_karma: i64,
}

#[derive(Debug, Deserialize)]
struct About {
    data: AboutData,
}

impl RedditClient {
    pub fn new(config: RedditConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.client_id.is_some() && self.config.client_secret.is_some()
    }

    async fn access_token(&self, client_id: &str, client_secret: &str) -> Result<String, PlatformError> {
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status.as_u16(), body));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl ReputationSource for RedditClient {
    async fn lookup_reputation(&self, username: &str) -> Result<Reputation, PlatformError> {
        let (Some(client_id), Some(client_secret)) = (&self.config.client_id, &self.config.client_secret) else {
            log::warn!("Reddit API credentials are not configured.");
            return Err(PlatformError::NotConfigured("Reddit API not configured".to_string()));
        };
        log::info!("Fetching Reddit karma for username: {}", username);

        let token = self.access_token(client_id, client_secret).await?;
        let response = self
            .client
            .get(format!("{}/user/{}/about", API_URL, username))
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status.as_u16(), body));
        }
        let about: About = response.json().await?;
        log::info!(
            "Fetched karma for u/{}: Post {}, Comment {}",
            username,
            about.data.link_karma,
            about.data.comment_karma
        );
        Ok(Reputation::new(about.data.link_karma, about.data.comment_karma))
    }
}
