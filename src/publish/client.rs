//! Outbound note and tweet calls.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const TWITTER_API_BASE: &str = "https://api.twitter.com";
pub const POST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{platform} api error: {status} - {body}")]
    Status {
        platform: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct NoteRequest<'a> {
    i: &'a str,
    text: &'a str,
    visibility: &'a str,
}

#[derive(Serialize)]
struct TweetRequest<'a> {
    text: &'a str,
}

/// Posts text to a user's linked accounts.
#[derive(Clone, Debug)]
pub struct Publisher {
    http: reqwest::Client,
    twitter_base: String,
}

impl Publisher {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            twitter_base: TWITTER_API_BASE.to_string(),
        }
    }

    pub fn with_twitter_base(mut self, base: impl Into<String>) -> Self {
        self.twitter_base = base.into();
        self
    }

    /// Creates a public note on `instance_url`.
    pub async fn post_note(
        &self,
        instance_url: &str,
        access_token: &str,
        text: &str,
    ) -> Result<(), PublishError> {
        let instance_url = if instance_url.starts_with("http://") || instance_url.starts_with("https://") {
            instance_url.to_string()
        } else {
            format!("https://{instance_url}")
        };

        let response = self
            .http
            .post(format!("{instance_url}/api/notes/create"))
            .json(&NoteRequest {
                i: access_token,
                text,
                visibility: "public",
            })
            .timeout(POST_TIMEOUT)
            .send()
            .await?;

        check_status("misskey", response).await
    }

    pub async fn post_tweet(&self, access_token: &str, text: &str) -> Result<(), PublishError> {
        let response = self
            .http
            .post(format!("{}/2/tweets", self.twitter_base))
            .bearer_auth(access_token)
            .json(&TweetRequest { text })
            .timeout(POST_TIMEOUT)
            .send()
            .await?;

        check_status("twitter", response).await
    }
}

async fn check_status(platform: &'static str, response: reqwest::Response) -> Result<(), PublishError> {
    match response.status().as_u16() {
        200 | 201 => Ok(()),
        status => Err(PublishError::Status {
            platform,
            status,
            body: response.text().await.unwrap_or_default(),
        }),
    }
}
