//! The pluggable notification sender boundary.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sender API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// The data needed to send one notification email.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

/// Anything that can deliver a notification.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, req: SendRequest) -> Result<(), SendError>;
}
