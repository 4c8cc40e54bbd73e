//! Email sending via the Resend HTTP API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::sender::{SendError, SendRequest, Sender};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

pub struct ResendSender {
    api_key: String,
    from_email: String,
    client: reqwest::Client,
}

impl ResendSender {
    pub fn new(api_key: String, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize, Default)]
struct ResendErrorResponse {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl Sender for ResendSender {
    async fn send(&self, req: SendRequest) -> Result<(), SendError> {
        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &self.from_email,
                to: &req.to,
                subject: &req.subject,
                html: &req.html_body,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ResendErrorResponse>(&body)
            .ok()
            .filter(|e| !e.message.is_empty())
            .map(|e| e.message)
            .unwrap_or(body);

        Err(SendError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
