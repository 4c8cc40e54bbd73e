//! One-shot LLM-assisted authoring of extraction rules from cleaned HTML.
//!
//! This runs only when a user builds or rebuilds a blueprint through the
//! API; the watch pipeline never calls it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{catalog::EntitySchema, ExtractionRules};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error("authoring request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authoring API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("authoring returned no choices")]
    EmptyResponse,
    #[error("authoring returned invalid rules: {0}")]
    InvalidRules(#[from] serde_json::Error),
}

pub struct AuthoringClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: ResponseFormat<'a>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

const SYSTEM_PROMPT: &str = r#"You are an XPath expert for web scraping. Given cleaned HTML and a target entity schema, generate precise XPath extraction rules.

XPATH SYNTAX (the extractor supports exactly this subset):
- //tag[@class='name'] finds elements by exact class
- //tag[contains(@class, 'partial')] matches a class substring
- //tag[@id='name'] finds by id
- .//child is relative to the current element (REQUIRED for field XPaths)
- ./following-sibling::tag[1] selects the next matching sibling
- [n] selects the n-th match (1-based)

RULES:
1. "container" is an ABSOLUTE XPath matching ALL entity items on the page (e.g. //div[@class='product-card'])
2. Each field XPath is RELATIVE to the container and must start with ./ or .//
3. Be specific; avoid bare //div or //span
4. For prices use "type": "integer" with "expression": "int(extractNumber(value) * 100)" to get cents
5. For ratings use "type": "number" with "expression": "extractNumber(value)"
6. For image URLs use "attribute": "src"; for links use "attribute": "href"
7. The default "attribute" is "text" (inner text)
8. An optional "expression" post-processes the raw string bound to `value`. Available: trim(s), replace(s, a, b), int(x), extractNumber(s), extractInteger(s), arithmetic, `contains`, and the ternary `cond ? a : b`.

OUTPUT FORMAT (JSON only):
{
  "container": "//absolute/xpath/to/each/entity",
  "fields": {
    "field_name": {
      "xpath": "./relative/xpath",
      "type": "string|integer|number",
      "attribute": "text|href|src|alt",
      "expression": "optional post-processing"
    }
  }
}"#;

impl AuthoringClient {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            model,
            client,
        }
    }

    /// Ask the model for container + field XPath rules targeting a schema.
    pub async fn generate_rules(
        &self,
        cleaned_html: &str,
        schema: &EntitySchema,
    ) -> Result<ExtractionRules, AuthoringError> {
        info!(schema_type = %schema.schema_type, model = %self.model, "generating extraction rules");

        let fields_desc: String = schema
            .fields
            .iter()
            .map(|f| format!("- {} ({}): {}\n", f.name, f.field_type, f.description))
            .collect();
        let user_prompt = format!(
            "Target schema: {}\nFields to extract:\n{}\nHTML:\n{}",
            schema.schema_type, fields_desc, cleaned_html
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthoringError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(AuthoringError::EmptyResponse)?;

        let rules: ExtractionRules = serde_json::from_str(strip_code_fence(content))?;
        Ok(rules)
    }
}

/// Models occasionally wrap JSON in a markdown fence despite the response
/// format; strip it before parsing.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
