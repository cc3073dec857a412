//! Card recognition through the Anthropic Messages API.

use std::time::Duration;

use base64::Engine as _;
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::backends::{CardImage, RecognitionService};
use crate::error::{FailureKind, ServiceError};
use crate::protocol::RawRead;
use crate::resolution::retrying_caller::RetryingCaller;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 1500;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const SOURCE_NAME: &str = "Recognition";

const RECOGNITION_PROMPT: &str = r#"Identify every Magic: The Gathering card in this image.

For each card read the name exactly as printed, and any of these details that are visible:
- set code (3-5 characters, usually bottom left)
- collector number (bottom left)
- whether it is foil (shiny or holographic)
- condition (Near Mint unless wear or damage is visible)

Return ONLY a JSON array, one object per card:
[{"name": "Card Name", "set_code": "xxx" or null, "collector_number": "123" or null,
  "foil": false, "condition": "Near Mint", "confidence": 0.0 to 1.0}]

Return [] if no card is visible."#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeVisionSettings {
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub max_tokens: u32,
}

pub struct ClaudeVision {
    http_client: ureq::Agent,
    retry: RetryingCaller,
    settings: ClaudeVisionSettings,
}

impl ClaudeVision {
    pub fn new(settings: ClaudeVisionSettings, retry: RetryingCaller) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(120))
            .timeout_write(Duration::from_secs(60))
            .build();
        Self {
            http_client,
            retry,
            settings,
        }
    }

    fn request_body(&self, image: &CardImage) -> Value {
        let data = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": data,
                        }
                    },
                    {"type": "text", "text": RECOGNITION_PROMPT}
                ]
            }]
        })
    }

    fn send(&self, body: &Value) -> Result<Value, ServiceError> {
        let response = self
            .http_client
            .post(&self.settings.api_url)
            .set("x-api-key", &self.settings.api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .set("content-type", "application/json")
            .send_json(body.clone())
            .map_err(|error| {
                ServiceError::new(
                    SOURCE_NAME,
                    FailureKind::from_ureq(&error),
                    format!("Messages request failed: {error}"),
                )
            })?;
        response.into_json::<Value>().map_err(|error| {
            ServiceError::new(
                SOURCE_NAME,
                FailureKind::from_io(&error),
                format!("Failed to read Messages response: {error}"),
            )
        })
    }
}

/// Concatenated text blocks of a Messages API response.
fn response_text(response: &Value) -> String {
    response
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Drops a surrounding markdown code fence, including its language tag line.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(newline) => &trimmed[newline + 1..],
        None => return "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parses the model's JSON array. Entries without a usable name are skipped;
/// a bare string is accepted as a name-only read.
fn parse_reads(text: &str) -> Result<Vec<RawRead>, ServiceError> {
    let payload = strip_code_fence(text);
    let value: Value = serde_json::from_str(payload).map_err(|error| {
        ServiceError::new(
            SOURCE_NAME,
            FailureKind::Hard,
            format!("Response is not a JSON array: {error}"),
        )
    })?;
    let Value::Array(items) = value else {
        return Err(ServiceError::new(
            SOURCE_NAME,
            FailureKind::Hard,
            "Response is not a JSON array",
        ));
    };

    let mut reads = Vec::with_capacity(items.len());
    for item in items {
        let read = match item {
            Value::String(name) => RawRead::named(name),
            Value::Object(mut fields) => {
                fields.retain(|_, field| !field.is_null());
                match serde_json::from_value::<RawRead>(Value::Object(fields)) {
                    Ok(read) => read,
                    Err(error) => {
                        warn!("Recognition: skipping unreadable card entry: {}", error);
                        continue;
                    }
                }
            }
            other => {
                warn!("Recognition: skipping unexpected entry {}", other);
                continue;
            }
        };
        if read.name.trim().is_empty() {
            warn!("Recognition: skipping card entry without a name");
            continue;
        }
        reads.push(read);
    }
    Ok(reads)
}

impl RecognitionService for ClaudeVision {
    fn recognize(&self, image: &CardImage) -> Result<Vec<RawRead>, ServiceError> {
        let label = image.path.display().to_string();
        let body = self.request_body(image);
        let response = self.retry.call(&label, |attempt| {
            debug!("Recognition[{}]: attempt {}", label, attempt);
            self.send(&body)
        })?;
        let reads = parse_reads(&response_text(&response))?;
        info!("Recognition[{}]: found {} card(s)", label, reads.len());
        Ok(reads)
    }
}
