use anyhow::{bail, Context, Result};
use pawtoon_contracts::{MediaType, PipelineError, SourceImage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{AnalysisClient, GenerationClient};
use crate::config::EngineConfig;
use crate::http::{http_client, response_json_or_error};

const NO_IMAGE_MESSAGE: &str = "No image was generated. The model may have refused the prompt.";

/// Shared `generateContent` transport for the vision and image clients.
#[derive(Clone)]
pub struct GeminiTransport {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiTransport {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, http: HttpClient) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let Some(api_key) = config.gemini_api_key.clone() else {
            return Err(PipelineError::configuration(
                "GEMINI_API_KEY (or GOOGLE_API_KEY / API_KEY) not set",
            )
            .into());
        };
        Ok(Self::new(
            config.gemini_api_base.clone(),
            api_key,
            http_client(config.request_timeout)?,
        ))
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

pub struct GeminiVisionClient {
    transport: GeminiTransport,
    model: String,
}

impl GeminiVisionClient {
    pub fn new(transport: GeminiTransport, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }
}

impl AnalysisClient for GeminiVisionClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn analyze(&self, image: &SourceImage, instruction: &str) -> Result<String> {
        let payload = request_payload(image, instruction, None);
        let reply = self.transport.generate_content(&self.model, &payload)?;
        let text = extract_text(&reply);
        if text.trim().is_empty() {
            bail!(
                "Gemini returned no analysis text{}",
                refusal_reason(&reply)
                    .map(|reason| format!(" ({reason})"))
                    .unwrap_or_default()
            );
        }
        Ok(text)
    }
}

pub struct GeminiImageClient {
    transport: GeminiTransport,
    model: String,
}

impl GeminiImageClient {
    pub fn new(transport: GeminiTransport, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }
}

impl GenerationClient for GeminiImageClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn generate(&self, image: &SourceImage, prompt: &str) -> Result<SourceImage> {
        let payload = request_payload(image, prompt, Some(&["IMAGE"]));
        let reply = self.transport.generate_content(&self.model, &payload)?;
        match extract_first_image(&reply)? {
            Some(generated) => Ok(generated),
            None => {
                let message = match refusal_reason(&reply) {
                    Some(reason) => format!("{NO_IMAGE_MESSAGE} ({reason})"),
                    None => NO_IMAGE_MESSAGE.to_string(),
                };
                Err(PipelineError::no_image_produced(message).into())
            }
        }
    }
}

fn request_payload(image: &SourceImage, text: &str, modalities: Option<&[&str]>) -> Value {
    let mut payload = json!({
        "contents": [{
            "role": "user",
            "parts": [image.inline_part(), {"text": text}],
        }],
    });
    if let Some(modalities) = modalities {
        payload["generationConfig"] = json!({ "responseModalities": modalities });
    }
    payload
}

fn candidate_parts(reply: &Value) -> impl Iterator<Item = &Value> {
    reply
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
}

/// All text parts of all candidates, joined in order.
pub(crate) fn extract_text(reply: &Value) -> String {
    candidate_parts(reply)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

/// The first inline image part in any candidate.
pub(crate) fn extract_first_image(reply: &Value) -> Result<Option<SourceImage>> {
    for part in candidate_parts(reply) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if data.is_empty() {
            continue;
        }
        let mime = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        let media_type = MediaType::from_mime(mime).ok_or_else(|| {
            PipelineError::malformed_encoding(format!(
                "Gemini returned unsupported image type '{mime}'."
            ))
        })?;
        let image = SourceImage::from_data_url(format!("data:{};base64,{data}", media_type.mime()))
            .context("Gemini image payload could not be decoded")?;
        return Ok(Some(image));
    }
    Ok(None)
}

/// Why the reply carries no usable content, when Gemini says so.
pub(crate) fn refusal_reason(reply: &Value) -> Option<String> {
    if let Some(reason) = reply
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Some(format!("prompt blocked: {reason}"));
    }
    reply
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("finishReason").and_then(Value::as_str))
        .find(|reason| *reason != "STOP")
        .map(|reason| format!("finish reason: {reason}"))
}

#[cfg(test)]
mod tests {
    use pawtoon_contracts::{MediaType, PipelineErrorKind, SourceImage};
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::{
        extract_first_image, extract_text, refusal_reason, request_payload, GeminiTransport,
    };

    #[test]
    fn endpoint_accepts_bare_and_prefixed_models() {
        let transport = GeminiTransport::new("http://localhost:1/v1beta", "k", HttpClient::new());
        assert_eq!(
            transport.endpoint_for_model("gemini-2.5-flash-image"),
            "http://localhost:1/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            transport.endpoint_for_model(" models/gemini-2.5-flash "),
            "http://localhost:1/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn image_payload_carries_inline_data_and_modalities() {
        let image = SourceImage::from_bytes(b"abc", MediaType::Jpeg);
        let payload = request_payload(&image, "make it cute", Some(&["IMAGE"]));
        assert_eq!(
            payload["contents"][0]["parts"][0],
            json!({"inlineData": {"mimeType": "image/jpeg", "data": "YWJj"}})
        );
        assert_eq!(payload["contents"][0]["parts"][1]["text"], "make it cute");
        assert_eq!(payload["generationConfig"]["responseModalities"], json!(["IMAGE"]));

        let vision = request_payload(&image, "describe", None);
        assert!(vision.get("generationConfig").is_none());
    }

    #[test]
    fn text_parts_are_concatenated() {
        let reply = json!({
            "candidates": [{
                "content": {"parts": [{"text": "1. Dog\n"}, {"text": "2. Corgi"}]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(extract_text(&reply), "1. Dog\n2. Corgi");
        assert_eq!(refusal_reason(&reply), None);
    }

    #[test]
    fn first_inline_image_wins() -> anyhow::Result<()> {
        let reply = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "YWJj"}},
                    {"inlineData": {"mimeType": "image/webp", "data": "ZGVm"}}
                ]}
            }]
        });
        let image = extract_first_image(&reply)?.expect("image part present");
        assert_eq!(image.media_type(), MediaType::Png);
        assert_eq!(image.to_bytes()?, b"abc".to_vec());
        Ok(())
    }

    #[test]
    fn missing_image_reports_finish_reason() -> anyhow::Result<()> {
        let reply = json!({
            "candidates": [{"content": {"parts": [{"text": "I can't do that"}]}, "finishReason": "IMAGE_SAFETY"}]
        });
        assert!(extract_first_image(&reply)?.is_none());
        assert_eq!(refusal_reason(&reply).as_deref(), Some("finish reason: IMAGE_SAFETY"));

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(refusal_reason(&blocked).as_deref(), Some("prompt blocked: SAFETY"));
        Ok(())
    }

    #[test]
    fn unsupported_inline_mime_is_malformed() {
        let reply = json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/gif", "data": "YWJj"}}]}}]
        });
        let err = extract_first_image(&reply).unwrap_err();
        let typed = pawtoon_contracts::PipelineError::from_anyhow(&err);
        assert_eq!(typed.kind, PipelineErrorKind::MalformedEncoding);
    }
}
