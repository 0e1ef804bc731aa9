//! Data-URL codec for images.
//!
//! Every image moving through the pipeline (upload, vendor payloads, results)
//! is carried as `data:<mime>;base64,<payload>` so the same value can be shown,
//! saved, and sent without re-encoding.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    Webp,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Jpeg, MediaType::Png, MediaType::Webp];

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn from_mime(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let essence = lowered.split(';').next().unwrap_or_default().trim();
        match essence {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_extension(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|value| value.to_str())
            .and_then(Self::from_extension)
    }
}

pub fn encode(bytes: &[u8], media_type: MediaType) -> String {
    format!("data:{};base64,{}", media_type.mime(), BASE64.encode(bytes))
}

pub fn decode(data_url: &str) -> Result<(Vec<u8>, MediaType), PipelineError> {
    let (media_type, payload) = split(data_url)?;
    let bytes = BASE64.decode(payload.as_bytes()).map_err(|err| {
        PipelineError::malformed_encoding(format!("Invalid data URL payload: {err}"))
    })?;
    Ok((bytes, media_type))
}

/// The base64 slice after the comma, validated but not decoded.
pub fn payload(data_url: &str) -> Result<&str, PipelineError> {
    split(data_url).map(|(_, payload)| payload)
}

fn split(data_url: &str) -> Result<(MediaType, &str), PipelineError> {
    let Some((header, payload)) = data_url.trim().split_once(',') else {
        return Err(PipelineError::malformed_encoding(
            "Invalid data URL format: missing ',' separator.",
        ));
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(PipelineError::malformed_encoding(
            "Invalid data URL format: empty payload.",
        ));
    }
    let Some(meta) = header.strip_prefix("data:") else {
        return Err(PipelineError::malformed_encoding(
            "Invalid data URL format: header must start with 'data:'.",
        ));
    };
    let Some(mime) = meta.strip_suffix(";base64") else {
        return Err(PipelineError::malformed_encoding(
            "Invalid data URL format: only base64 payloads are supported.",
        ));
    };
    let media_type = MediaType::from_mime(mime).ok_or_else(|| {
        PipelineError::malformed_encoding(format!("Unsupported image media type '{mime}'."))
    })?;
    Ok((media_type, payload))
}

/// An image plus its media type, carried in data-URL form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    media_type: MediaType,
    data_url: String,
}

impl SourceImage {
    pub fn from_bytes(bytes: &[u8], media_type: MediaType) -> Self {
        Self {
            media_type,
            data_url: encode(bytes, media_type),
        }
    }

    pub fn from_data_url(data_url: impl Into<String>) -> Result<Self, PipelineError> {
        let data_url = data_url.into();
        let (media_type, payload) = split(&data_url)?;
        if BASE64.decode(payload.as_bytes()).is_err() {
            return Err(PipelineError::malformed_encoding(
                "Invalid data URL payload: not valid base64.",
            ));
        }
        Ok(Self {
            media_type,
            data_url: data_url.trim().to_string(),
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    pub fn payload(&self) -> &str {
        self.data_url
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        decode(&self.data_url).map(|(bytes, _)| bytes)
    }

    /// Approximate decoded size, without decoding.
    pub fn byte_len(&self) -> usize {
        let payload = self.payload();
        let padding = payload.chars().rev().take_while(|ch| *ch == '=').count();
        ((payload.len() / 4) * 3).saturating_sub(padding.min(2))
    }

    /// Gemini-style `inlineData` content part.
    pub fn inline_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.media_type.mime(),
                "data": self.payload(),
            }
        })
    }
}
