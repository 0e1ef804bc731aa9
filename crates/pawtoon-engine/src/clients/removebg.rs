use anyhow::{bail, Context, Result};
use pawtoon_contracts::error::truncate_text;
use pawtoon_contracts::{MediaType, PipelineError, SourceImage};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;

use super::BackgroundRemovalClient;
use crate::config::EngineConfig;
use crate::http::http_client;

pub struct RemoveBgClient {
    api_base: String,
    api_key: String,
    size: String,
    http: HttpClient,
}

impl RemoveBgClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        size: impl Into<String>,
        http: HttpClient,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            size: size.into(),
            http,
        }
    }

    /// Fails with a `Configuration` error when no API key is set.
    pub fn from_config(config: &EngineConfig) -> Result<Self, PipelineError> {
        let Some(api_key) = config.removebg_api_key.clone() else {
            return Err(PipelineError::configuration(
                "removebg API key is not configured (set REMOVEBG_API_KEY)",
            ));
        };
        let http = http_client(config.request_timeout)
            .map_err(|err| PipelineError::configuration(format!("{err:#}")))?;
        Ok(Self::new(
            config.removebg_api_base.clone(),
            api_key,
            config.removebg_size.clone(),
            http,
        ))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/removebg", self.api_base)
    }
}

impl BackgroundRemovalClient for RemoveBgClient {
    fn name(&self) -> &str {
        "removebg"
    }

    fn remove_background(&self, image: &SourceImage) -> Result<SourceImage> {
        let media_type = image.media_type();
        let part = Part::bytes(image.to_bytes()?)
            .file_name(format!("image.{}", media_type.extension()))
            .mime_str(media_type.mime())
            .context("removebg upload part build failed")?;
        let form = Form::new()
            .part("image_file", part)
            .text("size", self.size.clone());

        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .with_context(|| format!("removebg request failed ({endpoint})"))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .context("removebg response body read failed")?;
        if !status.is_success() {
            bail!(
                "removebg API error: {} - {}",
                status.as_u16(),
                truncate_text(&String::from_utf8_lossy(&body), 512)
            );
        }
        if body.is_empty() {
            bail!("removebg returned an empty image");
        }

        let media_type = content_type
            .as_deref()
            .and_then(MediaType::from_mime)
            .unwrap_or(MediaType::Png);
        Ok(SourceImage::from_bytes(&body, media_type))
    }
}
