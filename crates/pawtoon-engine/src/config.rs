//! Environment-driven settings for the vendor clients.

use std::time::Duration;

use crate::http::{non_empty_env, trim_api_base};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REMOVEBG_API_BASE: &str = "https://api.remove.bg/v1.0";
pub const DEFAULT_REMOVEBG_SIZE: &str = "auto";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub removebg_api_key: Option<String>,
    pub removebg_api_base: String,
    pub removebg_size: String,
    pub analysis_model: Option<String>,
    pub image_model: Option<String>,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            removebg_api_key: None,
            removebg_api_base: DEFAULT_REMOVEBG_API_BASE.to_string(),
            removebg_size: DEFAULT_REMOVEBG_SIZE.to_string(),
            analysis_model: None,
            image_model: None,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };
        let defaults = Self::default();
        Self {
            gemini_api_key: first(&["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"]),
            gemini_api_base: first(&["GEMINI_API_BASE"])
                .map(|value| trim_api_base(&value))
                .unwrap_or(defaults.gemini_api_base),
            removebg_api_key: first(&["REMOVEBG_API_KEY", "REMOVE_BG_API_KEY"]),
            removebg_api_base: first(&["REMOVEBG_API_BASE"])
                .map(|value| trim_api_base(&value))
                .unwrap_or(defaults.removebg_api_base),
            removebg_size: first(&["REMOVEBG_SIZE"]).unwrap_or(defaults.removebg_size),
            analysis_model: first(&["PAWTOON_ANALYSIS_MODEL"]),
            image_model: first(&["PAWTOON_IMAGE_MODEL"]),
            request_timeout: first(&["PAWTOON_REQUEST_TIMEOUT"])
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .map(|value| Duration::from_secs_f64(value.clamp(5.0, 300.0)))
                .unwrap_or(defaults.request_timeout),
        }
    }
}
