use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Precondition,
    Transport,
    NoImageProduced,
    MalformedEncoding,
    Configuration,
}

impl PipelineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Transport => "transport",
            Self::NoImageProduced => "no_image_produced",
            Self::MalformedEncoding => "malformed_encoding",
            Self::Configuration => "configuration",
        }
    }
}

/// Failure surfaced past the pipeline boundary.
///
/// Clients report failures as `anyhow::Error`; when one of these sits in the
/// chain its kind survives, anything else is treated as a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Precondition, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Transport, message)
    }

    pub fn no_image_produced(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::NoImageProduced, message)
    }

    pub fn malformed_encoding(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::MalformedEncoding, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Configuration, message)
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let typed = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<PipelineError>());
        match typed {
            Some(found) => Self::new(found.kind, error_chain_text(err, 600)),
            None => Self::transport(error_chain_text(err, 600)),
        }
    }

    /// Same error with `prefix: ` in front of the message.
    pub fn prefixed(self, prefix: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{prefix}: {}", self.message),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PipelineError {}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(": "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::{error_chain_text, truncate_text, PipelineError, PipelineErrorKind};

    #[test]
    fn from_anyhow_keeps_typed_kind_through_context() {
        let err = anyhow::Error::new(PipelineError::no_image_produced("No image was generated."))
            .context("Gemini image request");
        let typed = PipelineError::from_anyhow(&err);
        assert_eq!(typed.kind, PipelineErrorKind::NoImageProduced);
        assert_eq!(typed.message, "Gemini image request: No image was generated.");
    }

    #[test]
    fn from_anyhow_defaults_to_transport() {
        let err = anyhow::anyhow!("connection reset by peer");
        let typed = PipelineError::from_anyhow(&err);
        assert_eq!(typed.kind, PipelineErrorKind::Transport);
        assert_eq!(typed.to_string(), "connection reset by peer");
    }

    #[test]
    fn error_chain_text_skips_repeated_causes() {
        let err = anyhow::anyhow!("boom").context("boom").context("outer");
        assert_eq!(error_chain_text(&err, 100), "outer: boom");
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn prefixed_keeps_kind() {
        let err = PipelineError::transport("timeout").prefixed("Analysis failed");
        assert_eq!(err.kind, PipelineErrorKind::Transport);
        assert_eq!(err.message, "Analysis failed: timeout");
    }
}
