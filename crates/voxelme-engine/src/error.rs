use std::fmt;

use thiserror::Error;

/// Step of the encode → prompt → call → decode pipeline that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Encode,
    Call,
    Decode,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Encode => "encode",
            Stage::Call => "call",
            Stage::Decode => "decode",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const GENERIC_FAILURE_MESSAGE: &str = "Generation failed: no image was returned.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{0}")]
    Config(String),

    #[error("Failed to read image {source_name}: {reason}")]
    Read { source_name: String, reason: String },

    #[error("{message}")]
    Provider { status: Option<u16>, message: String },

    #[error("Generation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("No candidates returned")]
    EmptyResponse,

    #[error("No image data found in response")]
    NoImageData,
}

impl GenerationError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Configure,
            Self::Read { .. } => Stage::Encode,
            Self::Provider { .. } | Self::Timeout { .. } => Stage::Call,
            Self::EmptyResponse | Self::NoImageData => Stage::Decode,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Read { .. } => "read",
            Self::Provider { .. } => "provider",
            Self::Timeout { .. } => "timeout",
            Self::EmptyResponse => "empty_response",
            Self::NoImageData => "no_image_data",
        }
    }

    /// Text shown to the user. Provider failures pass through verbatim; the
    /// two "no usable image" kinds collapse into one generic message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { seconds } => {
                format!("Generation timed out after {seconds}s; please try again.")
            }
            Self::EmptyResponse | Self::NoImageData => GENERIC_FAILURE_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn read(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Read {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }
}

/// Reasons `generate()` refuses or fails before any provider work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenerateRejected {
    #[error("no image selected")]
    NoImageSelected,

    #[error("a generation is already in flight")]
    AlreadyProcessing,

    #[error(transparent)]
    Failed(#[from] GenerationError),
}

#[cfg(test)]
mod tests {
    use super::{GenerationError, Stage};

    #[test]
    fn decode_failures_share_a_user_message_but_not_a_kind() {
        let empty = GenerationError::EmptyResponse;
        let no_data = GenerationError::NoImageData;
        assert_eq!(empty.user_message(), no_data.user_message());
        assert_ne!(empty.kind(), no_data.kind());
        assert_ne!(empty.to_string(), no_data.to_string());
        assert_eq!(empty.stage(), Stage::Decode);
    }

    #[test]
    fn provider_text_is_surfaced_verbatim() {
        let err = GenerationError::provider(Some(429), "Resource has been exhausted");
        assert_eq!(err.user_message(), "Resource has been exhausted");
        assert_eq!(err.stage(), Stage::Call);
    }

    #[test]
    fn timeout_is_distinct_from_provider_failure() {
        let err = GenerationError::Timeout { seconds: 5 };
        assert_eq!(err.kind(), "timeout");
        assert_eq!(
            err.user_message(),
            "Generation timed out after 5s; please try again."
        );
    }

    #[test]
    fn read_errors_name_the_source() {
        let err = GenerationError::read("/tmp/me.jpg", "file is empty");
        assert_eq!(err.to_string(), "Failed to read image /tmp/me.jpg: file is empty");
        assert_eq!(err.stage(), Stage::Encode);
    }
}
