use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::themes::Season;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// File name offered when the user downloads a result.
pub const DEFAULT_DOWNLOAD_NAME: &str = "pixel-persona-3d.png";

pub fn png_data_uri(payload: &str) -> String {
    format!("{PNG_DATA_URI_PREFIX}{payload}")
}

/// Handle to the user's photo. Size and type are not validated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceImage {
    File {
        path: PathBuf,
        media_type: Option<String>,
    },
    Memory {
        name: Option<String>,
        bytes: Vec<u8>,
        media_type: String,
    },
}

impl SourceImage {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            media_type: None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self::Memory {
            name: None,
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    pub fn with_media_type(self, media_type: impl Into<String>) -> Self {
        match self {
            Self::File { path, .. } => Self::File {
                path,
                media_type: Some(media_type.into()),
            },
            Self::Memory { name, bytes, .. } => Self::Memory {
                name,
                bytes,
                media_type: media_type.into(),
            },
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        match self {
            Self::Memory {
                bytes, media_type, ..
            } => Self::Memory {
                name: Some(name.into()),
                bytes,
                media_type,
            },
            file => file,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::File { path, .. } => path.display().to_string(),
            Self::Memory { name, .. } => name.clone().unwrap_or_else(|| "<memory>".to_string()),
        }
    }

    /// Media type supplied by the caller, if any. Blank values count as absent.
    pub fn declared_media_type(&self) -> Option<&str> {
        let raw = match self {
            Self::File { media_type, .. } => media_type.as_deref(),
            Self::Memory { media_type, .. } => Some(media_type.as_str()),
        };
        raw.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path.as_path()),
            Self::Memory { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub selected_image: Option<SourceImage>,
    pub selected_theme: Season,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Idle,
    Processing,
    Success {
        image_reference: String,
    },
    Error {
        message: String,
    },
}

impl LifecycleState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing)
    }

    pub fn image_reference(&self) -> Option<&str> {
        match self {
            Self::Success { image_reference } => Some(image_reference.as_str()),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message.as_str()),
            _ => None,
        }
    }
}

/// Outcome of one successful generation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    image_reference: String,
    produced_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn new(image_reference: impl Into<String>) -> Self {
        Self {
            image_reference: image_reference.into(),
            produced_at: Utc::now(),
        }
    }

    pub fn image_reference(&self) -> &str {
        &self.image_reference
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    /// Base64 payload behind the `data:` prefix.
    pub fn payload(&self) -> &str {
        self.image_reference
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn image_bytes(&self) -> anyhow::Result<Vec<u8>> {
        if !self.image_reference.starts_with("data:") {
            bail!("result is not a data URI");
        }
        BASE64
            .decode(self.payload().as_bytes())
            .context("result payload is not valid base64")
    }

    pub fn write_png(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let bytes = self.image_bytes()?;
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }
}
