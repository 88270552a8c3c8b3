use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-assigned identifier of an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank ids are never tracked, polled or persisted.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ImageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Processing state reported by the server.
///
/// The wire values are case-sensitive. Anything else read back from the
/// server or from storage is kept verbatim in `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageStatus {
    Pending,
    Done,
    Failed,
    Unrecognized(String),
}

impl ImageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Unrecognized(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ImageStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Pending" => Self::Pending,
            "Done" => Self::Done,
            "Failed" => Self::Failed,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<ImageStatus> for String {
    fn from(value: ImageStatus) -> Self {
        match value {
            ImageStatus::Unrecognized(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

/// Processing operations the server knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingAction {
    Resize,
    #[serde(rename = "Miniature_generate")]
    MiniatureGenerate,
    Watermark,
    Grayscale,
}

impl ProcessingAction {
    pub const ALL: [ProcessingAction; 4] = [
        ProcessingAction::Resize,
        ProcessingAction::MiniatureGenerate,
        ProcessingAction::Watermark,
        ProcessingAction::Grayscale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resize => "Resize",
            Self::MiniatureGenerate => "Miniature_generate",
            Self::Watermark => "Watermark",
            Self::Grayscale => "Grayscale",
        }
    }
}

impl fmt::Display for ProcessingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown processing action '{0}' (expected one of: Resize, Miniature_generate, Watermark, Grayscale)")]
pub struct UnknownActionError(pub String);

impl FromStr for ProcessingAction {
    type Err = UnknownActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownActionError(value.to_string()))
    }
}

/// One tracked upload as the client remembers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: ImageId,
    pub status: ImageStatus,
    pub filename: String,
    pub actions: Vec<String>,
    pub uploaded_at: String,
}

impl ImageRecord {
    pub fn pending(
        id: ImageId,
        filename: impl Into<String>,
        actions: &[ProcessingAction],
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: ImageStatus::Pending,
            filename: filename.into(),
            actions: actions.iter().map(|a| a.as_str().to_string()).collect(),
            uploaded_at: uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
