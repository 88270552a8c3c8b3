use std::fmt;

use async_trait::async_trait;
use shared::domain::ImageRecord;

mod controller;
pub mod error;
pub mod poller;
pub mod render;
pub mod transport;
pub mod types;

pub use controller::{DeleteOutcome, UploadController};
pub use error::{ApiError, DeleteError, ServerUrlError, UploadError, ViewError};
pub use poller::PollSettings;
pub use render::{render_images, Gallery, ImageCard, Preview};
pub use transport::{HttpImageApi, ImageApi};
pub use types::{SelectedFile, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A short message meant for the person driving the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.level {
            NoticeLevel::Success => "✅",
            NoticeLevel::Error => "❌",
        };
        write!(f, "{icon} {}", self.message)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The tracked list changed; carries the full list after the change.
    ImagesChanged(Vec<ImageRecord>),
    Notice(Notice),
    SubmitStateChanged { busy: bool },
}

/// Asks the user to approve a destructive action.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

pub struct AlwaysConfirm;

#[async_trait]
impl Confirmer for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}
