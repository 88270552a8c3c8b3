//! View model for the tracked image list, plus a plain-text rendering.

use std::fmt;

use shared::domain::{ImageId, ImageRecord, ImageStatus};
use url::Url;

use crate::transport::image_url;

pub const FILENAME_DISPLAY_LIMIT: usize = 30;
pub const EMPTY_STATE_TEXT: &str = "📭 No uploaded images";
pub const PREVIEW_FALLBACK_TEXT: &str = "❌ Failed to load preview";
const UNKNOWN_STATUS_ICON: &str = "❓";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gallery {
    Empty { placeholder: &'static str },
    Cards(Vec<ImageCard>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCard {
    pub id: ImageId,
    pub filename: String,
    pub display_filename: String,
    pub preview: Preview,
    pub status_icon: &'static str,
    pub status_text: String,
    pub status_class: String,
    pub view_enabled: bool,
    pub delete_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Image { src: Url, fallback: &'static str },
    Placeholder { icon: &'static str, text: String },
}

pub fn render_images(images: &[ImageRecord], base_url: &Url) -> Gallery {
    if images.is_empty() {
        return Gallery::Empty {
            placeholder: EMPTY_STATE_TEXT,
        };
    }
    Gallery::Cards(
        images
            .iter()
            .map(|image| render_card(image, base_url))
            .collect(),
    )
}

fn render_card(image: &ImageRecord, base_url: &Url) -> ImageCard {
    let status_icon = status_icon(&image.status);
    let status_text = status_text(&image.status).to_string();
    let is_done = image.status == ImageStatus::Done;
    let preview = if is_done {
        Preview::Image {
            src: image_url(base_url, &image.id),
            fallback: PREVIEW_FALLBACK_TEXT,
        }
    } else {
        Preview::Placeholder {
            icon: status_icon,
            text: status_text.clone(),
        }
    };

    ImageCard {
        id: image.id.clone(),
        filename: image.filename.clone(),
        display_filename: truncate_filename(&image.filename, FILENAME_DISPLAY_LIMIT),
        preview,
        status_icon,
        status_text,
        status_class: image.status.as_str().to_lowercase(),
        view_enabled: is_done,
        delete_enabled: true,
    }
}

pub fn status_text(status: &ImageStatus) -> &str {
    match status {
        ImageStatus::Pending => "Processing",
        ImageStatus::Done => "Ready",
        ImageStatus::Failed => "Error",
        ImageStatus::Unrecognized(raw) => raw,
    }
}

pub fn status_icon(status: &ImageStatus) -> &'static str {
    match status {
        ImageStatus::Pending => "⏳",
        ImageStatus::Done => "✅",
        ImageStatus::Failed => "❌",
        ImageStatus::Unrecognized(_) => UNKNOWN_STATUS_ICON,
    }
}

/// Shortens `filename` to at most `max_len` characters, keeping the
/// extension visible: `max_len - ext_len - 4` leading characters of the
/// stem, then `...`, then `.ext`.
pub fn truncate_filename(filename: &str, max_len: usize) -> String {
    if filename.chars().count() <= max_len {
        return filename.to_string();
    }

    match filename.rsplit_once('.') {
        Some((stem, ext)) => {
            let keep = max_len.saturating_sub(ext.chars().count() + 4);
            let head: String = stem.chars().take(keep).collect();
            format!("{head}....{ext}")
        }
        None => {
            let head: String = filename.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

impl fmt::Display for Gallery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gallery::Empty { placeholder } => writeln!(f, "{placeholder}"),
            Gallery::Cards(cards) => {
                for (index, card) in cards.iter().enumerate() {
                    if index > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{card}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ImageCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.preview {
            Preview::Image { src, .. } => writeln!(f, "🖼️  {src}")?,
            Preview::Placeholder { icon, text } => writeln!(f, "{icon} {text}")?,
        }
        writeln!(f, "   📄 {}", self.display_filename)?;
        writeln!(f, "   🆔 {}", self.id)?;
        writeln!(
            f,
            "   [{}] {} {}",
            self.status_class, self.status_icon, self.status_text
        )?;
        let view = if self.view_enabled { "view" } else { "view (unavailable)" };
        writeln!(f, "   actions: {view}, delete")
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
