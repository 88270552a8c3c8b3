use serde::{Deserialize, Serialize};

use crate::domain::ImageStatus;

pub const UPLOAD_PATH: &str = "upload";
pub const IMAGE_PATH: &str = "image";
pub const STATUS_SEGMENT: &str = "status";

/// Multipart field carrying the image bytes.
pub const UPLOAD_FIELD_IMAGE: &str = "image";
/// Multipart field carrying the comma-joined action names.
pub const UPLOAD_FIELD_ACTIONS: &str = "actions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ImageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `GET /image/{id}/status`. The server sends the whole image row;
/// only `status` matters here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ImageStatus,
}

pub fn join_actions<S: AsRef<str>>(actions: &[S]) -> String {
    actions
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",")
}
