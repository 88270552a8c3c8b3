use shared::{
    domain::{ImageId, ImageStatus},
    error::ValidationError,
};
use thiserror::Error;

/// Failure talking to the image service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response; `message` is the server's body text or a fallback.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("server response did not include an image id")]
    MissingImageId,
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("image {0} is not tracked")]
    UnknownImage(ImageId),
    #[error("image {id} is not ready yet (status: {status})")]
    NotReady { id: ImageId, status: ImageStatus },
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum ServerUrlError {
    #[error("invalid server url '{url}': {source}")]
    Parse {
        url: String,
        source: url::ParseError,
    },
    #[error("server url '{0}' must be an http:// or https:// address")]
    UnsupportedScheme(String),
}
