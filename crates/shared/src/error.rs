use thiserror::Error;

/// Problems detected before anything is sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("select a file to upload")]
    NoFileSelected,
    #[error("please choose an image (got media type '{media_type}')")]
    NotAnImage { media_type: String },
    #[error("select at least one action")]
    NoActionSelected,
    #[error("an upload is already in progress")]
    SubmitInProgress,
}
