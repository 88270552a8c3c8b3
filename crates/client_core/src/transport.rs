//! HTTP access to the image service.

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use shared::{
    domain::{ImageId, ImageStatus, ProcessingAction},
    protocol::{
        join_actions, StatusResponse, UploadResponse, IMAGE_PATH, STATUS_SEGMENT,
        UPLOAD_FIELD_ACTIONS, UPLOAD_FIELD_IMAGE, UPLOAD_PATH,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    error::{ApiError, ServerUrlError},
    types::SelectedFile,
};

const UPLOAD_FAILED: &str = "upload failed";
const STATUS_CHECK_FAILED: &str = "status check failed";
const IMAGE_FETCH_FAILED: &str = "image download failed";
const DELETE_FAILED: &str = "delete failed";

/// Operations the controller needs from the image service.
#[async_trait]
pub trait ImageApi: Send + Sync {
    fn base_url(&self) -> &Url;

    async fn upload(
        &self,
        file: &SelectedFile,
        actions: &[ProcessingAction],
    ) -> Result<UploadResponse, ApiError>;

    async fn fetch_status(&self, image_id: &ImageId) -> Result<ImageStatus, ApiError>;

    async fn fetch_image(&self, image_id: &ImageId) -> Result<Vec<u8>, ApiError>;

    async fn delete_image(&self, image_id: &ImageId) -> Result<(), ApiError>;
}

pub fn parse_server_url(raw: &str) -> Result<Url, ServerUrlError> {
    let url = Url::parse(raw.trim()).map_err(|source| ServerUrlError::Parse {
        url: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ServerUrlError::UnsupportedScheme(raw.to_string()));
    }
    Ok(url)
}

/// Appends path segments to `base`, percent-encoding each one.
pub fn endpoint_url<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// `GET /image/{id}`: the processed image itself.
pub fn image_url(base: &Url, image_id: &ImageId) -> Url {
    endpoint_url(base, [IMAGE_PATH, image_id.as_str()])
}

pub fn image_status_url(base: &Url, image_id: &ImageId) -> Url {
    endpoint_url(base, [IMAGE_PATH, image_id.as_str(), STATUS_SEGMENT])
}

pub fn upload_url(base: &Url) -> Url {
    endpoint_url(base, [UPLOAD_PATH])
}

pub struct HttpImageApi {
    http: Client,
    base_url: Url,
}

impl HttpImageApi {
    pub fn new(server_url: &str) -> Result<Self, ServerUrlError> {
        Ok(Self::with_client(Client::new(), parse_server_url(server_url)?))
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl ImageApi for HttpImageApi {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn upload(
        &self,
        file: &SelectedFile,
        actions: &[ProcessingAction],
    ) -> Result<UploadResponse, ApiError> {
        let mut image_part = Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
        if let Some(media_type) = file.media_type.as_deref() {
            image_part = image_part.mime_str(media_type)?;
        }
        let action_names: Vec<&str> = actions.iter().map(|action| action.as_str()).collect();
        let form = Form::new()
            .part(UPLOAD_FIELD_IMAGE, image_part)
            .text(UPLOAD_FIELD_ACTIONS, join_actions(&action_names));

        let url = upload_url(&self.base_url);
        debug!(%url, filename = %file.filename, "uploading image");
        let response = self.http.post(url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, UPLOAD_FAILED).await);
        }

        response
            .json::<UploadResponse>()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    async fn fetch_status(&self, image_id: &ImageId) -> Result<ImageStatus, ApiError> {
        let response = self
            .http
            .get(image_status_url(&self.base_url, image_id))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, STATUS_CHECK_FAILED).await);
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
        Ok(body.status)
    }

    async fn fetch_image(&self, image_id: &ImageId) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .get(image_url(&self.base_url, image_id))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, IMAGE_FETCH_FAILED).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete_image(&self, image_id: &ImageId) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(image_url(&self.base_url, image_id))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, image_id = %image_id, "delete rejected by server");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: DELETE_FAILED.to_string(),
            });
        }
        Ok(())
    }
}

/// Prefers the server's own error text; falls back when the body is empty
/// or unreadable.
async fn error_from_response(response: Response, fallback: &str) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = match body.trim() {
        "" => fallback.to_string(),
        text => text.to_string(),
    };
    ApiError::Status { status, message }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
