use shared::{domain::ProcessingAction, error::ValidationError};

#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub filename: String,
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn is_image(&self) -> bool {
        self.media_type
            .as_deref()
            .is_some_and(|media_type| media_type.starts_with("image/"))
    }
}

/// What the user picked before pressing submit.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file: Option<SelectedFile>,
    pub actions: Vec<ProcessingAction>,
}

impl UploadRequest {
    pub fn new(file: SelectedFile, actions: Vec<ProcessingAction>) -> Self {
        Self {
            file: Some(file),
            actions,
        }
    }

    /// Checks the request in the order the user would notice problems:
    /// file, media type, then actions. Duplicate actions are collapsed.
    pub fn validate(self) -> Result<ValidatedUpload, ValidationError> {
        let file = self.file.ok_or(ValidationError::NoFileSelected)?;
        if !file.is_image() {
            return Err(ValidationError::NotAnImage {
                media_type: file.media_type.unwrap_or_default(),
            });
        }

        let mut actions = Vec::with_capacity(self.actions.len());
        for action in self.actions {
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        if actions.is_empty() {
            return Err(ValidationError::NoActionSelected);
        }

        Ok(ValidatedUpload { file, actions })
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub file: SelectedFile,
    pub actions: Vec<ProcessingAction>,
}
