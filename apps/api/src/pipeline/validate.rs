//! Input validation — runs synchronously before any pipeline stage.
//! A validation failure short-circuits the run: nothing is persisted and
//! the only event subscribers see is `upload:failed`.

use thiserror::Error;

use crate::pipeline::extract::FileKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Uploaded file is empty or invalid")]
    EmptyFile,

    #[error("File size exceeds the {0}MB limit")]
    FileTooLarge(u64),

    #[error("Invalid file type '.{0}'. Only PDF, DOC, DOCX and TXT files are allowed")]
    InvalidFileType(String),

    #[error("Job description is required")]
    MissingJobDescription,

    #[error("Job title is required")]
    MissingJobTitle,
}

/// Validates the upload and required text fields, resolving the file kind
/// from the filename extension. Checks run in severity order; the first
/// failure wins.
pub fn validate(
    file_bytes: &[u8],
    file_name: &str,
    job_description: &str,
    job_title: &str,
    max_file_size_bytes: usize,
) -> Result<FileKind, ValidationError> {
    if file_bytes.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    if file_bytes.len() > max_file_size_bytes {
        return Err(ValidationError::FileTooLarge(
            (max_file_size_bytes / (1024 * 1024)) as u64,
        ));
    }

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let kind = FileKind::from_extension(&extension)
        .ok_or(ValidationError::InvalidFileType(extension))?;

    if job_description.trim().is_empty() {
        return Err(ValidationError::MissingJobDescription);
    }
    if job_title.trim().is_empty() {
        return Err(ValidationError::MissingJobTitle);
    }

    Ok(kind)
}
