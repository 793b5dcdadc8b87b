//! Core data models shared by the service, the HTTP server and the CLI.
//!
//! Result types serialise every field, including `null`s, so clients can
//! rely on a fixed response shape.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::store::ArtifactName;

/// A request to turn a natural-language prompt into a document.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachment: None,
        }
    }
}

/// A file supplied as reference material for a prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A document persisted in the File Store.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub name: ArtifactName,
    /// Script that produced the document; `None` for exports.
    pub code: Option<String>,
    pub path: PathBuf,
    pub size: usize,
}

impl GeneratedArtifact {
    pub fn download_url(&self) -> String {
        download_url(self.name.as_str())
    }
}

pub fn download_url(filename: &str) -> String {
    format!("/download/{}", filename)
}

/// Failure category carried on every unsuccessful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Oracle,
    NoCode,
    Execution,
    NoOutput,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Oracle => "oracle",
            ErrorKind::NoCode => "no_code",
            ErrorKind::Execution => "execution",
            ErrorKind::NoOutput => "no_output",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Outcome of `generate` and `export`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub message: String,
    pub download_url: Option<String>,
    pub filename: Option<String>,
    pub generated_code: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub retryable: bool,
}

impl GenerationResult {
    pub fn success(artifact: &GeneratedArtifact, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            download_url: Some(artifact.download_url()),
            filename: Some(artifact.name.to_string()),
            generated_code: artifact.code.clone(),
            error: None,
            error_kind: None,
            retryable: false,
        }
    }

    pub fn failure(
        message: impl Into<String>,
        kind: ErrorKind,
        error: impl Into<String>,
        generated_code: Option<String>,
        retryable: bool,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            download_url: None,
            filename: None,
            generated_code,
            error: Some(error.into()),
            error_kind: Some(kind),
            retryable,
        }
    }
}

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub message: String,
    pub deleted_count: usize,
}

impl CleanupResult {
    pub fn new(deleted_count: usize) -> Self {
        Self {
            message: format!("Cleaned up {} old files", deleted_count),
            deleted_count,
        }
    }
}

/// Outcome of `refine`: revised editor content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineResult {
    pub success: bool,
    pub message: String,
    pub content: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub retryable: bool,
}

/// Outcome of `import`: a docx rendered as editor HTML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    pub html: Option<String>,
    pub error: Option<String>,
}
