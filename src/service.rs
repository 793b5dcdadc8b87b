//! Generation Service: prompt → oracle → code → sandbox → File Store.
//!
//! Every operation the server and CLI expose is a method on
//! [`GenerationService`]. Failures are typed as [`GenerateError`] and turned
//! into a structured result at this boundary, so callers never see a raw
//! error from a lower layer.
//!
//! # Generation pipeline
//!
//! 1. Reject blank prompts and unreadable attachments (no oracle call).
//! 2. Ask the oracle for a Lua script.
//! 3. Extract code from the reply; prose or blank replies fail as `no_code`.
//! 4. Allocate a fresh [`ArtifactName`]; its store path becomes `output_path`.
//! 5. Execute the script under the sandbox limits.
//! 6. Persist the saved bytes atomically. A script that never calls `save`
//!    fails as `no_output`.
//!
//! Exactly one file is written on success and none on failure. Nothing is
//! retried.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::codeblock::{extract_code, first_fenced_block, Extraction};
use crate::config::Config;
use crate::extract::{extract_text, is_supported};
use crate::html::{docx_to_html, html_to_document};
use crate::models::{
    Attachment, CleanupResult, ErrorKind, GeneratedArtifact, GenerationRequest, GenerationResult,
    ImportResult, RefineResult,
};
use crate::oracle::{
    codegen_prompt, create_oracle, refine_prompt, Oracle, OracleError, CODEGEN_INSTRUCTION,
    REFINE_INSTRUCTION,
};
use crate::sandbox::{self, ExecutionError, SandboxLimits};
use crate::store::{ArtifactInfo, ArtifactName, FileStore, StoreError};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("{0}")]
    NoCode(String),
    #[error("{source}")]
    Execution {
        source: ExecutionError,
        code: String,
    },
    #[error("the script finished without saving a document")]
    NoOutput { code: String },
    #[error("could not store the document: {source}")]
    Storage {
        source: StoreError,
        code: Option<String>,
    },
    #[error("{message}")]
    Internal {
        message: String,
        code: Option<String>,
    },
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::Validation(_) => ErrorKind::Validation,
            GenerateError::Oracle(_) => ErrorKind::Oracle,
            GenerateError::NoCode(_) => ErrorKind::NoCode,
            GenerateError::Execution { .. } => ErrorKind::Execution,
            GenerateError::NoOutput { .. } => ErrorKind::NoOutput,
            GenerateError::Storage { .. } => ErrorKind::Storage,
            GenerateError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Only transient oracle failures are worth retrying unchanged.
    pub fn retryable(&self) -> bool {
        matches!(self, GenerateError::Oracle(e) if e.is_transient())
    }

    /// The generated script, when the failure happened after extraction.
    pub fn code(&self) -> Option<&str> {
        match self {
            GenerateError::Execution { code, .. } | GenerateError::NoOutput { code } => {
                Some(code)
            }
            GenerateError::Storage { code, .. } | GenerateError::Internal { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    fn into_result(self, message: &str) -> GenerationResult {
        GenerationResult::failure(
            message,
            self.kind(),
            self.to_string(),
            self.code().map(str::to_string),
            self.retryable(),
        )
    }
}

pub struct GenerationService {
    oracle: Arc<dyn Oracle>,
    store: FileStore,
    limits: SandboxLimits,
    retention: Duration,
    max_upload_bytes: usize,
    max_context_chars: usize,
}

impl GenerationService {
    pub fn new(config: &Config, oracle: Arc<dyn Oracle>) -> Result<Self, StoreError> {
        Ok(Self {
            oracle,
            store: FileStore::open(&config.storage.dir)?,
            limits: SandboxLimits::from(&config.sandbox),
            retention: config.storage.retention(),
            max_upload_bytes: config.storage.max_upload_bytes,
            max_context_chars: config.oracle.max_context_chars,
        })
    }

    /// Build the service with the oracle named in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let oracle = create_oracle(&config.oracle)?;
        Ok(Self::new(config, oracle)?)
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    // ============ generate ============

    /// Run the full pipeline and report the outcome as a result body.
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        match self.generate_artifact(request).await {
            Ok(artifact) => {
                GenerationResult::success(&artifact, "Document generated successfully")
            }
            Err(err) => err.into_result("Failed to generate document"),
        }
    }

    /// Run the full pipeline, returning the stored artifact.
    pub async fn generate_artifact(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedArtifact, GenerateError> {
        let started = Instant::now();
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(GenerateError::Validation(
                "prompt must not be empty".to_string(),
            ));
        }
        let context = match request.attachment {
            Some(attachment) => Some(self.attachment_context(attachment).await?),
            None => None,
        };

        let reply = self
            .oracle
            .complete(CODEGEN_INSTRUCTION, &codegen_prompt(prompt, context.as_deref()))
            .await
            .map_err(|err| {
                tracing::warn!(
                    oracle = self.oracle.name(),
                    model = self.oracle.model(),
                    error = ?err,
                    "oracle call failed"
                );
                err
            })?;
        let oracle_elapsed = started.elapsed();

        let code = match extract_code(&reply) {
            Extraction::Code(code) => code,
            Extraction::Empty => {
                return Err(GenerateError::NoCode(
                    "the model returned an empty response".to_string(),
                ))
            }
            Extraction::Prose => {
                tracing::warn!(reply = %reply, "oracle reply contained no code");
                return Err(GenerateError::NoCode(
                    "the model response did not contain code".to_string(),
                ));
            }
        };

        let name = ArtifactName::generate(None);
        let output_path = self.store.path_for(&name);
        let output = sandbox::execute(
            code.clone(),
            output_path.to_string_lossy().into_owned(),
            self.limits.clone(),
        )
        .await;

        let output = match output {
            Ok(output) => output,
            Err(ExecutionError::Aborted(message)) => {
                tracing::error!(artifact = %name, error = %message, "execution task aborted");
                return Err(GenerateError::Internal {
                    message: "document generation was interrupted".to_string(),
                    code: Some(code),
                });
            }
            Err(source) => {
                tracing::warn!(artifact = %name, error = %source, "generated script failed");
                return Err(GenerateError::Execution { source, code });
            }
        };

        let Some(bytes) = output.document.filter(|b| !b.is_empty()) else {
            tracing::warn!(artifact = %name, "generated script did not save a document");
            return Err(GenerateError::NoOutput { code });
        };

        let path = self
            .store
            .save(&name, &bytes)
            .await
            .map_err(|source| GenerateError::Storage {
                source,
                code: Some(code.clone()),
            })?;

        tracing::info!(
            artifact = %name,
            bytes = bytes.len(),
            oracle_ms = oracle_elapsed.as_millis() as u64,
            exec_ms = output.elapsed.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "document generated"
        );

        Ok(GeneratedArtifact {
            name,
            code: Some(code),
            path,
            size: bytes.len(),
        })
    }

    /// Validate an attachment and extract its text on a blocking thread.
    async fn attachment_context(&self, attachment: Attachment) -> Result<String, GenerateError> {
        if attachment.data.len() > self.max_upload_bytes {
            return Err(GenerateError::Validation(format!(
                "attachment exceeds the {}-byte upload limit",
                self.max_upload_bytes
            )));
        }
        if !is_supported(&attachment.content_type) {
            return Err(GenerateError::Validation(format!(
                "unsupported attachment type: {}",
                attachment.content_type
            )));
        }
        let max_chars = self.max_context_chars;
        let extracted = tokio::task::spawn_blocking(move || {
            extract_text(&attachment.data, &attachment.content_type)
                .map(|text| truncate_chars(&text, max_chars))
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "attachment extraction task failed");
            GenerateError::Internal {
                message: "attachment extraction was interrupted".to_string(),
                code: None,
            }
        })?;
        extracted
            .map_err(|e| GenerateError::Validation(format!("could not read attachment: {}", e)))
    }

    // ============ export ============

    /// Convert editor HTML into a stored docx.
    pub async fn export(&self, html: &str, filename: Option<&str>) -> GenerationResult {
        match self.export_artifact(html, filename).await {
            Ok(artifact) => GenerationResult::success(&artifact, "Document exported successfully"),
            Err(err) => err.into_result("Failed to export document"),
        }
    }

    pub async fn export_artifact(
        &self,
        html: &str,
        filename: Option<&str>,
    ) -> Result<GeneratedArtifact, GenerateError> {
        if html.trim().is_empty() {
            return Err(GenerateError::Validation(
                "html must not be empty".to_string(),
            ));
        }
        let html = html.to_string();
        let bytes = tokio::task::spawn_blocking(move || render_html(&html))
            .await
            .map_err(|e| GenerateError::Internal {
                message: format!("export task failed: {}", e),
                code: None,
            })??;

        let name = ArtifactName::generate(filename);
        let path = self
            .store
            .save(&name, &bytes)
            .await
            .map_err(|source| GenerateError::Storage { source, code: None })?;
        tracing::info!(artifact = %name, bytes = bytes.len(), "document exported");

        Ok(GeneratedArtifact {
            name,
            code: None,
            path,
            size: bytes.len(),
        })
    }

    // ============ refine ============

    /// Ask the oracle to rewrite editor content according to `instruction`.
    pub async fn refine(&self, content: &str, instruction: &str) -> RefineResult {
        match self.refine_content(content, instruction).await {
            Ok(content) => RefineResult {
                success: true,
                message: "Content refined successfully".to_string(),
                content: Some(content),
                error: None,
                error_kind: None,
                retryable: false,
            },
            Err(err) => RefineResult {
                success: false,
                message: "Failed to refine content".to_string(),
                content: None,
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
                retryable: err.retryable(),
            },
        }
    }

    pub async fn refine_content(
        &self,
        content: &str,
        instruction: &str,
    ) -> Result<String, GenerateError> {
        if content.trim().is_empty() {
            return Err(GenerateError::Validation(
                "content must not be empty".to_string(),
            ));
        }
        if instruction.trim().is_empty() {
            return Err(GenerateError::Validation(
                "instruction must not be empty".to_string(),
            ));
        }

        let reply = self
            .oracle
            .complete(REFINE_INSTRUCTION, &refine_prompt(content, instruction))
            .await
            .map_err(|err| {
                tracing::warn!(oracle = self.oracle.name(), error = ?err, "refine call failed");
                err
            })?;

        let revised = first_fenced_block(&reply).unwrap_or_else(|| reply.trim().to_string());
        if revised.trim().is_empty() {
            return Err(GenerateError::NoCode(
                "the model returned an empty response".to_string(),
            ));
        }
        Ok(revised)
    }

    // ============ import ============

    /// Render an uploaded docx as editor HTML.
    pub fn import(&self, data: &[u8]) -> ImportResult {
        match self.import_html(data) {
            Ok(html) => ImportResult {
                success: true,
                message: "Document imported successfully".to_string(),
                html: Some(html),
                error: None,
            },
            Err(err) => ImportResult {
                success: false,
                message: "Failed to import document".to_string(),
                html: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn import_html(&self, data: &[u8]) -> Result<String, GenerateError> {
        if data.is_empty() {
            return Err(GenerateError::Validation(
                "document must not be empty".to_string(),
            ));
        }
        if data.len() > self.max_upload_bytes {
            return Err(GenerateError::Validation(format!(
                "document exceeds the {}-byte upload limit",
                self.max_upload_bytes
            )));
        }
        docx_to_html(data).map_err(|e| GenerateError::Validation(e.to_string()))
    }

    // ============ store operations ============

    /// Read a stored artifact for download.
    pub async fn download(&self, filename: &str) -> Result<(ArtifactName, Vec<u8>), StoreError> {
        self.store.fetch(filename).await
    }

    /// Delete artifacts older than `max_age_hours` (default: the configured
    /// retention window).
    pub async fn cleanup(&self, max_age_hours: Option<u64>) -> Result<CleanupResult, StoreError> {
        let max_age = max_age_hours
            .map(|h| Duration::from_secs(h.saturating_mul(3600)))
            .unwrap_or(self.retention);
        let deleted = self.store.cleanup(max_age).await?;
        if deleted > 0 {
            tracing::info!(deleted, max_age_secs = max_age.as_secs(), "cleanup finished");
        }
        Ok(CleanupResult::new(deleted))
    }

    pub async fn list(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        self.store.list().await
    }
}

/// Parse editor HTML and package it as docx bytes.
fn render_html(html: &str) -> Result<Vec<u8>, GenerateError> {
    let doc = html_to_document(html).map_err(|e| GenerateError::Validation(e.to_string()))?;
    if doc.is_empty() {
        return Err(GenerateError::Validation(
            "document has no content".to_string(),
        ));
    }
    doc.to_bytes().map_err(|e| GenerateError::Internal {
        message: e.to_string(),
        code: None,
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
