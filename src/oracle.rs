//! Code-generation oracle: provider abstraction over hosted LLM APIs.
//!
//! Defines the [`Oracle`] trait and its implementations:
//! - **[`GeminiOracle`]**: Google Gemini `generateContent`.
//! - **[`OpenAiOracle`]**: any OpenAI-compatible `/chat/completions` endpoint.
//! - **[`DisabledOracle`]**: always fails; used when no provider is configured.
//!
//! Use [`create_oracle`] to build the configured provider.
//!
//! # Failure reporting
//!
//! [`OracleError`]'s `Display` output is safe to show to clients: it never
//! includes the provider's response body. The body is kept on the
//! [`OracleError::Status`] variant so callers can log it.
//!
//! There is no retry loop; a failed call is reported once and the client
//! decides whether to try again.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::config::OracleConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// System instruction for document generation.
pub const CODEGEN_INSTRUCTION: &str = r#"You are a coding engine that writes Lua 5.4 scripts which build Word documents.
You must output ONLY valid Lua source. Do not add explanations or introductory text.
Do not wrap the code in Markdown fences.

The script runs in a sandbox. The only globals besides the Lua string, table,
math and utf8 libraries are:

  output_path        -- the destination path; pass it to doc:save
  docx.new(opts)     -- opts: { title = "...", author = "..." } (optional)
  log.info(msg)      -- diagnostics

A document handle supports:

  doc:title(text)
  doc:heading(text, level)                 -- level 1-6, default 1
  doc:paragraph(text_or_runs, opts)        -- opts: bold, italic, underline,
                                           --   size (pt), color ("RRGGBB"),
                                           --   font, align ("left", "center",
                                           --   "right", "justify")
  doc:bullet(text_or_runs, level, opts)    -- level 0-2
  doc:numbered(text_or_runs, level, opts)  -- level 0-2
  doc:table(rows, { header = true })       -- rows: array of arrays of strings
  doc:page_break()
  doc:save(output_path)

A run list mixes formatting inside one paragraph:
  doc:paragraph({ { text = "Bold", bold = true }, " then plain" })

Example:
local doc = docx.new({ title = "Report" })
doc:heading("Quarterly Report", 1)
doc:paragraph("Revenue grew 12%.", { align = "justify" })
doc:save(output_path)
"#;

/// System instruction for rewriting existing document content.
pub const REFINE_INSTRUCTION: &str = r#"You are a document editor. You receive document content as HTML and an editing instruction.
Apply the instruction and return ONLY the revised HTML, using the same tags
(h1-h6, p, strong, em, u, ul, ol, li, table, tr, th, td, br).
Do not add explanations and do not wrap the result in Markdown fences."#;

/// Wrap a user prompt the way the generation endpoint sends it.
pub fn codegen_prompt(prompt: &str, context: Option<&str>) -> String {
    let mut out = format!(
        "Generate a Lua script using the docx API to create a document with the following requirements:\n\n{}\n",
        prompt.trim()
    );
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        out.push_str("\nUse this reference material from the attached file:\n\n");
        out.push_str(context);
        out.push('\n');
    }
    out.push_str("\nRemember to call doc:save(output_path).");
    out
}

/// Wrap refine input into a single user message.
pub fn refine_prompt(content: &str, instruction: &str) -> String {
    format!(
        "Instruction: {}\n\nDocument content:\n{}",
        instruction.trim(),
        content
    )
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("the code-generation oracle is disabled")]
    Disabled,
    #[error("no API key configured for the {0} oracle")]
    MissingCredential(String),
    #[error("oracle request failed: {0}")]
    Transport(String),
    #[error("oracle request timed out")]
    Timeout,
    #[error("oracle returned HTTP {status}")]
    Status { status: u16, body: String },
    #[error("oracle declined the request: {0}")]
    Blocked(String),
    #[error("oracle returned no content")]
    EmptyResponse,
    #[error("unexpected oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Whether the same request might succeed if sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Transport(_) | OracleError::Timeout | OracleError::EmptyResponse => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::Disabled
            | OracleError::MissingCredential(_)
            | OracleError::Blocked(_)
            | OracleError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout
        } else if err.is_decode() {
            OracleError::Malformed(err.to_string())
        } else {
            // Endpoint URLs stay out of client-facing messages.
            OracleError::Transport(err.without_url().to_string())
        }
    }
}

/// A text-completion backend.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Provider identifier (e.g. `"gemini"`).
    fn name(&self) -> &str;
    /// Model identifier, for logs.
    fn model(&self) -> &str;
    /// Send one system instruction and one user message; return the reply text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError>;
}

/// Build the provider selected by `config.provider`.
pub fn create_oracle(config: &OracleConfig) -> Result<Arc<dyn Oracle>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledOracle)),
        "gemini" => Ok(Arc::new(GeminiOracle::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiOracle::new(config)?)),
        other => bail!("Unknown oracle provider: {}", other),
    }
}

fn http_client(config: &OracleConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout())
        .build()?)
}

async fn post_json(request: reqwest::RequestBuilder, body: &Value) -> Result<Value, OracleError> {
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OracleError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}

// ============ Disabled ============

pub struct DisabledOracle;

#[async_trait]
impl Oracle for DisabledOracle {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, OracleError> {
        Err(OracleError::Disabled)
    }
}

// ============ Gemini ============

/// Google Gemini via `POST {base}/models/{model}:generateContent`.
pub struct GeminiOracle {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: config.model_name(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolved_api_key(),
        })
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn name(&self) -> &str {
        "gemini"
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| OracleError::MissingCredential("gemini".to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let request = self.client.post(&url).header("x-goog-api-key", api_key);
        let json = post_json(request, &body).await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &Value) -> Result<String, OracleError> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(OracleError::Blocked(reason.to_string()));
    }

    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or(OracleError::EmptyResponse)?;

    let parts = match candidate.pointer("/content/parts").and_then(|p| p.as_array()) {
        Some(parts) => parts,
        None => {
            return match candidate.get("finishReason").and_then(|r| r.as_str()) {
                Some(reason) if reason != "STOP" => Err(OracleError::Blocked(reason.to_string())),
                _ => Err(OracleError::EmptyResponse),
            }
        }
    };

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(OracleError::EmptyResponse);
    }
    Ok(text)
}

// ============ OpenAI-compatible ============

/// Any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiOracle {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: config.model_name(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolved_api_key(),
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    fn name(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| OracleError::MissingCredential("openai".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let request = self.client.post(&url).bearer_auth(api_key);
        let json = post_json(request, &body).await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<String, OracleError> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| OracleError::Malformed("missing choices[0].message".to_string()))?;

    if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
        return Err(OracleError::Blocked(refusal.to_string()));
    }

    match message.get("content").and_then(|c| c.as_str()) {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(OracleError::EmptyResponse),
    }
}
