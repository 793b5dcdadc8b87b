//! Attachment handling through the generation pipeline.
//!
//! PDF, docx and text attachments must reach the oracle prompt as plain
//! text; oversized, unsupported or unreadable attachments fail validation
//! before any oracle call.

use async_trait::async_trait;
use docforge::config::Config;
use docforge::docx::{Alignment, Document, Run, MIME_DOCX};
use docforge::models::{Attachment, ErrorKind, GenerationRequest};
use docforge::oracle::{Oracle, OracleError};
use docforge::service::GenerationService;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Records prompts and always answers with the same saving script.
#[derive(Default)]
struct RecordingOracle {
    prompts: Mutex<Vec<String>>,
}

impl RecordingOracle {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for RecordingOracle {
    fn name(&self) -> &str {
        "recording"
    }

    fn model(&self) -> &str {
        "recording-1"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, OracleError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("```lua\nlocal d = docx.new()\nd:paragraph(\"ok\")\nd:save(output_path)\n```".into())
    }
}

/// Single-page PDF showing `phrase` in Helvetica, with a correct xref table.
fn pdf_with_text(phrase: &str) -> Vec<u8> {
    build_pdf(
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>",
        phrase,
    )
}

/// Structurally valid PDF whose page has no resource dictionary.
fn pdf_without_resources(phrase: &str) -> Vec<u8> {
    build_pdf(
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>",
        phrase,
    )
}

fn build_pdf(page: &str, phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        page.to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn docx_with_text(heading: &str, body: &str) -> Vec<u8> {
    let mut doc = Document::new();
    doc.heading(heading, 1).unwrap();
    doc.paragraph(vec![Run::plain(body)], Alignment::Left);
    doc.to_bytes().unwrap()
}

fn setup(max_upload_bytes: usize) -> (TempDir, Arc<RecordingOracle>, GenerationService) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.storage.dir = tmp.path().join("store");
    config.storage.max_upload_bytes = max_upload_bytes;
    let oracle = Arc::new(RecordingOracle::default());
    let service = GenerationService::new(&config, oracle.clone()).unwrap();
    (tmp, oracle, service)
}

fn request(content_type: &str, data: Vec<u8>) -> GenerationRequest {
    GenerationRequest {
        prompt: "summarise the attachment".to_string(),
        attachment: Some(Attachment {
            filename: None,
            content_type: content_type.to_string(),
            data,
        }),
    }
}

#[tokio::test]
async fn pdf_attachment_text_reaches_prompt() {
    let (_tmp, oracle, service) = setup(1024 * 1024);

    let result = service
        .generate(request("application/pdf", pdf_with_text("quarterly budget summary")))
        .await;

    assert!(result.success, "{:?}", result);
    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("quarterly budget summary"), "{}", prompts[0]);
}

#[tokio::test]
async fn docx_attachment_text_reaches_prompt() {
    let (_tmp, oracle, service) = setup(1024 * 1024);

    let result = service
        .generate(request(
            MIME_DOCX,
            docx_with_text("Roadmap", "Migrate billing in March"),
        ))
        .await;

    assert!(result.success, "{:?}", result);
    let prompt = &oracle.prompts()[0];
    assert!(prompt.contains("Roadmap"));
    assert!(prompt.contains("Migrate billing in March"));
}

#[tokio::test]
async fn content_type_parameters_are_ignored() {
    let (_tmp, oracle, service) = setup(1024 * 1024);

    let result = service
        .generate(request("Text/Plain; charset=utf-8", b"ship date: May 2".to_vec()))
        .await;

    assert!(result.success, "{:?}", result);
    assert!(oracle.prompts()[0].contains("ship date: May 2"));
}

#[tokio::test]
async fn oversized_attachment_is_rejected_before_oracle() {
    let (_tmp, oracle, service) = setup(16);

    let result = service
        .generate(request("text/plain", vec![b'a'; 17]))
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(oracle.prompts().is_empty());
}

#[tokio::test]
async fn corrupt_docx_attachment_is_rejected_before_oracle() {
    let (tmp, oracle, service) = setup(1024 * 1024);

    let result = service
        .generate(request(MIME_DOCX, b"PK but not really a zip".to_vec()))
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(result.error.unwrap().contains("could not read attachment"));
    assert!(oracle.prompts().is_empty());
    assert!(std::fs::read_dir(tmp.path().join("store"))
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn malformed_pdf_attachment_is_a_validation_failure() {
    let (tmp, oracle, service) = setup(1024 * 1024);

    let result = service
        .generate(request("application/pdf", pdf_without_resources("no fonts here")))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(result.error.unwrap().contains("could not read attachment"));
    assert!(oracle.prompts().is_empty());
    assert!(std::fs::read_dir(tmp.path().join("store"))
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn long_attachments_are_truncated() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.storage.dir = tmp.path().join("store");
    config.oracle.max_context_chars = 10;
    let oracle = Arc::new(RecordingOracle::default());
    let service = GenerationService::new(&config, oracle.clone()).unwrap();

    let result = service
        .generate(request("text/plain", b"0123456789ABCDEFGHIJ".to_vec()))
        .await;

    assert!(result.success, "{:?}", result);
    let prompt = &oracle.prompts()[0];
    assert!(prompt.contains("0123456789"));
    assert!(!prompt.contains("ABCDEFGHIJ"));
}
