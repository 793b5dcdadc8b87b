//! End-to-end tests for the HTTP server.
//!
//! Each test starts a real server on a free port backed by a scripted
//! [`Oracle`] and a temporary File Store, then drives it with `reqwest`.

use async_trait::async_trait;
use base64::Engine;
use docforge::config::Config;
use docforge::docx::MIME_DOCX;
use docforge::html::docx_to_html;
use docforge::oracle::{Oracle, OracleError};
use docforge::server::run_server_with_oracle;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ─── Test Oracle ────────────────────────────────────────────────────

/// Replays canned replies in order and records every prompt it receives.
struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, OracleError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new(replies: Vec<Result<String, OracleError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn replying(text: &str) -> Arc<Self> {
        Self::new(vec![Ok(text.to_string())])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(OracleError::EmptyResponse))
    }
}

/// Answers with a script whose heading names the topic in the prompt.
/// Prompts mentioning "slow" are answered after two seconds.
#[derive(Default)]
struct TopicOracle {
    calls: AtomicUsize,
}

#[async_trait]
impl Oracle for TopicOracle {
    fn name(&self) -> &str {
        "topic"
    }

    fn model(&self) -> &str {
        "topic-1"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("slow") {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        let topic = ["alpha", "beta"]
            .into_iter()
            .find(|t| prompt.contains(t))
            .unwrap_or("general");
        Ok(fenced(&format!(
            "local doc = docx.new()\ndoc:heading(\"{} report\", 1)\ndoc:save(output_path)",
            topic
        )))
    }
}

/// Panics on every call.
struct PanickingOracle;

#[async_trait]
impl Oracle for PanickingOracle {
    fn name(&self) -> &str {
        "panicking"
    }

    fn model(&self) -> &str {
        "panicking-1"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, OracleError> {
        panic!("provider client bug");
    }
}

const MEMO_SCRIPT: &str = r#"local doc = docx.new({ title = "Team Update" })
doc:heading("Team Update", 1)
doc:paragraph("We ship on Friday.")
doc:bullet("Tests are green")
doc:save(output_path)"#;

fn fenced(code: &str) -> String {
    format!("Here is the script:\n\n```lua\n{}\n```\n", code)
}

// ─── Helpers ────────────────────────────────────────────────────────

struct TestServer {
    _tmp: TempDir,
    store_dir: std::path::PathBuf,
    base: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.store_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn download(&self, download_url: &str) -> Vec<u8> {
        let resp = self
            .client
            .get(self.url(download_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.bytes().await.unwrap().to_vec()
    }

    async fn generate(&self, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/generate"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let store_dir = tmp.path().join("generated_files");
    let config_content = format!(
        r#"
[server]
bind = "127.0.0.1:{}"
cors_origins = ["http://localhost:3000"]

[oracle]
provider = "disabled"

[storage]
dir = "{}"
retention_hours = 24
sweep_interval_secs = 0

[sandbox]
timeout_secs = 2
"#,
        port,
        store_dir.display()
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_server(oracle: Arc<dyn Oracle>) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config_with_port(&tmp, port);
    let store_dir = cfg.storage.dir.clone();

    let handle = tokio::spawn(async move {
        run_server_with_oracle(&cfg, oracle).await.ok();
    });
    wait_for_server(port).await;

    TestServer {
        _tmp: tmp,
        store_dir,
        base: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        handle,
    }
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_api_info() {
    let server = start_server(ScriptedOracle::new(vec![])).await;

    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let info: Value = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(info["endpoints"]["POST /generate"].is_string());
}

#[tokio::test]
async fn test_generate_stores_downloadable_document() {
    let oracle = ScriptedOracle::replying(&fenced(MEMO_SCRIPT));
    let server = start_server(oracle.clone()).await;

    let result = server
        .generate(json!({ "prompt": "Create a simple letter with greeting and closing" }))
        .await;

    assert_eq!(result["success"], true, "result: {}", result);
    assert_eq!(result["message"], "Document generated successfully");
    assert!(result["error"].is_null());
    assert_eq!(result["generated_code"], MEMO_SCRIPT);
    assert_eq!(oracle.calls(), 1);
    assert!(oracle
        .last_prompt()
        .unwrap()
        .contains("Create a simple letter with greeting and closing"));

    let filename = result["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("document_"));
    assert!(filename.ends_with(".docx"));
    assert_eq!(result["download_url"], format!("/download/{}", filename));
    assert_eq!(server.stored_files(), vec![filename.clone()]);

    let resp = server
        .client
        .get(server.url(result["download_url"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], MIME_DOCX);
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains(&filename));

    let bytes = resp.bytes().await.unwrap();
    let on_disk = std::fs::metadata(server.store_dir.join(&filename)).unwrap().len();
    assert_eq!(bytes.len() as u64, on_disk);
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn test_empty_prompt_never_reaches_oracle() {
    let oracle = ScriptedOracle::replying(&fenced(MEMO_SCRIPT));
    let server = start_server(oracle.clone()).await;

    let result = server.generate(json!({ "prompt": "   \n\t" })).await;

    assert_eq!(result["success"], false);
    assert_eq!(result["message"], "Failed to generate document");
    assert_eq!(result["error_kind"], "validation");
    assert!(result["download_url"].is_null());
    assert_eq!(oracle.calls(), 0);
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_invalid_attachment_encoding_is_a_validation_failure() {
    let oracle = ScriptedOracle::replying(&fenced(MEMO_SCRIPT));
    let server = start_server(oracle.clone()).await;

    let result = server
        .generate(json!({
            "prompt": "summarise the notes",
            "attachment": { "content_type": "text/plain", "data": "%%% not base64 %%%" }
        }))
        .await;

    assert_eq!(result["error_kind"], "validation");
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_text_attachment_reaches_the_prompt() {
    let oracle = ScriptedOracle::replying(&fenced(MEMO_SCRIPT));
    let server = start_server(oracle.clone()).await;

    let result = server
        .generate(json!({
            "prompt": "turn these notes into a memo",
            "attachment": {
                "filename": "notes.md",
                "content_type": "text/markdown",
                "data": b64(b"# Notes\n\nBudget approved for Q3."),
            }
        }))
        .await;

    assert_eq!(result["success"], true, "result: {}", result);
    assert!(oracle
        .last_prompt()
        .unwrap()
        .contains("Budget approved for Q3."));
}

#[tokio::test]
async fn test_prose_reply_is_no_code() {
    let oracle =
        ScriptedOracle::replying("I'm sorry, I can't help with creating that document.");
    let server = start_server(oracle).await;

    let result = server.generate(json!({ "prompt": "a memo" })).await;

    assert_eq!(result["success"], false);
    assert_eq!(result["error_kind"], "no_code");
    assert!(result["generated_code"].is_null());
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_script_error_returns_generated_code() {
    let script = "local doc = docx.new()\nerror(\"layout exploded\")";
    let server = start_server(ScriptedOracle::replying(&fenced(script))).await;

    let result = server.generate(json!({ "prompt": "a memo" })).await;

    assert_eq!(result["success"], false);
    assert_eq!(result["error_kind"], "execution");
    assert_eq!(result["generated_code"], script);
    assert!(result["error"].as_str().unwrap().contains("layout exploded"));
    assert_eq!(result["retryable"], false);
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_syntax_error_returns_generated_code() {
    let script = "local doc = docx.new(\ndoc:heading(\"Oops\"";
    let server = start_server(ScriptedOracle::replying(&fenced(script))).await;

    let result = server.generate(json!({ "prompt": "a memo" })).await;

    assert_eq!(result["success"], false);
    assert_eq!(result["error_kind"], "execution");
    assert!(result["error"].as_str().unwrap().starts_with("syntax error"));
    assert_eq!(result["generated_code"], script);
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_concurrent_generations_keep_their_own_content() {
    let oracle = Arc::new(TopicOracle::default());
    let server = start_server(oracle.clone()).await;

    let (a, b) = tokio::join!(
        server.generate(json!({ "prompt": "an alpha memo" })),
        server.generate(json!({ "prompt": "a beta memo" })),
    );

    assert_eq!(a["success"], true, "result: {}", a);
    assert_eq!(b["success"], true, "result: {}", b);
    assert_ne!(a["filename"], b["filename"]);
    assert_eq!(server.stored_files().len(), 2);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);

    let html_a = docx_to_html(&server.download(a["download_url"].as_str().unwrap()).await).unwrap();
    let html_b = docx_to_html(&server.download(b["download_url"].as_str().unwrap()).await).unwrap();
    assert_eq!(html_a, "<h1>alpha report</h1>");
    assert_eq!(html_b, "<h1>beta report</h1>");
}

#[tokio::test]
async fn test_slow_oracle_call_does_not_block_other_requests() {
    let server = start_server(Arc::new(TopicOracle::default())).await;

    let client = server.client.clone();
    let url = server.url("/generate");
    let slow = tokio::spawn(async move {
        client
            .post(url)
            .json(&json!({ "prompt": "a slow alpha memo" }))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap()
    });
    // Let the slow request reach the oracle first.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let fast = server.generate(json!({ "prompt": "a beta memo" })).await;
    assert_eq!(fast["success"], true, "result: {}", fast);
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(!slow.is_finished(), "slow request should still be waiting on the oracle");

    let slow = slow.await.unwrap();
    assert_eq!(slow["success"], true, "result: {}", slow);
    assert_eq!(server.stored_files().len(), 2);
}

#[tokio::test]
async fn test_handler_panic_returns_internal_error() {
    let server = start_server(Arc::new(PanickingOracle)).await;

    let resp = server
        .client
        .post(server.url("/generate"))
        .json(&json!({ "prompt": "a memo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");
    assert!(!body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("provider client bug"));
    assert!(server.stored_files().is_empty());

    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert!(health.status().is_success());
}

#[tokio::test]
async fn test_script_without_save_is_no_output() {
    let script = "local doc = docx.new()\ndoc:heading(\"Draft\", 1)";
    let server = start_server(ScriptedOracle::replying(&fenced(script))).await;

    let result = server.generate(json!({ "prompt": "a memo" })).await;

    assert_eq!(result["error_kind"], "no_output");
    assert_eq!(result["generated_code"], script);
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_runaway_script_times_out() {
    let script = "while true do end";
    let server = start_server(ScriptedOracle::replying(&fenced(script))).await;

    let result = server.generate(json!({ "prompt": "a memo" })).await;

    assert_eq!(result["error_kind"], "execution");
    assert!(result["error"].as_str().unwrap().contains("execution limit"));
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_oracle_failure_is_retryable_and_hides_body() {
    let oracle = ScriptedOracle::new(vec![Err(OracleError::Status {
        status: 503,
        body: "upstream-secret-detail".to_string(),
    })]);
    let server = start_server(oracle.clone()).await;

    let result = server.generate(json!({ "prompt": "a memo" })).await;

    assert_eq!(result["success"], false);
    assert_eq!(result["error_kind"], "oracle");
    assert_eq!(result["retryable"], true);
    assert!(!result["error"]
        .as_str()
        .unwrap()
        .contains("upstream-secret-detail"));
    assert_eq!(oracle.calls(), 1);
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_download_unknown_or_unsafe_name_is_404() {
    let server = start_server(ScriptedOracle::new(vec![])).await;

    for name in [
        "document_00000000-0000-4000-8000-000000000000.docx",
        "..%2F..%2Fetc%2Fpasswd",
        "notes.txt",
    ] {
        let resp = server
            .client
            .get(server.url(&format!("/download/{}", name)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "name: {}", name);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "File not found");
    }
}

#[tokio::test]
async fn test_cleanup_deletes_old_documents_once() {
    let server = start_server(ScriptedOracle::replying(&fenced(MEMO_SCRIPT))).await;
    let result = server.generate(json!({ "prompt": "a memo" })).await;
    let url = result["download_url"].as_str().unwrap().to_string();

    // A fresh document survives the default window.
    let kept: Value = server
        .client
        .delete(server.url("/cleanup?max_age_hours=24"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(kept["deleted_count"], 0);
    assert_eq!(server.stored_files().len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let swept: Value = server
        .client
        .delete(server.url("/cleanup?max_age_hours=0"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(swept["deleted_count"], 1);
    assert_eq!(swept["message"], "Cleaned up 1 old files");

    let again: Value = server
        .client
        .delete(server.url("/cleanup?max_age_hours=0"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["deleted_count"], 0);

    let resp = server.client.get(server.url(&url)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_export_then_import_round_trip() {
    let server = start_server(ScriptedOracle::new(vec![])).await;

    let exported: Value = server
        .client
        .post(server.url("/export"))
        .json(&json!({
            "html": "<h1>Agenda</h1><ul><li>Budget</li><li>Hiring</li></ul>",
            "filename": "agenda"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(exported["success"], true, "result: {}", exported);
    assert!(exported["generated_code"].is_null());
    let filename = exported["filename"].as_str().unwrap();
    assert!(filename.starts_with("agenda_"));

    let bytes = server
        .client
        .get(server.url(exported["download_url"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let imported: Value = server
        .client
        .post(server.url("/import"))
        .json(&json!({ "data": b64(&bytes), "filename": filename }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(imported["success"], true, "result: {}", imported);
    assert_eq!(
        imported["html"],
        "<h1>Agenda</h1><ul><li>Budget</li><li>Hiring</li></ul>"
    );
}

#[tokio::test]
async fn test_import_rejects_non_docx() {
    let server = start_server(ScriptedOracle::new(vec![])).await;

    let imported: Value = server
        .client
        .post(server.url("/import"))
        .json(&json!({ "data": b64(b"just some text") }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(imported["success"], false);
    assert!(imported["html"].is_null());
}

#[tokio::test]
async fn test_refine_returns_unfenced_content() {
    let oracle = ScriptedOracle::replying("```html\n<p>Hello, <strong>team</strong>.</p>\n```");
    let server = start_server(oracle.clone()).await;

    let refined: Value = server
        .client
        .post(server.url("/refine"))
        .json(&json!({ "content": "<p>hi team</p>", "instruction": "make it formal" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(refined["success"], true, "result: {}", refined);
    assert_eq!(refined["content"], "<p>Hello, <strong>team</strong>.</p>");
    let prompt = oracle.last_prompt().unwrap();
    assert!(prompt.contains("make it formal"));
    assert!(prompt.contains("<p>hi team</p>"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = start_server(ScriptedOracle::new(vec![])).await;

    let resp = server
        .client
        .post(server.url("/generate"))
        .header("content-type", "application/json")
        .body(r#"{"prompt": 42}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}
