//! CLI command implementations.
//!
//! Each `run_*` function backs one `docforge` subcommand. They drive the
//! same [`GenerationService`] the HTTP server uses and print a short
//! human-readable report to stdout.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{Config, EXAMPLE_CONFIG};
use crate::extract::content_type_for_path;
use crate::models::{Attachment, GenerationRequest};
use crate::sandbox::{self, SandboxLimits};
use crate::service::GenerationService;

/// Generate a document from a prompt, optionally copying it to `out`.
pub async fn run_generate(
    config: &Config,
    prompt: &str,
    attach: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let service = GenerationService::from_config(config)?;

    let attachment = match attach {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
            let content_type = content_type_for_path(path).ok_or_else(|| {
                anyhow::anyhow!("Unsupported attachment type: {}", path.display())
            })?;
            Some(Attachment {
                filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                content_type: content_type.to_string(),
                data,
            })
        }
        None => None,
    };

    let request = GenerationRequest {
        prompt: prompt.to_string(),
        attachment,
    };

    match service.generate_artifact(request).await {
        Ok(artifact) => {
            println!("Document generated: {}", artifact.name);
            println!("  path:  {}", artifact.path.display());
            println!("  size:  {} bytes", artifact.size);
            if let Some(out) = out {
                std::fs::copy(&artifact.path, out)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                println!("  copied to {}", out.display());
            }
            Ok(())
        }
        Err(err) => {
            if let Some(code) = err.code() {
                eprintln!("--- Generated code ---");
                eprintln!("{}", code);
                eprintln!();
            }
            bail!("Generation failed ({}): {}", err.kind().as_str(), err)
        }
    }
}

/// Execute a local Lua script in the generation sandbox and write the
/// document it saves to `out`.
pub async fn run_script(config: &Config, path: &Path, out: &Path) -> Result<()> {
    let code = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;
    let limits = SandboxLimits::from(&config.sandbox);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string());
    let output_path = out.to_string_lossy().into_owned();

    println!("Running script: {}", path.display());

    let output = {
        let output_path = output_path.clone();
        tokio::task::spawn_blocking(move || {
            sandbox::run_script(&name, &code, &output_path, &limits)
        })
        .await
        .context("Lua script task panicked")??
    };

    let Some(bytes) = output.document else {
        bail!("Script finished without calling save()");
    };
    std::fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;

    println!("  ✓ Script executed in {} ms", output.elapsed.as_millis());
    println!("  ✓ Wrote {} bytes to {}", bytes.len(), output_path);
    Ok(())
}

/// Convert an HTML file into a stored docx.
pub async fn run_export(config: &Config, html_path: &Path, out: Option<&Path>) -> Result<()> {
    let html = std::fs::read_to_string(html_path)
        .with_context(|| format!("Failed to read {}", html_path.display()))?;
    let service = GenerationService::from_config(config)?;
    let stem = html_path.file_stem().map(|s| s.to_string_lossy().into_owned());

    let artifact = service
        .export_artifact(&html, stem.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Export failed ({}): {}", e.kind().as_str(), e))?;

    println!("Document exported: {}", artifact.name);
    println!("  size:  {} bytes", artifact.size);
    if let Some(out) = out {
        std::fs::copy(&artifact.path, out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        println!("  copied to {}", out.display());
    }
    Ok(())
}

/// Print the editor HTML for a docx file.
pub fn run_import(config: &Config, docx_path: &Path) -> Result<()> {
    let data = std::fs::read(docx_path)
        .with_context(|| format!("Failed to read {}", docx_path.display()))?;
    let service = GenerationService::from_config(config)?;
    let html = service
        .import_html(&data)
        .map_err(|e| anyhow::anyhow!("Import failed: {}", e))?;
    println!("{}", html);
    Ok(())
}

/// Rewrite an HTML file with an instruction and print the result.
pub async fn run_refine(config: &Config, html_path: &Path, instruction: &str) -> Result<()> {
    let content = std::fs::read_to_string(html_path)
        .with_context(|| format!("Failed to read {}", html_path.display()))?;
    let service = GenerationService::from_config(config)?;
    let revised = service
        .refine_content(&content, instruction)
        .await
        .map_err(|e| anyhow::anyhow!("Refine failed ({}): {}", e.kind().as_str(), e))?;
    println!("{}", revised);
    Ok(())
}

pub async fn run_cleanup(config: &Config, max_age_hours: Option<u64>) -> Result<()> {
    let service = GenerationService::from_config(config)?;
    let result = service.cleanup(max_age_hours).await?;
    println!("{}", result.message);
    Ok(())
}

/// List stored artifacts, newest first.
pub async fn run_artifacts(config: &Config) -> Result<()> {
    let service = GenerationService::from_config(config)?;
    let artifacts = service.list().await?;

    if artifacts.is_empty() {
        println!("No artifacts in {}", service.store().dir().display());
        return Ok(());
    }

    println!("{:<56} {:>10}  MODIFIED", "NAME", "BYTES");
    for a in &artifacts {
        println!(
            "{:<56} {:>10}  {}",
            a.name,
            a.size,
            a.modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} artifact(s)", artifacts.len());
    Ok(())
}

/// Write the example configuration to `path`. Refuses to overwrite.
pub fn init_config(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}
