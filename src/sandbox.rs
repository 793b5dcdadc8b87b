//! Bounded execution of generated Lua scripts.
//!
//! A script runs in a fresh VM from [`crate::lua_runtime`] on a blocking
//! thread. Three ceilings apply to every run:
//!
//! - **time**: an instruction hook aborts the VM once the deadline passes;
//! - **memory**: `Lua::set_memory_limit` caps the VM heap;
//! - **document size**: the `docx` adapter charges every block, run and cell
//!   against one byte budget shared by all document handles in the VM.
//!
//! The script never writes to disk. `doc:save(output_path)` renders the
//! document into an [`OutputSink`]; persisting the bytes is the caller's job.

use mlua::prelude::*;
use mlua::{HookTriggers, VmState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::SandboxConfig;
use crate::lua_runtime::{new_sandboxed_vm, register_host_apis, OutputSink};

/// How often (in VM instructions) the deadline hook fires.
const HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub memory_limit_bytes: usize,
    pub max_document_bytes: usize,
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            memory_limit_bytes: config.memory_limit_bytes,
            max_document_bytes: config.max_document_bytes,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("script exceeded the {}s execution limit", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("script exceeded the {0}-byte memory limit")]
    Memory(usize),
    #[error("sandbox setup failed: {0}")]
    Setup(String),
    #[error("execution task failed: {0}")]
    Aborted(String),
}

/// What a finished script left behind.
#[derive(Debug)]
pub struct ExecutionOutput {
    /// Rendered document, present only if the script called `save`.
    pub document: Option<Vec<u8>>,
    pub elapsed: Duration,
}

/// Execute `code` on a blocking thread with the given limits.
pub async fn execute(
    code: String,
    output_path: String,
    limits: SandboxLimits,
) -> Result<ExecutionOutput, ExecutionError> {
    tokio::task::spawn_blocking(move || run_script("generated", &code, &output_path, &limits))
        .await
        .map_err(|e| ExecutionError::Aborted(e.to_string()))?
}

/// Execute `code` synchronously. `script_name` labels log output and
/// error locations.
pub fn run_script(
    script_name: &str,
    code: &str,
    output_path: &str,
    limits: &SandboxLimits,
) -> Result<ExecutionOutput, ExecutionError> {
    let started = Instant::now();
    let lua = new_sandboxed_vm().map_err(|e| ExecutionError::Setup(e.to_string()))?;

    lua.set_memory_limit(limits.memory_limit_bytes)
        .map_err(|e| ExecutionError::Setup(e.to_string()))?;

    let timed_out = Arc::new(AtomicBool::new(false));
    let deadline = started + limits.timeout;
    let flag = timed_out.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() > deadline {
                flag.store(true, Ordering::SeqCst);
                Err(LuaError::RuntimeError("execution deadline exceeded".to_string()))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    let sink = OutputSink::new();
    register_host_apis(
        &lua,
        script_name,
        output_path,
        limits.max_document_bytes,
        sink.clone(),
    )
    .map_err(|e| ExecutionError::Setup(e.to_string()))?;

    let result = lua.load(code).set_name(script_name).exec();

    if let Err(err) = result {
        return Err(classify(err, timed_out.load(Ordering::SeqCst), limits));
    }

    Ok(ExecutionOutput {
        document: sink.take(),
        elapsed: started.elapsed(),
    })
}

fn classify(err: LuaError, timed_out: bool, limits: &SandboxLimits) -> ExecutionError {
    if timed_out {
        return ExecutionError::Timeout(limits.timeout);
    }
    match root_cause(&err) {
        LuaError::SyntaxError { message, .. } => ExecutionError::Syntax(message.clone()),
        LuaError::MemoryError(_) => ExecutionError::Memory(limits.memory_limit_bytes),
        _ => ExecutionError::Runtime(err.to_string()),
    }
}

/// Unwrap callback wrappers to the error that started the unwind.
fn root_cause(err: &LuaError) -> &LuaError {
    match err {
        LuaError::CallbackError { cause, .. } => root_cause(cause),
        other => other,
    }
}
