//! Lua 5.4 VM setup for generated document scripts.
//!
//! Builds the restricted environment that [`crate::sandbox`] executes
//! untrusted code in. Only the pure standard libraries (`string`, `table`,
//! `math`, `utf8`) are loaded; the host exposes exactly two capabilities on
//! top of them:
//!
//! | Global | Purpose |
//! |--------|---------|
//! | `docx` | Document adapter: `docx.new(opts?)` returns a document handle |
//! | `output_path` | The only path `doc:save()` accepts |
//!
//! `log.info/warn/error/debug` and `print` are forwarded to `tracing` so
//! scripts stay debuggable without any I/O of their own.
//!
//! # Document handle
//!
//! ```lua
//! local doc = docx.new({ title = "Letter" })
//! doc:title("Dear Sam")
//! doc:heading("Greeting", 1)
//! doc:paragraph("Hello there.", { italic = true, align = "justify" })
//! doc:paragraph({ { text = "Bold ", bold = true }, { text = "then plain" } })
//! doc:bullet("an item")
//! doc:numbered("a step", 1)
//! doc:table({ { "Name", "Role" }, { "Ada", "Engineer" } }, { header = true })
//! doc:page_break()
//! doc:save(output_path)
//! ```

use mlua::prelude::*;
use mlua::{LuaOptions, StdLib};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::docx::{
    block_footprint, Alignment, Block, Document, Run, RunStyle, BLOCK_OVERHEAD,
};

/// Upper bound on blocks across every document handle in one VM.
pub const MAX_BLOCKS: usize = 100_000;

/// Receives the rendered document when a script calls `doc:save()`.
///
/// Shared between the VM (through every document handle) and the caller,
/// which reads it back after the script finishes.
#[derive(Clone, Default)]
pub struct OutputSink {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, bytes: Vec<u8>) -> LuaResult<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| LuaError::external("output sink poisoned"))?;
        *slot = Some(bytes);
        Ok(())
    }

    /// Take the saved bytes, if the script saved anything.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Create a VM with only the pure standard libraries loaded.
pub(crate) fn new_sandboxed_vm() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::new(),
    )?;
    sandbox_globals(&lua)?;
    Ok(lua)
}

/// Remove base-library functions that can load code or touch the host.
pub(crate) fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in [
        "load",
        "loadfile",
        "dofile",
        "require",
        "collectgarbage",
        "os",
        "io",
        "debug",
        "package",
    ] {
        globals.set(name, LuaValue::Nil)?;
    }
    if let Ok(string) = globals.get::<LuaTable>("string") {
        string.set("dump", LuaValue::Nil)?;
    }
    Ok(())
}

/// Register `docx`, `output_path`, `log` and `print` on a sandboxed VM.
pub(crate) fn register_host_apis(
    lua: &Lua,
    script_name: &str,
    output_path: &str,
    max_document_bytes: usize,
    sink: OutputSink,
) -> LuaResult<()> {
    lua.globals().set("output_path", output_path)?;
    register_docx_api(lua, output_path, max_document_bytes, sink)?;
    register_log_api(lua, script_name)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: docx
// ═══════════════════════════════════════════════════════════════════════

/// Content budget shared by every document handle created in one VM.
///
/// Document contents live in Rust memory, outside the Lua heap limit, so
/// each handle charges this budget before it grows.
#[derive(Clone)]
struct ContentBudget {
    used: Arc<AtomicUsize>,
    blocks: Arc<AtomicUsize>,
    limit: usize,
}

impl ContentBudget {
    fn new(limit: usize) -> Self {
        Self {
            used: Arc::new(AtomicUsize::new(0)),
            blocks: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    fn charge(&self, bytes: usize, blocks: usize) -> LuaResult<()> {
        let limit = self.limit;
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map_err(|_| {
                LuaError::external(format!(
                    "document exceeds the {}-byte content limit",
                    limit
                ))
            })?;
        let counted = self
            .blocks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_add(blocks).filter(|&total| total <= MAX_BLOCKS)
            });
        if counted.is_err() {
            self.used.fetch_sub(bytes, Ordering::SeqCst);
            return Err(LuaError::external(format!(
                "document exceeds the {}-block limit",
                MAX_BLOCKS
            )));
        }
        Ok(())
    }

    fn refund(&self, bytes: usize, blocks: usize) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
        self.blocks.fetch_sub(blocks, Ordering::SeqCst);
    }
}

fn register_docx_api(
    lua: &Lua,
    output_path: &str,
    max_document_bytes: usize,
    sink: OutputSink,
) -> LuaResult<()> {
    let docx = lua.create_table()?;
    let output_path = output_path.to_string();
    let budget = ContentBudget::new(max_document_bytes);

    docx.set(
        "new",
        lua.create_function(move |_lua, opts: Option<LuaTable>| {
            let mut doc = Document::new();
            if let Some(opts) = opts {
                doc.title = opts.get::<Option<String>>("title")?;
                doc.author = opts.get::<Option<String>>("author")?;
            }
            let metadata = doc.title.as_ref().map_or(0, String::len)
                + doc.author.as_ref().map_or(0, String::len);
            budget.charge(BLOCK_OVERHEAD + metadata, 0)?;
            Ok(DocHandle {
                doc,
                output_path: output_path.clone(),
                budget: budget.clone(),
                sink: sink.clone(),
            })
        })?,
    )?;

    lua.globals().set("docx", docx)?;
    Ok(())
}

/// Lua userdata wrapping a [`Document`] under construction.
struct DocHandle {
    doc: Document,
    output_path: String,
    budget: ContentBudget,
    sink: OutputSink,
}

impl DocHandle {
    /// Charge the shared budget, then append. Rejected blocks are refunded.
    fn append(&mut self, block: Block) -> LuaResult<()> {
        let cost = block_footprint(&block);
        self.budget.charge(cost, 1)?;
        if let Err(e) = self.doc.add(block) {
            self.budget.refund(cost, 1);
            return Err(LuaError::external(e));
        }
        Ok(())
    }
}

impl LuaUserData for DocHandle {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("title", |_, this, text: String| {
            this.append(Block::Heading {
                level: 0,
                runs: vec![Run::plain(text)],
            })
        });

        methods.add_method_mut(
            "heading",
            |_, this, (text, level): (String, Option<u8>)| {
                this.append(Block::Heading {
                    level: level.unwrap_or(1),
                    runs: vec![Run::plain(text)],
                })
            },
        );

        methods.add_method_mut(
            "paragraph",
            |_, this, (content, opts): (LuaValue, Option<LuaTable>)| {
                let base = parse_style(opts.as_ref())?;
                let runs = parse_runs(content, &base)?;
                let align = parse_alignment(opts.as_ref())?;
                this.append(Block::Paragraph { runs, align })
            },
        );

        methods.add_method_mut(
            "bullet",
            |_, this, (content, level, opts): (LuaValue, Option<u8>, Option<LuaTable>)| {
                let runs = parse_runs(content, &parse_style(opts.as_ref())?)?;
                this.append(Block::ListItem {
                    runs,
                    ordered: false,
                    level: level.unwrap_or(0),
                })
            },
        );

        methods.add_method_mut(
            "numbered",
            |_, this, (content, level, opts): (LuaValue, Option<u8>, Option<LuaTable>)| {
                let runs = parse_runs(content, &parse_style(opts.as_ref())?)?;
                this.append(Block::ListItem {
                    runs,
                    ordered: true,
                    level: level.unwrap_or(0),
                })
            },
        );

        methods.add_method_mut(
            "table",
            |_, this, (rows, opts): (Vec<Vec<String>>, Option<LuaTable>)| {
                let header = match opts {
                    Some(o) => o.get::<Option<bool>>("header")?.unwrap_or(false),
                    None => false,
                };
                this.append(Block::Table { rows, header })
            },
        );

        methods.add_method_mut("page_break", |_, this, ()| this.append(Block::PageBreak));

        methods.add_method("save", |_, this, path: Option<String>| {
            if let Some(path) = path {
                if path != this.output_path {
                    return Err(LuaError::external(format!(
                        "save() only accepts output_path, got '{}'",
                        path
                    )));
                }
            }
            let bytes = this.doc.to_bytes().map_err(LuaError::external)?;
            this.sink.store(bytes)
        });
    }
}

/// Accept either a plain string or an array of run specs
/// (`"text"` or `{ text = "...", bold = true, ... }`).
fn parse_runs(content: LuaValue, base: &RunStyle) -> LuaResult<Vec<Run>> {
    match content {
        LuaValue::String(s) => Ok(vec![Run::styled(s.to_str()?.to_string(), base.clone())]),
        LuaValue::Integer(i) => Ok(vec![Run::styled(i.to_string(), base.clone())]),
        LuaValue::Number(n) => Ok(vec![Run::styled(n.to_string(), base.clone())]),
        LuaValue::Table(items) => {
            let mut runs = Vec::new();
            for item in items.sequence_values::<LuaValue>() {
                match item? {
                    LuaValue::String(s) => {
                        runs.push(Run::styled(s.to_str()?.to_string(), base.clone()))
                    }
                    LuaValue::Table(spec) => {
                        let text: String = spec.get("text")?;
                        let style = merge_style(base, &spec)?;
                        runs.push(Run::styled(text, style));
                    }
                    other => {
                        return Err(LuaError::external(format!(
                            "run must be a string or table, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(runs)
        }
        other => Err(LuaError::external(format!(
            "expected text or a list of runs, got {}",
            other.type_name()
        ))),
    }
}

fn parse_style(opts: Option<&LuaTable>) -> LuaResult<RunStyle> {
    match opts {
        Some(opts) => merge_style(&RunStyle::default(), opts),
        None => Ok(RunStyle::default()),
    }
}

fn merge_style(base: &RunStyle, spec: &LuaTable) -> LuaResult<RunStyle> {
    let style = RunStyle {
        bold: spec.get::<Option<bool>>("bold")?.unwrap_or(base.bold),
        italic: spec.get::<Option<bool>>("italic")?.unwrap_or(base.italic),
        underline: spec
            .get::<Option<bool>>("underline")?
            .unwrap_or(base.underline),
        size_pt: spec.get::<Option<f32>>("size")?.or(base.size_pt),
        color: spec.get::<Option<String>>("color")?.or(base.color.clone()),
        font: spec.get::<Option<String>>("font")?.or(base.font.clone()),
    };
    style.validated().map_err(LuaError::external)
}

fn parse_alignment(opts: Option<&LuaTable>) -> LuaResult<Alignment> {
    let Some(opts) = opts else {
        return Ok(Alignment::Left);
    };
    match opts.get::<Option<String>>("align")? {
        Some(a) => Alignment::parse(&a).map_err(LuaError::external),
        None => Ok(Alignment::Left),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: log
// ═══════════════════════════════════════════════════════════════════════

fn register_log_api(lua: &Lua, script_name: &str) -> LuaResult<()> {
    let log = lua.create_table()?;

    let n = script_name.to_string();
    log.set(
        "info",
        lua.create_function(move |_lua, msg: String| {
            tracing::info!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    let n = script_name.to_string();
    log.set(
        "warn",
        lua.create_function(move |_lua, msg: String| {
            tracing::warn!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    let n = script_name.to_string();
    log.set(
        "error",
        lua.create_function(move |_lua, msg: String| {
            tracing::error!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    let n = script_name.to_string();
    log.set(
        "debug",
        lua.create_function(move |_lua, msg: String| {
            tracing::debug!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;

    let n = script_name.to_string();
    lua.globals().set(
        "print",
        lua.create_function(move |_lua, args: LuaMultiValue| {
            let line = args
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join("\t");
            tracing::debug!(script = %n, "{}", line);
            Ok(())
        })?,
    )?;

    Ok(())
}

fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}
