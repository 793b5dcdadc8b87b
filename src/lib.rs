//! # docforge
//!
//! Turns natural-language prompts into Word (`.docx`) documents.
//!
//! A language model (the oracle) is asked for a small Lua program that
//! builds the document through a host `docx` API. The program runs in a
//! sandboxed VM with time and memory limits, and the document it saves is
//! written to a local File Store for download. The same store backs an
//! editor flow that converts between HTML and docx.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌─────────┐   ┌────────────┐
//! │  prompt  │──▶│  oracle  │──▶│ codeblock │──▶│ sandbox │──▶│ File Store │
//! │ (+file)  │   │ (LLM)    │   │ extract   │   │ (Lua)   │   │  (.docx)   │
//! └──────────┘   └──────────┘   └───────────┘   └─────────┘   └─────┬──────┘
//!                                                                   │
//!                                   ┌───────────────────────────────┤
//!                                   ▼                               ▼
//!                              ┌──────────┐                   ┌──────────┐
//!                              │   CLI    │                   │   HTTP   │
//!                              └──────────┘                   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Request and result types |
//! | [`oracle`] | Language-model providers |
//! | [`codeblock`] | Code extraction from model replies |
//! | [`sandbox`] | Time- and memory-limited script execution |
//! | [`lua_runtime`] | Sandboxed Lua VM and the host `docx` API |
//! | [`docx`] | Document model and OOXML writer |
//! | [`html`] | HTML ↔ docx conversion |
//! | [`extract`] | Attachment text extraction |
//! | [`store`] | File Store for generated documents |
//! | [`service`] | The generation pipeline and editor operations |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |

pub mod codeblock;
pub mod commands;
pub mod config;
pub mod docx;
pub mod extract;
pub mod html;
pub mod lua_runtime;
pub mod models;
pub mod oracle;
pub mod sandbox;
pub mod server;
pub mod service;
pub mod store;
