//! Core of the OpenProse host plugin.
//!
//! OpenProse programs are markdown files an agent executes by reading them.
//! This crate does not interpret them. It assembles the text the agent needs
//! (reference documents, program source, instructions), keeps an anonymous
//! per-install identity in `<project>/.prose/state.json`, and reports usage
//! events on a best-effort basis.
//!
//! [`ToolDispatcher`] is the entry point: it serves `prose_boot`, `prose_run`
//! and `prose_compile`, each of which always completes with a string.

pub mod config;
pub mod dispatch;
pub mod documents;
pub mod error;
pub mod identity;
pub mod prompts;
pub mod telemetry;

pub use config::ProseConfig;
pub use dispatch::{ToolDispatcher, ToolInvocation, ToolName};
pub use documents::{Document, DocumentLoader};
pub use error::{ConfigError, StateError};
pub use identity::{IdentityState, IdentityStore, StateLoad, TelemetrySetting};
pub use telemetry::{HttpSink, RecordingSink, TelemetryEmitter, TelemetryEvent, TelemetrySink};
