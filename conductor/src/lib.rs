//! Resumable workflow engine that hands units of work to a remote coding agent.
//!
//! Each unit (a checklist task, a feature, or a polish phase) is launched as a
//! remote session from the current lineage branch, monitored until it
//! finishes, judged by a verification oracle, and retried with feedback on the
//! same session until it passes or exhausts its retry budget. Every transition
//! is persisted, so an interrupted run resumes without relaunching work.
//!
//! - **[`core`]**: Pure, deterministic logic (state, transitions, checklist parsing).
//!   No I/O.
//! - **[`io`]**: Side-effecting adapters (state file, config, HTTP clients,
//!   processes, prompts, registry). Ports are traits so tests can script them.
//!
//! [`engine`], [`monitor`] and [`looping`] compose the two into CLI commands.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod monitor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
