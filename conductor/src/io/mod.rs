//! I/O adapters for conductor commands.

pub mod agent;
pub mod checklist_sync;
pub mod config;
pub mod init;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod registry;
pub mod state_store;
