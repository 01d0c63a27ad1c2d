//! # xcat-core
//!
//! Core types for the Xcatcher client.
//!
//! - `ToolCallResult` / `ErrorInfo`: canonical view of a tool response
//! - `TaskId`, `IdempotencyKey`, `Network`: typed handles used across a run
//! - `XcatError`: error taxonomy with one process exit code per condition
//! - `XcatConfig`: explicit configuration handed to the orchestrator

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{PollingConfig, XcatConfig};
pub use error::{HandshakeFailure, Result, XcatError};
pub use types::*;
