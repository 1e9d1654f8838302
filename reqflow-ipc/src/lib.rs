//! Inter-process communication for reqflow
//!
//! This crate provides the wire protocol shared by the orchestrator and its
//! worker processes, the [`ProcessChannel`] the orchestrator uses to drive one
//! child process, and the [`run_worker`] loop every worker process runs on its
//! own stdio.

pub mod channel;
pub mod error;
pub mod protocol;
pub mod worker;

// Re-export commonly used types
pub use channel::{ExitOutcome, ProcessChannel, WorkerExit};
pub use error::{HandlerError, IpcError};
pub use protocol::{decode_line, Capabilities, Inbound, JsonMap, Request, Response, ResponseBody};
pub use worker::{run_worker, serve_stdio, WorkerMethod, WorkerService, WorkerStats};
