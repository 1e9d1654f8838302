//! The worker loop every worker process runs on its own stdio

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{HandlerError, IpcError};
use crate::protocol::{Capabilities, JsonMap, Response, ResponseBody};

/// The closed set of calls a worker accepts.
///
/// Implemented by an enum deserialized from `{"method": ..., "params": ...}`,
/// i.e. `#[serde(tag = "method", content = "params")]`. `NAMES` lists every
/// method tag; it is what the worker announces at startup.
pub trait WorkerMethod: DeserializeOwned + Send {
    const NAMES: &'static [&'static str];
}

/// Business logic plugged into the worker loop.
///
/// Long-lived state lives in the service value and reaches each call through
/// `&mut self`.
#[async_trait]
pub trait WorkerService: Send {
    type Method: WorkerMethod;

    /// Identity reported in the capability announcement
    fn name(&self) -> &str;

    /// Handle one decoded call, returning the result fields
    async fn handle(&mut self, call: Self::Method) -> Result<JsonMap, HandlerError>;
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Lines that produced a response
    pub handled: u64,
    /// Responses that carried an error
    pub failed: u64,
}

/// Announce capabilities, then answer requests from `reader` on `writer`
/// until end of input.
///
/// Malformed lines and failing or panicking handlers are answered with an
/// error and never end the loop. A write failure does.
pub async fn run_worker<S, R, W>(
    service: &mut S,
    mut reader: R,
    mut writer: W,
) -> Result<WorkerStats, IpcError>
where
    S: WorkerService,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let announcement = Capabilities {
        capabilities: S::Method::NAMES.iter().map(|m| m.to_string()).collect(),
        name: service.name().to_string(),
    };
    write_line(&mut writer, &announcement).await?;
    debug!(worker = %announcement.name, "Capabilities announced");

    let mut stats = WorkerStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        stats.handled += 1;

        let message: JsonValue = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(worker = %service.name(), error = %e, "Discarding malformed request line");
                stats.failed += 1;
                write_line(&mut writer, &json!({ "error": "invalid json" })).await?;
                continue;
            }
        };

        let id = message.get("id").cloned().unwrap_or(JsonValue::Null);
        let body = dispatch(service, &message).await;
        if !body.is_success() {
            stats.failed += 1;
        }

        write_line(&mut writer, &Response { id, response: body }).await?;
    }

    info!(
        worker = %service.name(),
        handled = stats.handled,
        failed = stats.failed,
        "Input closed, worker loop finished"
    );
    Ok(stats)
}

/// Run `service` on the process's own stdin and stdout
pub async fn serve_stdio<S: WorkerService>(mut service: S) -> Result<WorkerStats, IpcError> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run_worker(&mut service, stdin, stdout).await
}

async fn dispatch<S: WorkerService>(service: &mut S, message: &JsonValue) -> ResponseBody {
    let method = match message.get("method") {
        Some(JsonValue::String(method)) => method.as_str(),
        Some(other) => {
            return ResponseBody::failure(
                format!("invalid request: method must be a string, got {}", other),
                None,
            )
        }
        None => return ResponseBody::failure("invalid request: missing method", None),
    };

    if !S::Method::NAMES.iter().any(|name| *name == method) {
        return ResponseBody::failure(format!("unknown method {}", method), None);
    }

    let params = match message.get("params") {
        None | Some(JsonValue::Null) => json!({}),
        Some(params) => params.clone(),
    };

    let call: S::Method = match serde_json::from_value(json!({ "method": method, "params": params }))
    {
        Ok(call) => call,
        Err(e) => {
            return ResponseBody::failure(
                format!("invalid params for {}: {}", method, e),
                Some(format!("{}.{} rejected params {}", service.name(), method, params)),
            )
        }
    };

    debug!(worker = %service.name(), method, "Dispatching request");

    let outcome = AssertUnwindSafe(service.handle(call)).catch_unwind().await;
    match outcome {
        Ok(Ok(fields)) => ResponseBody::success(fields),
        Ok(Err(e)) => {
            warn!(worker = %service.name(), method, error = %e, "Handler failed");
            ResponseBody::failure(
                e.to_string(),
                Some(format!("{}.{}: {:?}", service.name(), method, e)),
            )
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            warn!(worker = %service.name(), method, reason = %reason, "Handler panicked");
            ResponseBody::failure(
                format!("{} failed: {}", method, reason),
                Some(format!("{}.{} panicked: {}", service.name(), method, reason)),
            )
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
