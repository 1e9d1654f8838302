//! The worker processes launched for one run

use futures::future::join_all;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use reqflow_config::{WorkerCommand, WorkerKind};
use reqflow_ipc::{Capabilities, Inbound, IpcError, ProcessChannel, Request, Response, WorkerExit};

use crate::error::PipelineError;

/// A launched worker and, once it has announced itself, what it offers
pub struct WorkerHandle {
    pub kind: WorkerKind,
    pub channel: ProcessChannel,
    pub capabilities: Option<Capabilities>,
}

/// Every worker launched for a run, in launch order
#[derive(Default)]
pub struct WorkerSet {
    workers: Vec<WorkerHandle>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn launch(
        &mut self,
        kind: WorkerKind,
        command: &WorkerCommand,
        shutdown_grace: Duration,
    ) -> Result<(), PipelineError> {
        let channel = ProcessChannel::spawn(kind.as_str(), build_command(command), shutdown_grace)
            .map_err(|source| PipelineError::Launch {
                worker: kind,
                source,
            })?;
        info!(worker = %kind, pid = ?channel.pid(), program = %command.program.display(), "Worker launched");

        self.workers.push(WorkerHandle {
            kind,
            channel,
            capabilities: None,
        });
        Ok(())
    }

    /// Read each worker's capability announcement, in launch order
    pub async fn handshake(&mut self, startup_timeout: Duration) -> Result<(), PipelineError> {
        for handle in &mut self.workers {
            let capabilities = read_announcement(handle, startup_timeout).await?;
            debug!(
                worker = %handle.kind,
                name = %capabilities.name,
                methods = ?capabilities.capabilities,
                "Worker ready"
            );
            handle.capabilities = Some(capabilities);
        }
        Ok(())
    }

    /// Whether `kind` announced `method`; unknown before the handshake
    pub fn announced(&self, kind: WorkerKind, method: &str) -> Option<bool> {
        self.get(kind)?
            .capabilities
            .as_ref()
            .map(|capabilities| capabilities.supports(method))
    }

    /// One correlated request to the worker of `kind`
    pub async fn call(
        &mut self,
        kind: WorkerKind,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<Response>, IpcError> {
        let handle = self
            .workers
            .iter_mut()
            .find(|handle| handle.kind == kind)
            .ok_or(IpcError::ConnectionClosed)?;
        handle.channel.call(request, timeout).await
    }

    /// Terminate every worker concurrently; each one exactly once
    pub async fn terminate_all(&mut self) -> Vec<WorkerExit> {
        let exits = join_all(
            self.workers
                .iter_mut()
                .map(|handle| handle.channel.terminate()),
        )
        .await;

        for exit in &exits {
            debug!(worker = %exit.worker, pid = ?exit.pid, outcome = ?exit.outcome, "Worker stopped");
        }
        exits
    }

    fn get(&self, kind: WorkerKind) -> Option<&WorkerHandle> {
        self.workers.iter().find(|handle| handle.kind == kind)
    }
}

fn build_command(worker: &WorkerCommand) -> Command {
    let mut command = Command::new(&worker.program);
    command.args(&worker.args).envs(&worker.env);
    if let Some(dir) = &worker.working_dir {
        command.current_dir(dir);
    }
    command
}

async fn read_announcement(
    handle: &mut WorkerHandle,
    startup_timeout: Duration,
) -> Result<Capabilities, PipelineError> {
    let worker = handle.kind;
    let startup = |reason: String, source: Option<IpcError>| PipelineError::Startup {
        worker,
        reason,
        source,
    };

    match handle.channel.recv(startup_timeout).await {
        Ok(Some(Inbound::Message(value))) => serde_json::from_value(value.clone()).map_err(|e| {
            warn!(worker = %worker, announcement = %value, "Malformed capability announcement");
            startup(format!("malformed capability announcement ({})", e), None)
        }),
        Ok(Some(Inbound::Unparsed { raw })) => {
            Err(startup(format!("announcement is not JSON: {}", raw), None))
        }
        Ok(None) => Err(startup(
            format!("no capability announcement within {:?}", startup_timeout),
            None,
        )),
        Err(e) => Err(startup("exited before announcing capabilities".to_string(), Some(e))),
    }
}
