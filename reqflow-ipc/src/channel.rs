//! Process channel: one child process driven over its stdio pipes

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::IpcError;
use crate::protocol::{decode_line, Inbound, Request, Response};

/// How a terminated worker went away
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Exited on its own within the grace period
    Exited(Option<i32>),
    /// Still running after the grace period and force-killed
    Killed,
    /// `terminate` had already run for this channel
    AlreadyTerminated,
}

/// Result of terminating one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerExit {
    pub worker: String,
    pub pid: Option<u32>,
    pub outcome: ExitOutcome,
}

/// Owns one child process and its pipes.
///
/// A background task drains stdout line by line into an unbounded FIFO, so
/// `recv` never blocks the child and a message that arrives after a timed-out
/// `recv` is returned by the next one.
pub struct ProcessChannel {
    name: String,
    pid: Option<u32>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    reader: Option<JoinHandle<()>>,
    stderr_forwarder: Option<JoinHandle<()>>,
    outstanding: Option<JsonValue>,
    shutdown_grace: Duration,
}

impl ProcessChannel {
    /// Start `command` with piped stdio and begin draining its output
    pub fn spawn(
        name: impl Into<String>,
        mut command: Command,
        shutdown_grace: Duration,
    ) -> Result<Self, IpcError> {
        let name = name.into();
        debug!(worker = %name, "Spawning worker process");

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| IpcError::Spawn {
            worker: name.clone(),
            source,
        })?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe(&name, "stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe(&name, "stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe(&name, "stderr"))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(stdout_reader_task(name.clone(), stdout, inbound_tx));
        let stderr_forwarder = tokio::spawn(stderr_forwarder_task(name.clone(), stderr));

        debug!(worker = %name, pid = ?pid, "Worker process started");

        Ok(Self {
            name,
            pid,
            child: Some(child),
            stdin: Some(stdin),
            inbound_rx,
            reader: Some(reader),
            stderr_forwarder: Some(stderr_forwarder),
            outstanding: None,
            shutdown_grace,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_terminated(&self) -> bool {
        self.child.is_none()
    }

    /// Write `message` as one JSON line and flush
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<(), IpcError> {
        let stdin = self.stdin.as_mut().ok_or(IpcError::ConnectionClosed)?;

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        stdin.write_all(&line).await.map_err(IpcError::from_pipe)?;
        stdin.flush().await.map_err(IpcError::from_pipe)?;
        Ok(())
    }

    /// Next buffered line, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time. Once stdout has closed and the
    /// buffer is drained this fails with `ConnectionClosed`.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<Inbound>, IpcError> {
        match tokio::time::timeout(timeout, self.inbound_rx.recv()).await {
            Ok(Some(inbound)) => Ok(Some(inbound)),
            Ok(None) => Err(IpcError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    /// Send `request` and wait for its response.
    ///
    /// Only one request may be outstanding at a time. On timeout this returns
    /// `Ok(None)` and the request stays outstanding; [`Self::await_response`]
    /// can keep waiting for it.
    pub async fn call(
        &mut self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<Response>, IpcError> {
        if let Some(id) = &self.outstanding {
            return Err(IpcError::RequestOutstanding(id.clone()));
        }

        self.send(request).await?;
        self.outstanding = Some(request.id.clone());
        self.await_response(timeout).await
    }

    /// Wait for the response to the outstanding request
    pub async fn await_response(&mut self, timeout: Duration) -> Result<Option<Response>, IpcError> {
        let expected = self.outstanding.clone().ok_or_else(|| {
            IpcError::InvalidMessage(format!("no request outstanding on {}", self.name))
        })?;

        let value = match self.recv(timeout).await? {
            None => return Ok(None),
            Some(Inbound::Unparsed { raw }) => {
                self.outstanding = None;
                return Err(IpcError::InvalidMessage(format!(
                    "{} wrote a non-JSON line: {}",
                    self.name, raw
                )));
            }
            Some(Inbound::Message(value)) => value,
        };
        self.outstanding = None;

        let response: Response = serde_json::from_value(value.clone()).map_err(|e| {
            IpcError::InvalidMessage(format!("{} wrote {} ({})", self.name, value, e))
        })?;

        if response.id != expected {
            return Err(IpcError::CorrelationMismatch {
                expected,
                actual: response.id,
            });
        }

        Ok(Some(response))
    }

    /// Stop the child: close stdin, wait up to the grace period, then kill.
    ///
    /// Never fails and may be called any number of times.
    pub async fn terminate(&mut self) -> WorkerExit {
        let outcome = match self.child.take() {
            None => ExitOutcome::AlreadyTerminated,
            Some(mut child) => {
                // Closing stdin is the shutdown signal for a worker loop
                self.stdin = None;

                match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(worker = %self.name, ?status, "Worker exited");
                        ExitOutcome::Exited(status.code())
                    }
                    Ok(Err(e)) => {
                        warn!(worker = %self.name, error = %e, "Waiting for worker failed, killing");
                        kill(&self.name, &mut child).await
                    }
                    Err(_) => {
                        debug!(
                            worker = %self.name,
                            grace = ?self.shutdown_grace,
                            "Worker did not exit within grace period, killing"
                        );
                        kill(&self.name, &mut child).await
                    }
                }
            }
        };

        // A grandchild can hold the pipes open after the child is gone
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(forwarder) = self.stderr_forwarder.take() {
            forwarder.abort();
        }

        WorkerExit {
            worker: self.name.clone(),
            pid: self.pid,
            outcome,
        }
    }
}

async fn kill(name: &str, child: &mut Child) -> ExitOutcome {
    if let Err(e) = child.kill().await {
        warn!(worker = %name, error = %e, "Failed to kill worker process");
    }
    ExitOutcome::Killed
}

fn missing_pipe(name: &str, pipe: &str) -> IpcError {
    IpcError::Spawn {
        worker: name.to_string(),
        source: std::io::Error::other(format!("{} was not captured", pipe)),
    }
}

async fn stdout_reader_task(
    name: String,
    stdout: ChildStdout,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!(worker = %name, "Worker stdout closed");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if inbound_tx.send(decode_line(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(worker = %name, error = %e, "Failed to read worker stdout");
                break;
            }
        }
    }
}

/// Re-emit child stderr as debug events.
///
/// Keeps draining until EOF so the child never writes into a closed pipe.
async fn stderr_forwarder_task(name: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(worker = %name, "{}", line);
                }
            }
            Err(e) => {
                debug!(worker = %name, error = %e, "Failed to read worker stderr");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::protocol::ResponseBody;
    use serde_json::json;

    const GRACE: Duration = Duration::from_millis(500);
    const WAIT: Duration = Duration::from_secs(5);

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_request_id_round_trips_through_echo() {
        let mut channel = ProcessChannel::spawn("echo", Command::new("cat"), GRACE).unwrap();
        assert!(channel.pid().is_some());

        for id in [json!(1), json!("req-2"), json!({"run": 3})] {
            let request = Request::new(id.clone(), "ping", json!({}));
            channel.send(&request).await.unwrap();

            match channel.recv(WAIT).await.unwrap() {
                Some(Inbound::Message(value)) => assert_eq!(value["id"], id),
                other => panic!("expected a message, got {:?}", other),
            }
        }

        let exit = channel.terminate().await;
        assert_eq!(exit.outcome, ExitOutcome::Exited(Some(0)));
    }

    #[tokio::test]
    async fn test_call_checks_response_id() {
        let script = r#"while read line; do echo '{"id":7,"response":{"ok":true,"pong":true}}'; done"#;
        let mut channel = ProcessChannel::spawn("fixed", sh(script), GRACE).unwrap();

        let response = channel
            .call(&Request::new(7, "ping", json!({})), WAIT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.id, json!(7));
        assert!(matches!(response.response, ResponseBody::Success(ref f) if f["pong"] == json!(true)));

        let err = channel
            .call(&Request::new(8, "ping", json!({})), WAIT)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::CorrelationMismatch { .. }));

        channel.terminate().await;
    }

    #[tokio::test]
    async fn test_non_utf8_stderr_does_not_break_worker() {
        let script = r#"printf '\377\376 bad\n' >&2
read line
sleep 0.2
echo 'still logging' >&2
echo '{"id":1,"response":{"ok":true}}'
cat > /dev/null"#;
        let mut channel = ProcessChannel::spawn("noisy", sh(script), GRACE).unwrap();

        let response = channel
            .call(&Request::new(1, "ping", json!({})), WAIT)
            .await
            .unwrap()
            .unwrap();
        assert!(response.response.is_success());

        let exit = channel.terminate().await;
        assert_eq!(exit.outcome, ExitOutcome::Exited(Some(0)));
    }

    #[tokio::test]
    async fn test_second_call_refused_while_outstanding() {
        let script = r#"read line; sleep 0.3; echo '{"id":1,"response":{"ok":true}}'; cat > /dev/null"#;
        let mut channel = ProcessChannel::spawn("slow", sh(script), GRACE).unwrap();

        let first = channel
            .call(&Request::new(1, "slow", json!({})), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(first.is_none());

        let err = channel
            .call(&Request::new(2, "slow", json!({})), WAIT)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::RequestOutstanding(ref id) if *id == json!(1)));

        let late = channel.await_response(WAIT).await.unwrap().unwrap();
        assert_eq!(late.id, json!(1));

        channel.terminate().await;
    }

    #[tokio::test]
    async fn test_recv_timeout_then_late_message() {
        let script = r#"sleep 0.3; echo '{"late":true}'; sleep 5"#;
        let mut channel = ProcessChannel::spawn("late", sh(script), GRACE).unwrap();

        let started = std::time::Instant::now();
        let nothing = channel.recv(Duration::from_millis(50)).await.unwrap();
        assert!(nothing.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));

        let late = channel.recv(WAIT).await.unwrap();
        assert_eq!(late, Some(Inbound::Message(json!({"late": true}))));

        channel.terminate().await;
    }

    #[tokio::test]
    async fn test_unparsed_lines_and_closed_stdout() {
        let script = r#"echo 'hello there'; echo; echo '[1,2]'"#;
        let mut channel = ProcessChannel::spawn("chatty", sh(script), GRACE).unwrap();

        assert_eq!(
            channel.recv(WAIT).await.unwrap(),
            Some(Inbound::Unparsed {
                raw: "hello there".to_string()
            })
        );
        assert_eq!(
            channel.recv(WAIT).await.unwrap(),
            Some(Inbound::Message(json!([1, 2])))
        );
        assert!(matches!(
            channel.recv(WAIT).await,
            Err(IpcError::ConnectionClosed)
        ));

        channel.terminate().await;
    }

    #[tokio::test]
    async fn test_terminate_kills_unresponsive_child_once() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut channel =
            ProcessChannel::spawn("sleeper", command, Duration::from_millis(100)).unwrap();

        let first = channel.terminate().await;
        assert_eq!(first.worker, "sleeper");
        assert_eq!(first.outcome, ExitOutcome::Killed);
        assert!(channel.is_terminated());

        let second = channel.terminate().await;
        assert_eq!(second.outcome, ExitOutcome::AlreadyTerminated);
        assert_eq!(second.pid, first.pid);
    }

    #[tokio::test]
    async fn test_terminate_after_child_exited() {
        let mut channel = ProcessChannel::spawn("short", Command::new("true"), GRACE).unwrap();

        // Wait for the child to exit on its own
        assert!(matches!(
            channel.recv(WAIT).await,
            Err(IpcError::ConnectionClosed)
        ));

        let exit = channel.terminate().await;
        assert_eq!(exit.outcome, ExitOutcome::Exited(Some(0)));
        assert_eq!(
            channel.terminate().await.outcome,
            ExitOutcome::AlreadyTerminated
        );

        let err = channel
            .send(&Request::new(1, "ping", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = ProcessChannel::spawn(
            "ghost",
            Command::new("/definitely/not/a/reqflow/worker"),
            GRACE,
        );
        match result {
            Err(err) => {
                assert!(matches!(err, IpcError::Spawn { ref worker, .. } if worker == "ghost"));
                assert!(err.is_transport());
            }
            Ok(_) => panic!("spawning a missing program should fail"),
        }
    }
}
