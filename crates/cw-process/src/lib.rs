//! Process adapters: spawning a shell command as a plain child process or
//! under a pseudo-terminal, with a uniform write/kill/event contract.
//!
//! Both variants merge all child output into a single ordered stream of
//! [`AdapterEvent::Data`] chunks followed by one [`AdapterEvent::Exit`].

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use cw_core::{ExitInfo, SignalSpec};

#[cfg(all(unix, feature = "pty"))]
mod pty;

const READ_BUF_SIZE: usize = 4096;

/// Event emitted by a process adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// A raw chunk of merged stdout/stderr bytes, in adapter order.
    Data(Vec<u8>),
    /// The child exited. Sent exactly once; late `Data` chunks may still
    /// follow while open descriptors drain.
    Exit(ExitInfo),
}

/// Everything needed to spawn one command.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// Shell command line, passed verbatim to the shell.
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Shell binary override; `None` selects the platform default.
    pub shell: Option<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env: HashMap<String, String>,
    /// Prefer the PTY variant. Falls back to plain when PTY init fails.
    pub use_pty: bool,
}

/// Which variant actually backs an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Piped child process, stdout and stderr merged.
    Plain,
    /// Child attached to a 120x30 pseudo-terminal.
    Pty,
}

enum AdapterWriter {
    Pipe(Arc<tokio::sync::Mutex<Option<tokio::process::ChildStdin>>>),
    #[cfg(all(unix, feature = "pty"))]
    Pty(Arc<std::sync::Mutex<std::fs::File>>),
}

/// Handle to a live spawned command.
///
/// The event stream is taken once by the session engine; `write` and `kill`
/// remain usable from any task.
pub struct ProcessAdapter {
    kind: AdapterKind,
    pid: Option<u32>,
    writer: AdapterWriter,
    events: Option<UnboundedReceiver<AdapterEvent>>,
}

impl ProcessAdapter {
    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the event stream. Yields `None` after the adapter's pump has
    /// finished draining output past the exit event.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<AdapterEvent>> {
        self.events.take()
    }

    /// Write bytes to the child verbatim. Callers include `\n` to submit a
    /// line; nothing is appended here.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        match &self.writer {
            AdapterWriter::Pipe(stdin) => {
                let mut guard = stdin.lock().await;
                let Some(handle) = guard.as_mut() else {
                    bail!("child stdin is closed");
                };
                handle
                    .write_all(bytes)
                    .await
                    .context("Failed to write to child stdin")?;
                handle.flush().await.context("Failed to flush child stdin")
            }
            #[cfg(all(unix, feature = "pty"))]
            AdapterWriter::Pty(master) => {
                use std::io::Write;
                let mut guard = master.lock().unwrap_or_else(|e| e.into_inner());
                guard
                    .write_all(bytes)
                    .context("Failed to write to PTY master")?;
                guard.flush().context("Failed to flush PTY master")
            }
        }
    }

    /// Deliver a signal to the child's process group.
    ///
    /// `CTRL_C` is synthetic: it writes `0x03` through the adapter instead of
    /// signaling. The PTY variant ignores the requested name and sends the
    /// platform default termination signal.
    pub async fn kill(&self, signal: SignalSpec) -> Result<()> {
        if signal == SignalSpec::CtrlC {
            return self.write(&[0x03]).await;
        }

        let Some(pid) = self.pid else {
            bail!("child pid is unknown; cannot signal");
        };

        let effective = match self.kind {
            AdapterKind::Plain => signal,
            AdapterKind::Pty => SignalSpec::Sigterm,
        };
        signal_process_group(pid, effective)
    }
}

/// Spawn with the configured variant: PTY when requested, plain otherwise.
/// PTY initialization failure degrades to plain with a warning.
pub async fn spawn_adapter(spec: &SpawnSpec) -> Result<ProcessAdapter> {
    if spec.use_pty {
        #[cfg(all(unix, feature = "pty"))]
        match pty::spawn_pty(spec) {
            Ok(adapter) => return Ok(adapter),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "PTY spawn failed; falling back to plain adapter");
            }
        }

        #[cfg(not(all(unix, feature = "pty")))]
        warn!("PTY adapter is not available in this build; falling back to plain adapter");
    }

    spawn_plain(spec).await
}

/// Resolve the shell invocation for a command: `(program, leading args)`.
///
/// POSIX: `bash -lc <command>`. Windows: `powershell -NoLogo -NoProfile
/// -Command <command>`.
pub fn shell_invocation(shell_override: Option<&str>) -> (String, Vec<String>) {
    #[cfg(not(windows))]
    {
        let program = shell_override.unwrap_or("bash").to_string();
        (program, vec!["-lc".to_string()])
    }

    #[cfg(windows)]
    {
        let program = shell_override.unwrap_or("powershell").to_string();
        (
            program,
            vec![
                "-NoLogo".to_string(),
                "-NoProfile".to_string(),
                "-Command".to_string(),
            ],
        )
    }
}

/// Spawn the plain variant: piped stdio, stdout and stderr pumped into one
/// event stream, child isolated in its own process group.
pub async fn spawn_plain(spec: &SpawnSpec) -> Result<ProcessAdapter> {
    let (program, args) = shell_invocation(spec.shell.as_deref());
    let mut cmd = Command::new(&program);
    cmd.args(&args);
    cmd.arg(&spec.command);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // Isolate the child in its own process group so signals reach the whole
    // pipeline the shell may spawn.
    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn '{program}'"))?;
    let pid = child.id();

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let (tx, rx) = unbounded_channel();
    tokio::spawn(pump_plain(child, stdout, stderr, tx));

    Ok(ProcessAdapter {
        kind: AdapterKind::Plain,
        pid,
        writer: AdapterWriter::Pipe(Arc::new(tokio::sync::Mutex::new(stdin))),
        events: Some(rx),
    })
}

/// Read stdout and stderr byte-wise, forward chunks in arrival order, and
/// report the exit exactly once. Reads continue after exit so descriptors
/// held open by grandchildren keep draining into the stream.
async fn pump_plain(
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    tx: UnboundedSender<AdapterEvent>,
) {
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut exit_sent = false;

    loop {
        if stdout_done && stderr_done && exit_sent {
            break;
        }

        tokio::select! {
            result = stdout_reader.read(&mut stdout_buf), if !stdout_done => {
                match result {
                    Ok(0) => stdout_done = true,
                    Ok(n) => {
                        if tx.send(AdapterEvent::Data(stdout_buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(error = %error, "stdout read failed; treating as end of stream");
                        stdout_done = true;
                    }
                }
            }
            result = stderr_reader.read(&mut stderr_buf), if !stderr_done => {
                match result {
                    Ok(0) => stderr_done = true,
                    Ok(n) => {
                        if tx.send(AdapterEvent::Data(stderr_buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(error = %error, "stderr read failed; treating as end of stream");
                        stderr_done = true;
                    }
                }
            }
            status = child.wait(), if !exit_sent => {
                exit_sent = true;
                let info = match status {
                    Ok(status) => exit_info_from_status(&status),
                    Err(error) => {
                        warn!(error = %error, "failed to wait for child");
                        ExitInfo::default()
                    }
                };
                if tx.send(AdapterEvent::Exit(info)).is_err() {
                    break;
                }
            }
        }
    }

    // Reap if the receiver went away before the child exited.
    if !exit_sent {
        let _ = child.wait().await;
    }
    debug!("plain adapter pump finished");
}

fn exit_info_from_status(status: &std::process::ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(signal_name)
    };
    #[cfg(not(unix))]
    let signal = None;

    ExitInfo {
        code: status.code(),
        signal,
    }
}

fn signal_name(signal: i32) -> String {
    match signal {
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        other => format!("SIG{other}"),
    }
}

fn signal_process_group(pid: u32, signal: SignalSpec) -> Result<()> {
    #[cfg(unix)]
    {
        let signo = match signal {
            SignalSpec::Sigint => libc::SIGINT,
            SignalSpec::Sigterm => libc::SIGTERM,
            SignalSpec::Kill => libc::SIGKILL,
            SignalSpec::CtrlC => unreachable!("CTRL_C is handled as a write"),
        };
        // SAFETY: kill() is async-signal-safe; the negative PID targets the
        // process group created by setsid in pre_exec.
        let ret = unsafe { libc::kill(-(pid as i32), signo) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("Failed to deliver {signal} to process group {pid}"));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        warn!("process-group signaling is unix-only; signal dropped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
