//! Pseudo-terminal adapter variant, compiled behind the `pty` feature.
//!
//! The command runs attached to a 120x30 PTY so interactive children see a
//! terminal. All slave output arrives through the master descriptor as one
//! byte stream; a blocking reader thread bridges it into the adapter's event
//! channel, and a separate thread reports the exit.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Command as StdCommand, Stdio};
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;
use tracing::warn;

use nix::pty::{Winsize, openpty};
use nix::unistd::{dup, setsid};

use crate::{
    AdapterEvent, AdapterKind, AdapterWriter, ProcessAdapter, READ_BUF_SIZE, SpawnSpec,
    exit_info_from_status, shell_invocation,
};
use cw_core::ExitInfo;

const PTY_COLS: u16 = 120;
const PTY_ROWS: u16 = 30;

pub(crate) fn spawn_pty(spec: &SpawnSpec) -> Result<ProcessAdapter> {
    let pty = openpty(
        Some(&Winsize {
            ws_row: PTY_ROWS,
            ws_col: PTY_COLS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }),
        None,
    )
    .context("failed to allocate PTY")?;

    let slave_fd_raw = pty.slave.as_raw_fd();
    let stdin_fd = dup(slave_fd_raw).context("failed to dup PTY slave for stdin")?;
    let stdout_fd = dup(slave_fd_raw).context("failed to dup PTY slave for stdout")?;
    let stderr_fd = dup(slave_fd_raw).context("failed to dup PTY slave for stderr")?;

    let (program, args) = shell_invocation(spec.shell.as_deref());
    let mut cmd = StdCommand::new(&program);
    cmd.args(&args).arg(&spec.command);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::from(File::from(raw_fd_to_owned_fd(stdin_fd))))
        .stdout(Stdio::from(File::from(raw_fd_to_owned_fd(stdout_fd))))
        .stderr(Stdio::from(File::from(raw_fd_to_owned_fd(stderr_fd))));

    // SAFETY: `pre_exec` runs in the child before `exec`. We only call
    // async-signal-safe operations (`setsid`, `ioctl(TIOCSCTTY)`) and return
    // an `io::Result` without touching shared Rust state.
    unsafe {
        cmd.pre_exec(move || {
            setsid().map_err(nix_errno_to_io_error)?;
            // SAFETY: ioctl with TIOCSCTTY establishes the PTY slave as the
            // controlling terminal for this freshly-created session.
            let rc = libc::ioctl(slave_fd_raw, libc::TIOCSCTTY as _, 0);
            if rc == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn '{program}' under PTY"))?;
    let pid = Some(child.id());

    // Parent no longer needs the slave side.
    drop(pty.slave);

    let master = File::from(pty.master);
    let writer = master
        .try_clone()
        .context("failed to clone PTY master for writer")?;

    let (tx, rx) = unbounded_channel();

    let data_tx = tx.clone();
    let mut reader = master;
    std::thread::Builder::new()
        .name("cmdwatch-pty-io".to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if data_tx.send(AdapterEvent::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    // EIO once every slave descriptor is closed.
                    Err(_) => break,
                }
            }
        })
        .context("failed to spawn PTY reader thread")?;

    std::thread::Builder::new()
        .name("cmdwatch-pty-wait".to_string())
        .spawn(move || {
            let info = match child.wait() {
                Ok(status) => exit_info_from_status(&status),
                Err(error) => {
                    warn!(error = %error, "failed to wait for PTY child");
                    ExitInfo::default()
                }
            };
            let _ = tx.send(AdapterEvent::Exit(info));
        })
        .context("failed to spawn PTY wait thread")?;

    Ok(ProcessAdapter {
        kind: AdapterKind::Pty,
        pid,
        writer: AdapterWriter::Pty(Arc::new(std::sync::Mutex::new(writer))),
        events: Some(rx),
    })
}

fn nix_errno_to_io_error(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

fn raw_fd_to_owned_fd(raw_fd: i32) -> OwnedFd {
    // SAFETY: `raw_fd` comes from successful `dup(2)` calls and is uniquely
    // owned by this function, so converting to `OwnedFd` is valid.
    unsafe { OwnedFd::from_raw_fd(raw_fd) }
}
