//! JSONL completion sink.
//!
//! Completed-session records arrive over an unbounded channel and are
//! appended one JSON object per line. The writer task owns the file; write
//! failures are logged and swallowed so a broken sink can never affect a
//! session result.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use cw_core::CompletionRecord;

/// Start the journal writer task. Returns the sender to wire into
/// [`crate::Hooks::completion`].
pub fn spawn_journal_writer(path: PathBuf) -> UnboundedSender<CompletionRecord> {
    let (tx, mut rx) = unbounded_channel::<CompletionRecord>();

    tokio::spawn(async move {
        let mut writer = open_writer(&path);
        let mut failures: u64 = 0;

        while let Some(record) = rx.recv().await {
            let Some(out) = writer.as_mut() else {
                failures += 1;
                continue;
            };
            if let Err(error) = append_record(out, &record) {
                failures += 1;
                warn!(
                    path = %path.display(),
                    error = %error,
                    failures,
                    "failed to append completion record"
                );
            }
        }

        info!(path = %path.display(), failures, "journal writer stopped");
    });

    tx
}

fn open_writer(path: &Path) -> Option<BufWriter<std::fs::File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                warn!(path = %path.display(), error = %error, "failed to create journal directory");
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to open journal file");
            None
        }
    }
}

fn append_record(
    writer: &mut BufWriter<std::fs::File>,
    record: &CompletionRecord,
) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    // Flush per record so the journal survives an abrupt shutdown.
    writer.flush()
}
