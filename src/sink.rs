//! Stdout sink for the `watch` command.

use std::io::{self, Write};

use netpulse_types::TelemetrySnapshot;
use tokio::sync::mpsc;

use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotFormat {
    /// One human-readable status line per snapshot.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Write a snapshot as a single line.
pub fn write_snapshot(
    out: &mut impl Write,
    snapshot: &TelemetrySnapshot,
    format: SnapshotFormat,
) -> io::Result<()> {
    match format {
        SnapshotFormat::Text => writeln!(out, "{}", render::snapshot_line(snapshot)),
        SnapshotFormat::Json => {
            serde_json::to_writer(&mut *out, snapshot)?;
            writeln!(out)
        }
    }
}

/// Drain `rx` into `out` until the scheduler releases the channel.
///
/// Runs on its own task so a slow terminal never stalls publication; the
/// channel output drops snapshots while this sink is behind.
pub async fn print_snapshots(
    mut rx: mpsc::Receiver<TelemetrySnapshot>,
    mut out: impl Write,
    format: SnapshotFormat,
) -> io::Result<u64> {
    let mut printed = 0;
    while let Some(snapshot) = rx.recv().await {
        write_snapshot(&mut out, &snapshot, format)?;
        out.flush()?;
        printed += 1;
    }
    Ok(printed)
}
