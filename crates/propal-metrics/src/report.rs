//! CSV export of session metrics.
//!
//! [`SessionReporter::export`] writes one file per session: a row per turn
//! followed by a `metric,value` summary block. [`SessionReporter::append_history`]
//! keeps a single file with one summary row per session, so latency can be
//! compared across sessions.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::MetricsError;
use crate::stage::Stage;
use crate::tracker::{MetricsTracker, SessionSummary};
use crate::turn::TurnRecord;

const DERIVED_COLUMNS: [&str; 4] = ["eou_delay", "ttft", "ttfd", "total_latency"];

/// Summary fields in export order.
const SUMMARY_FIELDS: [&str; 18] = [
    "session_id",
    "started_at",
    "ended_at",
    "duration_secs",
    "turn_count",
    "message_count",
    "agent_response_count",
    "interruption_count",
    "error_count",
    "avg_eou_delay",
    "avg_ttft",
    "avg_ttfd",
    "avg_total_latency",
    "min_total_latency",
    "max_total_latency",
    "target_latency_secs",
    "target_latency_met_ratio",
    "avg_latency_target_met",
];

/// Serialises a tracker's turns and summary to CSV files.
///
/// The reporter only reads from the tracker; a failed export leaves the
/// session's metrics untouched and can simply be retried.
#[derive(Debug, Clone, Copy)]
pub struct SessionReporter<'a> {
    tracker: &'a MetricsTracker,
}

impl<'a> SessionReporter<'a> {
    pub fn new(tracker: &'a MetricsTracker) -> Self {
        Self { tracker }
    }

    /// Writes the per-turn table and the summary block to `path`, replacing
    /// any existing file. Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::ExportIo`] if the destination cannot be
    /// created or written.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), MetricsError> {
        let path = path.as_ref();
        let turns = self.tracker.turns();
        let summary = self.tracker.session_summary();

        let result = create_parent_dirs(path)
            .and_then(|()| File::create(path))
            .and_then(|file| write_session(file, &turns, &summary));

        match result {
            Ok(()) => {
                tracing::info!(
                    session_id = %summary.session_id,
                    path = %path.display(),
                    turns = turns.len(),
                    "metrics exported"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    session_id = %summary.session_id,
                    path = %path.display(),
                    error = %e,
                    "failed to export metrics"
                );
                Err(MetricsError::export(path, e))
            }
        }
    }

    /// Appends this session's summary as one row of the history file at
    /// `path`, writing the header first when the file is new or empty.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::ExportIo`] if the file cannot be opened or
    /// written.
    pub fn append_history(&self, path: impl AsRef<Path>) -> Result<(), MetricsError> {
        let path = path.as_ref();
        let summary = self.tracker.session_summary();

        let result = create_parent_dirs(path)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(path))
            .and_then(|file| {
                let needs_header = file.metadata()?.len() == 0;
                write_history_row(file, &summary, needs_header)
            });

        result.map_err(|e| {
            tracing::error!(
                session_id = %summary.session_id,
                path = %path.display(),
                error = %e,
                "failed to append metrics history"
            );
            MetricsError::export(path, e)
        })
    }
}

fn create_parent_dirs(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn write_session<W: Write>(
    out: W,
    turns: &[TurnRecord],
    summary: &SessionSummary,
) -> std::io::Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(out);

    let header = std::iter::once("turn_id")
        .chain(Stage::ALL.iter().map(|stage| stage.as_str()))
        .chain(std::iter::once("interrupted"))
        .chain(DERIVED_COLUMNS);
    writer.write_record(header)?;

    for turn in turns {
        writer.write_record(turn_row(turn))?;
    }

    // An empty row separates the turn table from the summary block.
    writer.write_record(std::iter::empty::<&str>())?;
    writer.write_record(["metric", "value"])?;
    for (field, value) in SUMMARY_FIELDS.iter().zip(summary_values(summary)) {
        writer.write_record([*field, value.as_str()])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_history_row<W: Write>(
    out: W,
    summary: &SessionSummary,
    needs_header: bool,
) -> std::io::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    if needs_header {
        writer.write_record(SUMMARY_FIELDS)?;
    }
    writer.write_record(summary_values(summary))?;
    writer.flush()?;
    Ok(())
}

fn turn_row(turn: &TurnRecord) -> Vec<String> {
    let derived = turn.derived();
    let mut row = Vec::with_capacity(12);
    row.push(turn.turn_id.to_string());
    row.extend(Stage::ALL.iter().map(|stage| seconds(turn.get(*stage))));
    row.push(turn.interrupted.to_string());
    row.extend(
        [
            derived.eou_delay,
            derived.ttft,
            derived.ttfd,
            derived.total_latency,
        ]
        .map(seconds),
    );
    row
}

fn summary_values(summary: &SessionSummary) -> Vec<String> {
    let avg_latency_target_met = summary
        .avg_total_latency
        .map(|avg| avg < summary.target_latency_secs);

    vec![
        summary.session_id.clone(),
        summary.started_at.to_rfc3339(),
        summary
            .ended_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
        format!("{:.3}", summary.duration_secs),
        summary.turn_count.to_string(),
        summary.message_count.to_string(),
        summary.agent_response_count.to_string(),
        summary.interruption_count.to_string(),
        summary.error_count.to_string(),
        seconds(summary.avg_eou_delay),
        seconds(summary.avg_ttft),
        seconds(summary.avg_ttfd),
        seconds(summary.avg_total_latency),
        seconds(summary.min_total_latency),
        seconds(summary.max_total_latency),
        summary.target_latency_secs.to_string(),
        summary
            .target_latency_met_ratio
            .map(|ratio| format!("{ratio:.4}"))
            .unwrap_or_default(),
        avg_latency_target_met
            .map(|met| met.to_string())
            .unwrap_or_default(),
    ]
}

/// Absent values become empty cells, never zero.
fn seconds(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}
