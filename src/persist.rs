//! Run-directory persistence
//!
//! A finished run leaves three files behind: `events.jsonl` (one event per
//! line), `metrics.csv` (one row per epoch), and `manifest.json`. Nothing
//! else is written. [`JsonlSink`] is the streaming variant: attached to an
//! event log it commits every event to disk before the append returns, so a
//! crashed run still leaves a readable prefix.

use crate::error::KernelResult;
use crate::events::{Event, EventSink};
use crate::metrics::EpochMetrics;
use crate::orchestrator::{RunManifest, RunReport};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const EVENTS_FILE: &str = "events.jsonl";
pub const METRICS_FILE: &str = "metrics.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Line-delimited JSON sink with per-event flush
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> KernelResult<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for JsonlSink {
    fn commit(&mut self, event: &Event) -> io::Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()
    }
}

/// Write the full run directory
pub fn write_run(dir: impl AsRef<Path>, report: &RunReport) -> KernelResult<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let mut events = BufWriter::new(File::create(dir.join(EVENTS_FILE))?);
    for event in report.events.iter() {
        writeln!(events, "{}", serde_json::to_string(event)?)?;
    }
    events.flush()?;

    let mut metrics = csv::Writer::from_path(dir.join(METRICS_FILE))?;
    for row in &report.metrics {
        metrics.serialize(row)?;
    }
    metrics.flush()?;

    let manifest = serde_json::to_string_pretty(&report.manifest)?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest)?;
    Ok(())
}

/// Load an event stream back from `events.jsonl`
pub fn load_events(path: impl AsRef<Path>) -> KernelResult<Vec<Event>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

/// Load per-epoch metrics back from `metrics.csv`
pub fn load_metrics(path: impl AsRef<Path>) -> KernelResult<Vec<EpochMetrics>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn load_manifest(path: impl AsRef<Path>) -> KernelResult<RunManifest> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
