//src/classifications_stats.rs

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::types::{ClassificationResult, ResultType};

/// Per-input tally of classification outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub query_filename: String,
    pub total: u64,
    pub classified: u64,
    pub vague: u64,
    pub unknown: u64,
    #[serde(default)]
    pub failed: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ClassificationSummary {
    pub fn new(query_filename: impl Into<String>) -> Self {
        Self {
            query_filename: query_filename.into(),
            total: 0,
            classified: 0,
            vague: 0,
            unknown: 0,
            failed: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn report(&mut self, result: &ClassificationResult) {
        self.total += 1;
        match result.result_type {
            ResultType::Classified => self.classified += 1,
            ResultType::Vague => self.vague += 1,
            ResultType::Unknown => self.unknown += 1,
            ResultType::Failed => self.failed += 1,
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// Milliseconds between start and end, 0 while still running.
    pub fn time_taken_ms(&self) -> i64 {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
            .unwrap_or(0)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        create_parent(path.as_ref())?;
        fs::write(path, json)
    }
}

/// Default summary location next to an output file.
pub fn summary_path_for<P: AsRef<Path>>(output: P) -> PathBuf {
    let mut s = output.as_ref().as_os_str().to_os_string();
    s.push(".summary.json");
    PathBuf::from(s)
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Thread-safe NDJSON sink that tallies what it writes.
pub struct ResultSink {
    out: Mutex<BufWriter<Box<dyn Write + Send>>>,
    summary: Mutex<ClassificationSummary>,
}

impl ResultSink {
    pub fn new(out: Box<dyn Write + Send>, query_filename: impl Into<String>) -> Self {
        Self {
            out: Mutex::new(BufWriter::with_capacity(1 << 20, out)),
            summary: Mutex::new(ClassificationSummary::new(query_filename)),
        }
    }

    /// Sink writing to `path`, creating parent directories.
    pub fn create<P: AsRef<Path>>(path: P, query_filename: impl Into<String>) -> io::Result<Self> {
        create_parent(path.as_ref())?;
        let file = File::create(path)?;
        Ok(Self::new(Box::new(file), query_filename))
    }

    pub fn record(&self, result: &ClassificationResult) -> io::Result<()> {
        let mut line = serde_json::to_string(result).map_err(io::Error::from)?;
        line.push('\n');
        self.out.lock().write_all(line.as_bytes())?;
        self.summary.lock().report(result);
        Ok(())
    }

    /// Snapshot of the tally so far.
    pub fn summary(&self) -> ClassificationSummary {
        self.summary.lock().clone()
    }

    /// Flush output and stamp the end time.
    pub fn finish(self) -> io::Result<ClassificationSummary> {
        self.out.into_inner().flush()?;
        let mut summary = self.summary.into_inner();
        summary.finish();
        Ok(summary)
    }
}
