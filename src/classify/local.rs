//src/classify/local.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Classifier, ClassifyError};
use crate::classifications_stats::{summary_path_for, ClassificationSummary, ResultSink};
use crate::config::Configuration;
use crate::fasta;
use crate::pool::WorkerPool;
use crate::types::ClassificationResult;

/// Classifies queries in-process on a fixed worker pool.
pub struct LocalClassifier {
    classifier: Arc<Classifier>,
    threads: usize,
}

impl LocalClassifier {
    pub fn open(conf: &Configuration) -> Result<Self, ClassifyError> {
        Ok(Self::new(Arc::new(Classifier::open(conf)?), conf.worker_threads))
    }

    pub fn new(classifier: Arc<Classifier>, threads: usize) -> Self {
        Self {
            classifier,
            threads: threads.max(1),
        }
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn classify(&self, header: &str, sequence: &str) -> Result<ClassificationResult, ClassifyError> {
        self.classifier.classify(header, sequence)
    }

    /// Classify every record of `input` into NDJSON at `output`, one line per
    /// record, FAILED lines included. The summary is also written to
    /// `summary_output` when given.
    pub fn classify_file(
        &self,
        input: &Path,
        output: &Path,
        summary_output: Option<&Path>,
    ) -> Result<ClassificationSummary, ClassifyError> {
        let sink = Arc::new(ResultSink::create(output, fasta::display_name(input))?);
        let pool = WorkerPool::new(self.threads, self.threads * 2)?;

        let mut read_error = None;
        for entry in fasta::open_fasta(input)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };
            let classifier = Arc::clone(&self.classifier);
            let sink = Arc::clone(&sink);
            pool.execute(move || {
                let result = classifier.classify_or_fail(&entry.header, &entry.sequence);
                if let Err(e) = sink.record(&result) {
                    log::error!("Failed to write result for '{}': {}", entry.header, e);
                }
            });
        }
        pool.join();

        let sink = Arc::try_unwrap(sink).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "result sink still in use")
        })?;
        let summary = sink.finish()?;
        if let Some(e) = read_error {
            log::error!("Stopped reading {} early: {}", input.display(), e);
            return Err(e.into());
        }

        log::info!(
            "Classifying {} finished in {} ms: {} total, {} classified, {} vague, {} unknown, {} failed",
            summary.query_filename,
            summary.time_taken_ms(),
            summary.total,
            summary.classified,
            summary.vague,
            summary.unknown,
            summary.failed
        );
        if let Some(path) = summary_output {
            summary.save(path)?;
        }
        Ok(summary)
    }

    /// Classify each FASTA file under `input` into `<output_dir>/<name>.json`
    /// with a summary next to it.
    pub fn classify_path(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<ClassificationSummary>, ClassifyError> {
        let files = fasta::find_fasta_files(input)?;
        let mut summaries = Vec::with_capacity(files.len());
        for file in files {
            let output = output_path_for(&file, output_dir);
            let summary_path = summary_path_for(&output);
            summaries.push(self.classify_file(&file, &output, Some(&summary_path))?);
        }
        Ok(summaries)
    }
}

/// `<output_dir>/<input file name>.json`
pub fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}.json", fasta::display_name(input)))
}
