//src/indexer.rs

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Configuration;
use crate::fasta::{self, FastaEntry};
use crate::index::{IndexError, IndexMeta, IndexWriter, StoredDocument, StoredFields};
use crate::kmer::{reverse_complement, KmerAnalyzer, KmerError};
use crate::lineage::Lineage;
use crate::pool::WorkerPool;
use crate::taxdb::{header_accession, TaxonDb};
use crate::types::{SequenceRecord, Strand};

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Counts reported when an index build finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSummary {
    pub meta: IndexMeta,
    pub records: usize,
    pub failed: usize,
}

/// Builds a fresh index from reference FASTA files.
///
/// Each record becomes two documents, forward and reverse complement, that are
/// appended together on a worker thread.
pub struct Indexer {
    writer: Arc<IndexWriter>,
    analyzer: KmerAnalyzer,
    pool: WorkerPool,
    taxdb: Option<Arc<TaxonDb>>,
    records: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl Indexer {
    pub fn new(conf: &Configuration) -> Result<Self, IndexerError> {
        if conf.index_path.as_os_str().is_empty() {
            return Err(IndexerError::Config("index_path is not set".into()));
        }
        if conf.kmer_size < 1 {
            return Err(IndexerError::Config("kmer_size must be at least 1".into()));
        }
        let meta = IndexMeta::new(conf.kmer_size, conf.canonical_kmers);
        let writer = IndexWriter::create(&conf.index_path, meta)?;
        let pool = WorkerPool::new(conf.worker_threads, conf.worker_threads * 4)?;

        Ok(Self {
            writer: Arc::new(writer),
            // documents are always tokenized densely
            analyzer: KmerAnalyzer::new(conf.kmer_size, 0, conf.canonical_kmers),
            pool,
            taxdb: None,
            records: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Use `db` for records of files that have no lineage sidecar.
    pub fn with_taxonomy(mut self, db: TaxonDb) -> Self {
        self.taxdb = Some(Arc::new(db));
        self
    }

    /// Index every FASTA file at `path` (a file or a directory tree).
    pub fn index_path<P: AsRef<Path>>(&self, path: P) -> Result<usize, IndexerError> {
        let files = fasta::find_fasta_files(path)?;
        log::info!("Found {} reference file(s)", files.len());
        for file in &files {
            self.index_file(file)?;
        }
        Ok(files.len())
    }

    pub fn index_file<P: AsRef<Path>>(&self, path: P) -> Result<(), IndexerError> {
        let path = path.as_ref();
        let filename = fasta::display_name(path);
        let file_lineage = fasta::find_taxonomy_sidecar(path).and_then(|p| read_sidecar(&p));

        log::info!("Indexing {}", path.display());
        for entry in fasta::open_fasta(path)? {
            let FastaEntry { header, sequence } = entry?;
            let lineage = match &file_lineage {
                Some(l) => l.clone(),
                None => self.lineage_for(&header),
            };
            self.index_record(SequenceRecord {
                header,
                sequence,
                filename: filename.clone(),
                lineage,
            });
        }
        Ok(())
    }

    fn lineage_for(&self, header: &str) -> String {
        let Some(db) = &self.taxdb else {
            return String::new();
        };
        let lineage = db.lineage_by_accession(header_accession(header));
        if lineage.is_empty() {
            log::debug!("No taxonomy for '{header}'");
            return String::new();
        }
        lineage.to_json().unwrap_or_default()
    }

    /// Queue one record. Failures are logged and counted, never propagated.
    pub fn index_record(&self, record: SequenceRecord) {
        let writer = Arc::clone(&self.writer);
        let analyzer = self.analyzer;
        let records = Arc::clone(&self.records);
        let failed = Arc::clone(&self.failed);

        self.pool.execute(move || {
            records.fetch_add(1, Ordering::Relaxed);
            let result = build_documents(&analyzer, &record)
                .map_err(IndexerDocError::Kmer)
                .and_then(|docs| writer.add_documents(&docs).map_err(IndexerDocError::Index));
            if let Err(e) = result {
                failed.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to index '{}' from {}: {}", record.header, record.filename, e);
            }
        });
    }

    /// Wait for queued records and commit the index.
    pub fn close(self) -> Result<IndexSummary, IndexerError> {
        self.pool.join();
        let records = self.records.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let writer = Arc::try_unwrap(self.writer)
            .map_err(|_| IndexerError::Config("index writer still shared after join".into()))?;
        let meta = writer.close()?;
        log::info!("Indexed {} record(s), {} failed", records, failed);
        Ok(IndexSummary {
            meta,
            records,
            failed,
        })
    }
}

#[derive(Debug, Error)]
enum IndexerDocError {
    #[error("{0}")]
    Kmer(KmerError),
    #[error("{0}")]
    Index(IndexError),
}

fn read_sidecar(path: &Path) -> Option<String> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("Cannot read taxonomy sidecar {}: {}", path.display(), e);
            return None;
        }
    };
    let text = text.trim().to_string();
    if let Err(e) = Lineage::parse(&text) {
        // stored anyway; contending hits with it resolve as vague
        log::warn!("Taxonomy sidecar {} is not a valid lineage: {}", path.display(), e);
    }
    Some(text)
}

/// Forward and reverse-complement documents for one record.
pub fn build_documents(
    analyzer: &KmerAnalyzer,
    record: &SequenceRecord,
) -> Result<[StoredDocument; 2], KmerError> {
    let fields = |strand| StoredFields {
        filename: record.filename.clone(),
        header: record.header.clone(),
        strand,
        lineage: record.lineage.clone(),
    };
    let body = |seq: &str| -> Result<Vec<String>, KmerError> {
        Ok(analyzer.analyze(seq)?.into_iter().map(|t| t.text).collect())
    };

    Ok([
        StoredDocument {
            fields: fields(Strand::Forward),
            body: body(&record.sequence)?,
        },
        StoredDocument {
            fields: fields(Strand::Reverse),
            body: body(&reverse_complement(&record.sequence))?,
        },
    ])
}
