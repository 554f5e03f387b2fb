//src/index/store.rs

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::IndexError;
use crate::types::Strand;

pub const META_FILE: &str = "meta.json";
pub const DOCUMENTS_FILE: &str = "documents.bin";

/// Build-time settings the query side has to reproduce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub kmer_size: usize,
    pub canonical: bool,
    pub compressed: bool,
    #[serde(default)]
    pub doc_count: u64,
    pub created: DateTime<Utc>,
}

impl IndexMeta {
    pub fn new(kmer_size: usize, canonical: bool) -> Self {
        Self {
            kmer_size,
            canonical,
            compressed: true,
            doc_count: 0,
            created: Utc::now(),
        }
    }
}

/// Stored (retrievable) part of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFields {
    pub filename: String,
    pub header: String,
    pub strand: Strand,
    pub lineage: String,
}

/// A document as appended to the log: stored fields plus the analyzed body,
/// one term per token position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub fields: StoredFields,
    pub body: Vec<String>,
}

struct DocumentLog {
    file: File,
    committed: u64,
    count: u64,
    #[cfg(test)]
    fail_next_append: bool,
}

impl DocumentLog {
    fn append(&mut self, frames: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_append) {
            // part of the frames reach the file first
            self.file.write_all(&frames[..frames.len() / 2])?;
            return Err(io::Error::other("injected write failure"));
        }
        self.file.write_all(frames)?;
        self.file.flush()
    }
}

/// Appends documents to `documents.bin`.
///
/// Every call to [`IndexWriter::add_documents`] is a unit: either all of its
/// frames land after the last committed byte or the file is cut back to it.
pub struct IndexWriter {
    dir: PathBuf,
    meta: IndexMeta,
    log: Mutex<DocumentLog>,
}

impl IndexWriter {
    /// Create a fresh index in `dir`, removing whatever was there.
    pub fn create<P: AsRef<Path>>(dir: P, meta: IndexMeta) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() {
            clean_directory(&dir)?;
        } else {
            fs::create_dir_all(&dir)?;
        }
        write_meta(&dir, &meta)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(DOCUMENTS_FILE))?;

        log::info!(
            "Created index at {} (k={}, canonical={})",
            dir.display(),
            meta.kmer_size,
            meta.canonical
        );

        Ok(Self {
            dir,
            meta,
            log: Mutex::new(DocumentLog {
                file,
                committed: 0,
                count: 0,
                #[cfg(test)]
                fail_next_append: false,
            }),
        })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// Append `docs` as one unit. Safe to call from several threads.
    pub fn add_documents(&self, docs: &[StoredDocument]) -> Result<(), IndexError> {
        // encode outside the lock
        let mut frames = Vec::new();
        for doc in docs {
            let bytes = bincode::serialize(doc)?;
            frames.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            frames.extend_from_slice(&bytes);
        }

        let mut log = self.log.lock();
        match log.append(&frames) {
            Ok(()) => {
                log.committed += frames.len() as u64;
                log.count += docs.len() as u64;
                Ok(())
            }
            Err(e) => {
                // roll back a torn append so later records stay aligned
                let committed = log.committed;
                if let Err(trunc) = log
                    .file
                    .set_len(committed)
                    .and_then(|_| log.file.seek(SeekFrom::Start(committed)).map(|_| ()))
                {
                    log::error!("Failed to roll back document log: {trunc}");
                }
                Err(IndexError::Io(e))
            }
        }
    }

    pub fn add_document(&self, doc: &StoredDocument) -> Result<(), IndexError> {
        self.add_documents(std::slice::from_ref(doc))
    }

    /// Make the next append fail after writing part of its frames.
    #[cfg(test)]
    pub(crate) fn fail_next_append(&self) {
        self.log.lock().fail_next_append = true;
    }

    /// Flush, record the final document count and release the directory.
    pub fn close(self) -> Result<IndexMeta, IndexError> {
        let log = self.log.into_inner();
        log.file.sync_all()?;
        let mut meta = self.meta;
        meta.doc_count = log.count;
        write_meta(&self.dir, &meta)?;
        log::info!("Closed index with {} documents", meta.doc_count);
        Ok(meta)
    }
}

fn clean_directory(dir: &Path) -> Result<(), IndexError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn write_meta(dir: &Path, meta: &IndexMeta) -> Result<(), IndexError> {
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(dir.join(META_FILE), json)?;
    Ok(())
}

pub fn read_meta<P: AsRef<Path>>(dir: P) -> Result<IndexMeta, IndexError> {
    let path = dir.as_ref().join(META_FILE);
    if !path.exists() {
        return Err(IndexError::Missing(dir.as_ref().to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Read every complete document frame. A torn tail is logged and skipped.
pub fn read_documents<P: AsRef<Path>>(dir: P) -> Result<Vec<StoredDocument>, IndexError> {
    let path = dir.as_ref().join(DOCUMENTS_FILE);
    if !path.exists() {
        return Err(IndexError::Missing(dir.as_ref().to_path_buf()));
    }
    let data = fs::read(path)?;
    Ok(decode_frames(&data))
}

fn decode_frames(data: &[u8]) -> Vec<StoredDocument> {
    let mut docs = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if pos + 4 > data.len() {
            log::warn!("Ignoring {} trailing bytes in document log", data.len() - pos);
            break;
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[pos..pos + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = pos + 4;
        if start + len > data.len() {
            log::warn!("Ignoring truncated document at byte {pos}");
            break;
        }
        match bincode::deserialize::<StoredDocument>(&data[start..start + len]) {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                log::warn!("Stopping at undecodable document at byte {pos}: {e}");
                break;
            }
        }
        pos = start + len;
    }
    docs
}
