//src/taxdb.rs

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

use crate::lineage::Lineage;

#[derive(Debug, Error)]
pub enum TaxDbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed line {line} in {file}: {reason}")]
    Malformed {
        file: String,
        line: usize,
        reason: String,
    },
}

/// One node of the taxonomy tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    pub taxid: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: u32,
    #[serde(default)]
    pub rank: String,
}

/// In-memory taxonomy: taxid -> node, plus an optional accession -> taxid map.
#[derive(Debug, Default)]
pub struct TaxonDb {
    nodes: AHashMap<u32, Taxon>,
    accessions: AHashMap<String, u32>,
}

impl TaxonDb {
    /// Parses a taxDB file in the format:
    /// ```text
    /// <taxid>\t<parentid>\t<taxname>\t<rank>
    /// ```
    /// Lines with fewer than four fields or a non-numeric taxid are skipped.
    pub fn open<P: AsRef<Path>>(filepath: P) -> Result<Self, TaxDbError> {
        let file = File::open(filepath.as_ref())?;
        let reader = BufReader::new(file);

        let mut db = TaxonDb::default();
        let mut skipped = 0usize;

        for line_result in reader.lines() {
            let line = line_result?;
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 4 {
                skipped += 1;
                continue;
            }

            let taxid: u32 = parts[0].trim().parse().unwrap_or(0);
            let parent: u32 = parts[1].trim().parse().unwrap_or(0);
            if taxid == 0 {
                skipped += 1;
                continue;
            }
            db.insert(Taxon {
                taxid,
                name: parts[2].trim().to_string(),
                parent,
                rank: parts[3].trim().to_string(),
            });
        }

        if skipped > 0 {
            log::warn!(
                "Skipped {} malformed lines in {}",
                skipped,
                filepath.as_ref().display()
            );
        }
        log::info!(
            "Loaded {} taxa from {}",
            db.nodes.len(),
            filepath.as_ref().display()
        );
        Ok(db)
    }

    /// Loads an `<accession>\t<taxid>` map on top of the tree.
    pub fn load_accessions<P: AsRef<Path>>(&mut self, filepath: P) -> Result<(), TaxDbError> {
        let name = filepath.as_ref().display().to_string();
        let reader = BufReader::new(File::open(filepath.as_ref())?);
        for (i, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split('\t');
            let (Some(acc), Some(taxid)) = (parts.next(), parts.next()) else {
                return Err(TaxDbError::Malformed {
                    file: name,
                    line: i + 1,
                    reason: "expected <accession>\\t<taxid>".into(),
                });
            };
            let taxid: u32 = taxid.trim().parse().map_err(|_| TaxDbError::Malformed {
                file: name.clone(),
                line: i + 1,
                reason: format!("invalid taxid '{}'", taxid.trim()),
            })?;
            self.accessions.insert(acc.trim().to_string(), taxid);
        }
        log::info!("Loaded {} accession mappings from {}", self.accessions.len(), name);
        Ok(())
    }

    pub fn insert(&mut self, taxon: Taxon) {
        self.nodes.insert(taxon.taxid, taxon);
    }

    pub fn insert_accession(&mut self, accession: &str, taxid: u32) {
        self.accessions.insert(accession.to_string(), taxid);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, taxid: u32) -> Option<&Taxon> {
        self.nodes.get(&taxid)
    }

    /// Taxon for an accession, trying `NC_000913.3` and then `NC_000913`.
    pub fn get_by_accession(&self, accession: &str) -> Option<&Taxon> {
        let taxid = self.accessions.get(accession).or_else(|| {
            let (base, _) = accession.rsplit_once('.')?;
            self.accessions.get(base)
        })?;
        self.get(*taxid)
    }

    /// Path from the root down to `taxid`. Stops at a self-parent or at a
    /// parent missing from the tree. Empty if `taxid` itself is unknown.
    pub fn lineage(&self, taxid: u32) -> Lineage {
        let mut tree = Vec::new();
        let mut next = taxid;
        while let Some(tax) = self.get(next) {
            // guard against cycles in a bad dump
            if tree.len() > self.nodes.len() {
                log::warn!("Cycle in taxonomy while walking from {taxid}");
                break;
            }
            tree.push(tax.clone());
            if tax.parent == tax.taxid {
                break;
            }
            next = tax.parent;
        }
        tree.reverse();
        Lineage::new(tree)
    }

    pub fn lineage_by_accession(&self, accession: &str) -> Lineage {
        match self.get_by_accession(accession) {
            Some(tax) => self.lineage(tax.taxid),
            None => Lineage::default(),
        }
    }
}

/// Accession token of a FASTA header: first whitespace-separated word, or the
/// field after `ref|` / `gb|` / `emb|` / `dbj|` in NCBI pipe-style headers.
pub fn header_accession(header: &str) -> &str {
    let first = header.split_whitespace().next().unwrap_or("");
    let fields: Vec<&str> = first.split('|').collect();
    if fields.len() > 1 {
        for pair in fields.windows(2) {
            if matches!(pair[0], "ref" | "gb" | "emb" | "dbj") && !pair[1].is_empty() {
                return pair[1];
            }
        }
    }
    first
}
