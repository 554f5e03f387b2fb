//src/fasta.rs

use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// File name suffixes recognised as FASTA, compressed or not.
pub const FASTA_EXTENSIONS: [&str; 8] = [
    ".fa", ".fa.gz", ".ffn", ".ffn.gz", ".fna", ".fna.gz", ".fasta", ".fasta.gz",
];

/// Sidecar suffix holding a reference file's lineage JSON.
pub const TAXONOMY_SUFFIX: &str = ".taxonomy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaEntry {
    /// Header without the leading '>'
    pub header: String,
    /// Concatenated, upper-cased sequence lines
    pub sequence: String,
}

/// Streaming FASTA parser.
pub struct FastaReader<R: BufRead> {
    reader: R,
    line: String,
    next_header: Option<String>,
    done: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            next_header: None,
            done: false,
        }
    }

    fn read_entry(&mut self) -> io::Result<Option<FastaEntry>> {
        // find the first header
        while self.next_header.is_none() {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if let Some(h) = self.line.trim_end().strip_prefix('>') {
                self.next_header = Some(h.to_string());
            }
        }

        let header = self.next_header.take().unwrap_or_default();
        let mut sequence = String::new();
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                self.done = true;
                break;
            }
            let trimmed = self.line.trim_end();
            if let Some(h) = trimmed.strip_prefix('>') {
                self.next_header = Some(h.to_string());
                break;
            }
            // ';' comment lines are legal in old FASTA
            if trimmed.starts_with(';') {
                continue;
            }
            sequence.extend(trimmed.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_uppercase()));
        }
        Ok(Some(FastaEntry { header, sequence }))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = io::Result<FastaEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done && self.next_header.is_none() {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.next_header = None;
                Some(Err(e))
            }
        }
    }
}

/// Open a FASTA file, transparently decompressing `.gz`.
pub fn open_fasta<P: AsRef<Path>>(path: P) -> io::Result<FastaReader<Box<dyn BufRead + Send>>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead + Send> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(FastaReader::new(reader))
}

/// Read every record of a FASTA(.gz) file.
pub fn read_fasta_records<P: AsRef<Path>>(path: P) -> io::Result<Vec<FastaEntry>> {
    open_fasta(path)?.collect()
}

pub fn is_fasta_file<P: AsRef<Path>>(path: P) -> bool {
    let name = match path.as_ref().file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    FASTA_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// FASTA files at `path`: the file itself, or every FASTA file below a
/// directory, recursively, in sorted order.
pub fn find_fasta_files<P: AsRef<Path>>(path: P) -> io::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("path {} does not exist", path.display()),
        ));
    }
    let mut out = Vec::new();
    if path.is_file() {
        if is_fasta_file(path) {
            out.push(path.to_path_buf());
        }
        return Ok(out);
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(path)?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<_>>()?;
    entries.sort();
    for entry in entries {
        if entry.is_dir() {
            out.extend(find_fasta_files(&entry)?);
        } else if is_fasta_file(&entry) {
            out.push(entry);
        }
    }
    Ok(out)
}

/// Strip a FASTA suffix (and `.gz`) from a file name.
fn fasta_stem(name: &str) -> &str {
    let lower = name.to_lowercase();
    FASTA_EXTENSIONS
        .iter()
        .filter(|ext| lower.ends_with(*ext))
        .map(|ext| &name[..name.len() - ext.len()])
        .min_by_key(|stem| stem.len())
        .unwrap_or(name)
}

/// Lineage sidecar for a reference file: `<file>.taxonomy`, else
/// `<stem>.taxonomy` next to it.
pub fn find_taxonomy_sidecar<P: AsRef<Path>>(fasta: P) -> Option<PathBuf> {
    let fasta = fasta.as_ref();
    let name = fasta.file_name()?.to_string_lossy().to_string();
    let dir = fasta.parent().unwrap_or_else(|| Path::new(""));

    let full = dir.join(format!("{name}{TAXONOMY_SUFFIX}"));
    if full.is_file() {
        return Some(full);
    }
    let stem = dir.join(format!("{}{TAXONOMY_SUFFIX}", fasta_stem(&name)));
    if stem.is_file() {
        return Some(stem);
    }
    None
}

/// File name without directories, as stored on indexed documents.
pub fn display_name<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
