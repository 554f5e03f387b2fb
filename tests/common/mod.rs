#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use kmerclass_rs::kmer::reverse_complement;
use kmerclass_rs::{build_index, Configuration};

pub const REF_LEN: usize = 2000;

/// Deterministic pseudo-random DNA.
pub fn random_dna(seed: u64, len: usize) -> String {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            b"ACGT"[(state >> 33) as usize % 4] as char
        })
        .collect()
}

/// Two Escherichia species resolved through the taxonomy database and an
/// archaeal outgroup with a lineage sidecar.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub coli: String,
    pub fergusonii: String,
    pub outgroup: String,
    pub conf: Configuration,
}

impl Fixture {
    pub fn references(&self) -> PathBuf {
        self.dir.path().join("refs")
    }

    pub fn taxdb(&self) -> PathBuf {
        self.dir.path().join("taxDB")
    }

    pub fn accessions(&self) -> PathBuf {
        self.dir.path().join("accessions.tsv")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn chimera(&self) -> String {
        format!("{}{}", &self.coli[400..550], &self.fergusonii[1200..1350])
    }
}

fn wrap(seq: &str) -> String {
    seq.as_bytes()
        .chunks(70)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn write_fasta(path: &Path, header: &str, seq: &str) {
    fs::write(path, format!(">{header}\n{}\n", wrap(seq))).unwrap();
}

/// Write the references and build an index with k = 12.
pub fn indexed_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let refs = dir.path().join("refs");
    fs::create_dir_all(refs.join("archaea")).unwrap();

    let coli = random_dna(1, REF_LEN);
    let fergusonii = random_dna(2, REF_LEN);
    let outgroup = random_dna(3, REF_LEN);
    write_fasta(&refs.join("coli.fna"), "NC_000913.3 Escherichia coli", &coli);
    write_fasta(&refs.join("fergusonii.fa"), "NC_011740.1 Escherichia fergusonii", &fergusonii);
    let archaeon = refs.join("archaea").join("methanocaldococcus.fasta");
    write_fasta(&archaeon, "NC_000909.1 Methanocaldococcus jannaschii", &outgroup);
    fs::write(
        refs.join("archaea").join("methanocaldococcus.fasta.taxonomy"),
        r#"{"tree": [
            {"taxid": 1, "name": "root", "parent": 1, "rank": "no rank"},
            {"taxid": 2157, "name": "Archaea", "parent": 1, "rank": "superkingdom"},
            {"taxid": 2190, "name": "Methanocaldococcus jannaschii", "parent": 2157, "rank": "species"}
        ]}"#,
    )
    .unwrap();

    fs::write(
        dir.path().join("taxDB"),
        "1\t1\troot\tno rank\n\
         2\t1\tBacteria\tsuperkingdom\n\
         561\t2\tEscherichia\tgenus\n\
         562\t561\tEscherichia coli\tspecies\n\
         564\t561\tEscherichia fergusonii\tspecies\n",
    )
    .unwrap();
    fs::write(dir.path().join("accessions.tsv"), "NC_000913\t562\nNC_011740.1\t564\n").unwrap();

    let conf = Configuration {
        index_path: dir.path().join("index"),
        kmer_size: 12,
        kmer_skips: 5,
        query_min_should_match: 0.3,
        worker_threads: 2,
        ..Configuration::default()
    };

    let fixture = Fixture {
        dir,
        coli,
        fergusonii,
        outgroup,
        conf,
    };
    let summary = build_index(
        &fixture.conf,
        &[fixture.references()],
        Some(&fixture.taxdb()),
        Some(&fixture.accessions()),
    )
    .unwrap();
    assert_eq!(summary.records, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.meta.doc_count, 6);
    fixture
}

/// A 150 base read off the reverse strand of `seq`.
pub fn reverse_read(seq: &str, start: usize) -> String {
    reverse_complement(&seq[start..start + 150])
}
