//src/kmer.rs

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmerError {
    #[error("k-mer size must be greater than zero")]
    InvalidKmerSize,

    #[error("cannot compress non-ATGC base '{0}'")]
    InvalidBase(char),

    #[error("compressed k-mer is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("compressed k-mer holds {found} bytes, expected {expected} for k={k}")]
    LengthMismatch { k: usize, expected: usize, found: usize },
}

/// Complement of a single upper-case base. Anything outside ATGC maps to 'N'.
#[inline]
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        _ => b'N',
    }
}

/// Reverse complement of a nucleotide string.
pub fn reverse_complement(seq: &str) -> String {
    seq.bytes().rev().map(|b| complement(b) as char).collect()
}

/// Lexicographically smaller of `(kmer, revcomp(kmer))`.
pub fn canonicalize(kmer: &str) -> String {
    let rc = reverse_complement(kmer);
    if rc.as_str() < kmer {
        rc
    } else {
        kmer.to_string()
    }
}

#[inline]
fn is_acgt(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

#[inline]
fn encode_base(b: u8) -> Option<u8> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

const DECODE_BASES: [char; 4] = ['A', 'C', 'G', 'T'];

/// Pack a k-mer into 2 bits per base (four bases per byte, first base in the
/// high bits) and render the bytes as base64.
pub fn compress(kmer: &str) -> Result<String, KmerError> {
    let bytes = kmer.as_bytes();
    let mut packed = vec![0u8; bytes.len().div_ceil(4)];
    for (i, &b) in bytes.iter().enumerate() {
        let code = encode_base(b).ok_or(KmerError::InvalidBase(b as char))?;
        packed[i / 4] |= code << (6 - 2 * (i % 4));
    }
    Ok(STANDARD.encode(packed))
}

/// Inverse of [`compress`] for a k-mer of length `k`.
pub fn decompress(encoded: &str, k: usize) -> Result<String, KmerError> {
    let packed = STANDARD.decode(encoded)?;
    let expected = k.div_ceil(4);
    if packed.len() != expected {
        return Err(KmerError::LengthMismatch {
            k,
            expected,
            found: packed.len(),
        });
    }
    let mut out = String::with_capacity(k);
    for i in 0..k {
        let code = (packed[i / 4] >> (6 - 2 * (i % 4))) & 0b11;
        out.push(DECODE_BASES[code as usize]);
    }
    Ok(out)
}

/// One k-mer window of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Byte offset of the window start.
    pub offset: usize,
    pub kmer: &'a str,
}

/// Sliding window over a sequence with stride `1 + skip`.
///
/// Windows containing anything other than `A`, `C`, `G`, `T` are dropped. While
/// walking through such a stretch the stride falls back to 1, and the step
/// taken right after the first valid window past the stretch is 1 as well;
/// the configured stride applies again from the window after that.
pub struct KmerTokens<'a> {
    seq: &'a str,
    k: usize,
    skip: usize,
    pos: usize,
}

impl<'a> Iterator for KmerTokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let bytes = self.seq.as_bytes();
        let mut cur_skip = self.skip;
        loop {
            if self.pos + self.k > bytes.len() {
                // exhausted; park the cursor so later calls stay empty
                self.pos = bytes.len();
                return None;
            }
            let start = self.pos;
            let window = &bytes[start..start + self.k];
            if window.iter().all(|&b| is_acgt(b)) {
                self.pos += 1 + cur_skip;
                return Some(Token {
                    offset: start,
                    kmer: &self.seq[start..start + self.k],
                });
            }
            cur_skip = 0;
            self.pos += 1;
        }
    }
}

/// Tokenize `seq` into k-mers. See [`KmerTokens`] for the stride rules.
pub fn tokenize(seq: &str, k: usize, skip: usize) -> Result<KmerTokens<'_>, KmerError> {
    if k < 1 {
        return Err(KmerError::InvalidKmerSize);
    }
    Ok(KmerTokens { seq, k, skip, pos: 0 })
}

/// A term as it is stored in or looked up from the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub offset: usize,
    pub text: String,
}

/// Tokenizer plus the optional canonical-strand and compression filters,
/// applied in that order. Index and query side must agree on every setting
/// except `skip`.
#[derive(Debug, Clone, Copy)]
pub struct KmerAnalyzer {
    pub k: usize,
    pub skip: usize,
    pub canonical: bool,
    pub compress: bool,
}

impl KmerAnalyzer {
    pub fn new(k: usize, skip: usize, canonical: bool) -> Self {
        Self {
            k,
            skip,
            canonical,
            compress: true,
        }
    }

    /// Same analyzer with a different stride.
    pub fn with_skip(&self, skip: usize) -> Self {
        Self { skip, ..*self }
    }

    pub fn analyze(&self, seq: &str) -> Result<Vec<Term>, KmerError> {
        let mut terms = Vec::with_capacity(seq.len() / (self.skip + 1) + 1);
        for token in tokenize(seq, self.k, self.skip)? {
            let mut text = if self.canonical {
                canonicalize(token.kmer)
            } else {
                token.kmer.to_string()
            };
            if self.compress {
                text = compress(&text)?;
            }
            terms.push(Term {
                offset: token.offset,
                text,
            });
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(seq: &str, k: usize, skip: usize) -> Vec<usize> {
        tokenize(seq, k, skip).unwrap().map(|t| t.offset).collect()
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ATGC"), "GCAT");
        assert_eq!(reverse_complement("AANT"), "ANTT");
        assert_eq!(reverse_complement(""), "");
    }

    #[test]
    fn test_canonicalize_picks_smaller_strand() {
        assert_eq!(canonicalize("TTTT"), "AAAA");
        assert_eq!(canonicalize("AAAA"), "AAAA");
        assert_eq!(canonicalize("GATC"), "GATC"); // palindrome
        assert_eq!(canonicalize("CGTA"), canonicalize("TACG"));
    }

    #[test]
    fn test_tokenize_plain_stride() {
        assert_eq!(offsets("ACGTACGTAC", 4, 0), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(offsets("ACGTACGTAC", 4, 2), vec![0, 3, 6]);
    }

    #[test]
    fn test_tokenize_short_sequence_is_empty() {
        assert!(offsets("ACG", 4, 0).is_empty());
        assert!(offsets("", 1, 0).is_empty());
    }

    #[test]
    fn test_tokenize_rejects_zero_k() {
        assert!(matches!(tokenize("ACGT", 0, 0), Err(KmerError::InvalidKmerSize)));
    }

    #[test]
    fn test_tokenize_drops_ambiguous_windows() {
        let tokens: Vec<_> = tokenize("ACNGTA", 2, 0).unwrap().map(|t| t.kmer).collect();
        assert_eq!(tokens, vec!["AC", "GT", "TA"]);
    }

    #[test]
    fn test_tokenize_stride_collapses_around_ambiguity() {
        // k=3, skip=2, N at 10
        let seq = "ACGTACGTAGNACGTACGTACG";
        let offs = offsets(seq, 3, 2);
        // clean prefix steps by 3
        assert_eq!(&offs[..3], &[0, 3, 6]);
        // first window clear of the N starts at 11, the next one right after it
        let after = offs.iter().position(|&o| o > 10).unwrap();
        assert_eq!(offs[after], 11);
        assert_eq!(offs[after + 1] - offs[after], 1);
        // then the stride is back
        assert_eq!(offs[after + 2] - offs[after + 1], 3);
    }

    #[test]
    fn test_tokenize_is_lowercase_strict() {
        assert!(offsets("acgt", 2, 0).is_empty());
    }

    #[test]
    fn test_compress_roundtrip_and_size() {
        let kmer = "ACGTTGCAAC";
        let enc = compress(kmer).unwrap();
        assert_eq!(decompress(&enc, kmer.len()).unwrap(), kmer);
        // 10 bases -> 3 bytes -> 4 base64 chars
        assert_eq!(enc.len(), 4);
    }

    #[test]
    fn test_compress_rejects_ambiguous() {
        assert!(matches!(compress("ACNT"), Err(KmerError::InvalidBase('N'))));
    }

    #[test]
    fn test_decompress_length_mismatch() {
        let enc = compress("ACGTACGT").unwrap();
        assert!(matches!(
            decompress(&enc, 12),
            Err(KmerError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_analyzer_canonical_strands_agree() {
        let analyzer = KmerAnalyzer::new(5, 0, true);
        let seq = "ACGGTCATTGCA";
        let fwd: Vec<String> = analyzer.analyze(seq).unwrap().into_iter().map(|t| t.text).collect();
        let mut rev: Vec<String> = analyzer
            .analyze(&reverse_complement(seq))
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        rev.reverse();
        assert_eq!(fwd, rev);
    }
}
