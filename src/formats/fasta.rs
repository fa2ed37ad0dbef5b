//! FASTA file parser and genome merge.
//!
//! This module handles reading FASTA genome files, standalone or as the
//! trailing `##FASTA` section of a GFF3 file, and copying their sequences
//! onto the matching assemblies.
//!
//! ## FASTA Format
//!
//! ```text
//! >sequence_identifier optional description
//! ACGTACGTACGT...
//! >another_sequence
//! TGCATGCATGCA...
//! ```

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::open_input;
use crate::model::Annotation;

/// Errors that can occur during FASTA parsing.
#[derive(Error, Debug)]
pub enum FastaError {
    #[error("Failed to read FASTA: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Empty FASTA file")]
    EmptyFile,

    #[error("Invalid FASTA format: {0}")]
    InvalidFormat(String),

    #[error("Sequence without header at line {0}")]
    SequenceWithoutHeader(usize),
}

/// Result type for FASTA operations.
pub type FastaResult<T> = Result<T, FastaError>;

/// One FASTA entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// Header text before the first whitespace, without '>'
    pub id: String,
    pub sequence: String,
}

/// Incremental FASTA reader, fed one line at a time.
///
/// Shared by the standalone parser and the GFF3 loader, which hands over
/// the lines following a `##FASTA` directive.
#[derive(Debug, Default)]
pub(crate) struct FastaBuilder {
    records: Vec<FastaRecord>,
    current_id: Option<String>,
    current_seq: String,
}

impl FastaBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Consumes one line; `line_number` is only used for error messages.
    pub(crate) fn push_line(&mut self, line: &str, line_number: usize) -> FastaResult<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(header) = line.strip_prefix('>') {
            self.flush();

            let id = header.split_whitespace().next().unwrap_or(header);
            if id.is_empty() {
                return Err(FastaError::InvalidFormat(format!(
                    "Empty sequence identifier at line {}",
                    line_number
                )));
            }
            self.current_id = Some(id.to_string());
        } else {
            if self.current_id.is_none() {
                return Err(FastaError::SequenceWithoutHeader(line_number));
            }

            // Fast append: most FASTA lines don't have internal whitespace
            if line.bytes().all(|b| !b.is_ascii_whitespace()) {
                self.current_seq.push_str(line);
            } else {
                self.current_seq
                    .extend(line.chars().filter(|c| !c.is_whitespace()));
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(id) = self.current_id.take() {
            let mut sequence = std::mem::take(&mut self.current_seq);
            sequence.shrink_to_fit();
            self.records.push(FastaRecord { id, sequence });
        }
    }

    /// Returns every record read so far, including ones with no residues.
    pub(crate) fn finish(mut self) -> Vec<FastaRecord> {
        self.flush();
        self.records
    }
}

/// Parses FASTA content from a reader.
///
/// This function handles both single-line and multi-line sequences.
pub fn parse_fasta<R: BufRead>(reader: R) -> FastaResult<Vec<FastaRecord>> {
    let mut builder = FastaBuilder::new();
    for (idx, line_result) in reader.lines().enumerate() {
        builder.push_line(&line_result?, idx + 1)?;
    }

    let records = builder.finish();
    if records.is_empty() {
        return Err(FastaError::EmptyFile);
    }
    Ok(records)
}

/// Parses a FASTA file, plain or gzip-compressed.
///
/// # Examples
///
/// ```no_run
/// use stopcheck::formats::fasta::parse_fasta_file;
///
/// let records = parse_fasta_file("genome.fasta").unwrap();
/// println!("Loaded {} sequences", records.len());
/// ```
pub fn parse_fasta_file<P: AsRef<Path>>(path: P) -> FastaResult<Vec<FastaRecord>> {
    parse_fasta(open_input(path.as_ref())?)
}

/// Parses FASTA content from a string.
///
/// Useful for testing or processing in-memory data.
pub fn parse_fasta_str(content: &str) -> FastaResult<Vec<FastaRecord>> {
    parse_fasta(content.as_bytes())
}

/// Copies FASTA sequences onto same-named assemblies.
///
/// Assemblies without a matching record keep whatever residues they had.
/// Records naming no known assembly are ignored. Returns the number of
/// assemblies updated.
pub fn merge_fasta(annotation: &mut Annotation, records: Vec<FastaRecord>) -> usize {
    let mut by_id: HashMap<String, String> = records
        .into_iter()
        .map(|record| (record.id, record.sequence))
        .collect();

    let ids: Vec<String> = annotation.assemblies().map(|a| a.id.clone()).collect();
    let mut updated = 0;
    for id in ids {
        if let (Some(sequence), Some(assembly)) = (by_id.remove(&id), annotation.assembly_mut(&id)) {
            assembly.set_residues(sequence);
            updated += 1;
        }
    }

    if !by_id.is_empty() {
        debug!(unused = by_id.len(), "FASTA sequences with no matching assembly");
    }
    updated
}
