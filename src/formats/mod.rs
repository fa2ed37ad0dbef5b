//! Annotation and sequence file readers.
//!
//! - GFF3 (.gff, .gff3), optionally with an embedded `##FASTA` section
//! - FASTA genomes (.fa, .fasta, .fna, ...)
//!
//! Both readers accept gzip-compressed input, detected from the `.gz`
//! extension or the gzip magic bytes.

pub mod fasta;
pub mod gff3;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use thiserror::Error;
use tracing::debug;

use crate::model::Annotation;
use fasta::{merge_fasta, parse_fasta_file, FastaError};
use gff3::{parse_gff3_file, GffError, LoadStats};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors that can occur while loading the inputs of a run.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("GFF3 error in {path}: {source}")]
    Gff {
        path: PathBuf,
        #[source]
        source: GffError,
    },

    #[error("FASTA error in {path}: {source}")]
    Fasta {
        path: PathBuf,
        #[source]
        source: FastaError,
    },
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Opens a file for buffered line reading, decompressing gzip transparently.
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);

    let by_extension = path.extension().and_then(|s| s.to_str()) == Some("gz");
    let by_magic = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    if by_extension || by_magic {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Loads a GFF3 annotation and, if given, merges a genome FASTA over it.
///
/// Sequence embedded in the GFF3 is applied first; the genome FASTA then
/// overwrites any assembly it names.
pub fn load_annotation(gff3: &Path, genome_fasta: Option<&Path>) -> LoadResult<Annotation> {
    let (mut annotation, stats): (Annotation, LoadStats) =
        parse_gff3_file(gff3).map_err(|source| LoadError::Gff {
            path: gff3.to_path_buf(),
            source,
        })?;

    if let Some(path) = genome_fasta {
        let records = parse_fasta_file(path).map_err(|source| LoadError::Fasta {
            path: path.to_path_buf(),
            source,
        })?;
        let updated = merge_fasta(&mut annotation, records);
        debug!(updated, path = %path.display(), "genome FASTA merged");
    }

    let unsequenced = annotation
        .assemblies()
        .filter(|a| a.residues.is_none())
        .count();
    if unsequenced > 0 {
        debug!(
            unsequenced,
            embedded = stats.embedded_sequences,
            "assemblies without sequence"
        );
    }
    Ok(annotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_plain_input() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, ">chr1\nACGT\n").unwrap();

        let mut content = String::new();
        open_input(file.path())
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, ">chr1\nACGT\n");
    }

    #[test]
    fn test_open_gzip_by_magic() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b">chr1\nACGT\n").unwrap();
        let compressed = encoder.finish().unwrap();

        // no .gz extension, detection falls back to the magic bytes
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&compressed).unwrap();

        let records = parse_fasta_file(file.path()).unwrap();
        assert_eq!(records[0].sequence, "ACGT");
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let mut gff = NamedTempFile::new().unwrap();
        writeln!(gff, "chr1\tbroken").unwrap();

        let err = load_annotation(gff.path(), None).unwrap_err();
        assert!(matches!(err, LoadError::Gff { .. }));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_load_missing_fasta() {
        let mut gff = NamedTempFile::new().unwrap();
        writeln!(gff, "##gff-version 3").unwrap();

        let err = load_annotation(gff.path(), Some(Path::new("/nonexistent/genome.fa"))).unwrap_err();
        assert!(matches!(err, LoadError::Fasta { .. }));
    }
}
