//! Internal stop codon audit.
//!
//! Walks every assembly → gene → mRNA of an [`Annotation`], splices and
//! translates each coding sequence, and counts the transcripts whose
//! protein has a stop before its final residue.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::genetic_code::{GeneticCode, STOP, UNKNOWN_AA};
use crate::model::{Annotation, CdsError, Mrna};

/// Errors that abort an audit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("cannot build coding sequence of mRNA '{mrna_id}': {source}")]
    Cds {
        mrna_id: String,
        #[source]
        source: CdsError,
    },

    #[error("mRNA '{mrna_id}' refers to missing assembly '{assembly_id}'")]
    MissingAssembly { mrna_id: String, assembly_id: String },
}

/// Settings for one audit run.
#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    /// Genetic code used for translation
    pub genetic_code: GeneticCode,
    /// mRNA whose CDS and translation are logged
    pub debug_mrna: Option<String>,
}

/// Counters produced by [`audit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub total_mrnas: usize,
    pub mrnas_with_stops: usize,
    /// Transcripts whose translation contains an unresolved codon (`X`)
    pub mrnas_with_ambiguous_codons: usize,
    /// Flagged transcripts, in audit order
    pub flagged: Vec<String>,
}

impl fmt::Display for AuditReport {
    /// The summary printed on stdout.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Total mRNAs found:{}", self.total_mrnas)?;
        write!(f, "mRNAs with embedded stops: {}", self.mrnas_with_stops)
    }
}

/// True if `protein` has a stop anywhere but its last position.
///
/// Only one terminal stop is forgiven: `"M**"` still counts.
pub fn has_internal_stop(protein: &str) -> bool {
    let body = protein.strip_suffix(STOP).unwrap_or(protein);
    body.contains(STOP)
}

fn coding_sequence(annotation: &Annotation, mrna: &Mrna) -> Result<String, AuditError> {
    let assembly = annotation
        .assembly(&mrna.assembly_id)
        .ok_or_else(|| AuditError::MissingAssembly {
            mrna_id: mrna.id.clone(),
            assembly_id: mrna.assembly_id.clone(),
        })?;
    mrna.coding_sequence(assembly).map_err(|source| AuditError::Cds {
        mrna_id: mrna.id.clone(),
        source,
    })
}

/// Counts transcripts, and transcripts with internal stops.
///
/// Read-only over `annotation`; the first splicing failure aborts the run.
pub fn audit(annotation: &Annotation, config: &AuditConfig) -> Result<AuditReport, AuditError> {
    let mut report = AuditReport::default();

    for assembly in annotation.assemblies() {
        for gene in annotation.genes_on(assembly) {
            for mrna in annotation.mrnas_of(gene) {
                let coding_seq = coding_sequence(annotation, mrna)?;
                report.total_mrnas += 1;

                let traced = config.debug_mrna.as_deref() == Some(mrna.id.as_str());
                if traced {
                    info!(mrna = %mrna.id, cds = %coding_seq, "CDS");
                }

                let protein = config.genetic_code.translate(&coding_seq);
                if protein.contains(UNKNOWN_AA) {
                    report.mrnas_with_ambiguous_codons += 1;
                }

                if has_internal_stop(&protein) {
                    report.mrnas_with_stops += 1;
                    debug!(mrna = %mrna.id, gene = %gene.id, "internal stop");
                    report.flagged.push(mrna.id.clone());
                    if traced {
                        info!(mrna = %mrna.id, translation = %protein, "translation with stop");
                    }
                }
            }
        }
    }

    if report.mrnas_with_ambiguous_codons > 0 {
        warn!(
            count = report.mrnas_with_ambiguous_codons,
            "mRNAs with ambiguous codons translated as X"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CdsSegment, Strand};

    /// One gene per transcript on a single assembly; each CDS is the whole
    /// slice its sequence occupies.
    fn annotation_from(cds: &[&str]) -> Annotation {
        let mut annotation = Annotation::new();
        let mut offset = 0;
        for (i, seq) in cds.iter().enumerate() {
            let gene = format!("gene{i}");
            let mrna = format!("mRNA{i}");
            annotation.add_gene(&gene, "chr1").unwrap();
            annotation.add_mrna(&mrna, &gene, "chr1").unwrap();
            if !seq.is_empty() {
                let segment = CdsSegment::new(offset + 1, offset + seq.len(), Strand::Forward);
                annotation.add_cds("cds", &mrna, "chr1", segment).unwrap();
            }
            offset += seq.len();
        }
        annotation.ensure_assembly("chr1").set_residues(cds.concat());
        annotation
    }

    #[test]
    fn test_internal_stop_detection() {
        assert!(!has_internal_stop("M*"));
        assert!(has_internal_stop("MK*RT"));
        assert!(has_internal_stop("M*RT*"));
        assert!(!has_internal_stop("MAK"));
        assert!(!has_internal_stop("*"));
        assert!(!has_internal_stop(""));
        assert!(has_internal_stop("M**"));
    }

    #[test]
    fn test_three_transcript_scenario() {
        // MAK*, M*RT*, MAK
        let annotation = annotation_from(&[
            "ATGGCTAAATAA",
            "ATGTAGCGTACTTGA",
            "ATGGCTAAA",
        ]);
        let report = audit(&annotation, &AuditConfig::default()).unwrap();

        assert_eq!(report.total_mrnas, 3);
        assert_eq!(report.mrnas_with_stops, 1);
        assert_eq!(report.flagged, ["mRNA1"]);
        assert_eq!(
            report.to_string(),
            "\nTotal mRNAs found:3\nmRNAs with embedded stops: 1"
        );
    }

    #[test]
    fn test_empty_cds_is_counted_not_flagged() {
        let mut annotation = Annotation::new();
        annotation.add_gene("g1", "chr1").unwrap();
        annotation.add_mrna("m1", "g1", "chr1").unwrap();

        // no residues anywhere: an empty CDS never needs them
        let report = audit(&annotation, &AuditConfig::default()).unwrap();
        assert_eq!(report.total_mrnas, 1);
        assert_eq!(report.mrnas_with_stops, 0);
    }

    #[test]
    fn test_lone_stop_is_not_flagged() {
        let annotation = annotation_from(&["TAA"]);
        let report = audit(&annotation, &AuditConfig::default()).unwrap();
        assert_eq!(report.mrnas_with_stops, 0);
    }

    #[test]
    fn test_missing_sequence_aborts() {
        let mut annotation = Annotation::new();
        annotation.add_gene("g1", "chr1").unwrap();
        annotation.add_mrna("m1", "g1", "chr1").unwrap();
        annotation
            .add_cds("c1", "m1", "chr1", CdsSegment::new(1, 3, Strand::Forward))
            .unwrap();

        let err = audit(&annotation, &AuditConfig::default()).unwrap_err();
        assert_eq!(
            err,
            AuditError::Cds {
                mrna_id: "m1".into(),
                source: CdsError::MissingSequence("chr1".into()),
            }
        );
    }

    #[test]
    fn test_ambiguous_codons_are_counted() {
        let annotation = annotation_from(&["ATGNNNTAA", "ATGAAATAA"]);
        let report = audit(&annotation, &AuditConfig::default()).unwrap();
        assert_eq!(report.mrnas_with_ambiguous_codons, 1);
        assert_eq!(report.mrnas_with_stops, 0);
    }

    #[test]
    fn test_genetic_code_changes_verdict() {
        // TGA is a stop in the standard code, Trp in vertebrate mitochondria
        let annotation = annotation_from(&["ATGTGAAAATAA"]);
        let standard = audit(&annotation, &AuditConfig::default()).unwrap();
        assert_eq!(standard.mrnas_with_stops, 1);

        let config = AuditConfig {
            genetic_code: crate::genetic_code::GeneticCodes::new().take(2).unwrap(),
            debug_mrna: Some("mRNA0".into()),
        };
        let mito = audit(&annotation, &config).unwrap();
        assert_eq!(mito.mrnas_with_stops, 0);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_debug_mrna_logs_cds_and_translation() {
        let annotation = annotation_from(&["ATGGCTAAATAA", "ATGTAGCGTACTTGA"]);
        let config = AuditConfig {
            debug_mrna: Some("mRNA1".into()),
            ..AuditConfig::default()
        };

        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let report = tracing::subscriber::with_default(subscriber, || audit(&annotation, &config))
            .unwrap();
        assert_eq!(report.flagged, ["mRNA1"]);

        let logged = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("cds=ATGTAGCGTACTTGA"));
        assert!(logged.contains("translation with stop"));
        assert!(logged.contains("translation=M*RT*"));
        assert!(!logged.contains("mRNA0"));
    }

    #[test]
    fn test_audit_is_idempotent() {
        let annotation = annotation_from(&["ATGTAGAAA", "ATGAAATGA"]);
        let config = AuditConfig::default();
        assert_eq!(audit(&annotation, &config), audit(&annotation, &config));
    }
}
