//! Data model for loaded gene annotations.
//!
//! This module contains the data structures for representing:
//! - Assemblies (molecules) and their nucleotide residues
//! - Genes, mRNAs and CDS segments
//! - The annotation arena that owns all of them
//!
//! Parents own their children through index vectors. Children refer back to
//! their parents by identifier, so the graph has no reference cycles.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Strand of a feature relative to its assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strand {
    /// Plus strand (+)
    Forward,
    /// Minus strand (-)
    Reverse,
    /// Unknown or unstranded (`.` or `?`)
    #[default]
    Unknown,
}

impl Strand {
    /// Parses a GFF3 strand column.
    pub fn from_column(column: &str) -> Option<Self> {
        match column {
            "+" => Some(Strand::Forward),
            "-" => Some(Strand::Reverse),
            "." | "?" => Some(Strand::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
            Strand::Unknown => write!(f, "."),
        }
    }
}

/// One CDS line of a transcript, in 1-based inclusive assembly coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdsSegment {
    pub start: usize,
    pub end: usize,
    pub strand: Strand,
    /// Column 8 of the GFF3 line, kept for reference only.
    pub phase: Option<u8>,
}

impl CdsSegment {
    pub fn new(start: usize, end: usize, strand: Strand) -> Self {
        Self {
            start,
            end,
            strand,
            phase: None,
        }
    }

    /// Number of bases covered by the segment.
    fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }
}

/// Errors raised while splicing a transcript's coding sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CdsError {
    #[error("assembly '{0}' has no sequence (embed a ##FASTA section or pass a genome FASTA)")]
    MissingSequence(String),

    #[error("CDS segments lie on different strands")]
    MixedStrands,

    #[error("CDS segment {second_start}.. overlaps the segment ending at {first_end}")]
    OverlappingSegments { first_end: usize, second_start: usize },

    #[error("CDS segment {start}..{end} lies outside assembly '{assembly}' (length {length})")]
    OutOfBounds {
        assembly: String,
        start: usize,
        end: usize,
        length: usize,
    },
}

/// A molecule (chromosome, contig, scaffold) that features are located on.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub id: String,
    /// Nucleotide sequence, once known
    pub residues: Option<String>,
    /// Declared or measured sequence length
    pub length: Option<usize>,
    genes: Vec<usize>,
}

impl Assembly {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Replaces the residues and recomputes the length from them.
    pub fn set_residues(&mut self, residues: impl Into<String>) {
        let residues = residues.into();
        self.length = Some(residues.chars().count());
        self.residues = Some(residues);
    }

    /// Number of genes located on this assembly.
    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }
}

#[derive(Debug, Clone)]
pub struct Gene {
    pub id: String,
    /// Assembly this gene is located on
    pub assembly_id: String,
    mrnas: Vec<usize>,
}

impl Gene {
    pub fn mrna_count(&self) -> usize {
        self.mrnas.len()
    }
}

/// A protein-coding transcript.
#[derive(Debug, Clone)]
pub struct Mrna {
    pub id: String,
    pub gene_id: String,
    pub assembly_id: String,
    /// CDS segments in file order
    pub segments: Vec<CdsSegment>,
}

impl Mrna {
    /// Splices the coding sequence out of `assembly`, 5' to 3'.
    ///
    /// Segments are ordered by start coordinate and concatenated. On the
    /// reverse strand the spliced sequence is reverse-complemented. A
    /// transcript without segments yields an empty string and does not
    /// need the assembly residues.
    pub fn coding_sequence(&self, assembly: &Assembly) -> Result<String, CdsError> {
        let Some(first) = self.segments.first() else {
            return Ok(String::new());
        };
        let strand = first.strand;
        if self.segments.iter().any(|s| s.strand != strand) {
            return Err(CdsError::MixedStrands);
        }

        let residues = assembly
            .residues
            .as_deref()
            .ok_or_else(|| CdsError::MissingSequence(assembly.id.clone()))?;

        let mut ordered: Vec<&CdsSegment> = self.segments.iter().collect();
        ordered.sort_by_key(|s| (s.start, s.end));

        let mut spliced = String::with_capacity(ordered.iter().map(|s| s.len()).sum());
        let mut previous_end: Option<usize> = None;
        for segment in ordered {
            if let Some(first_end) = previous_end.filter(|&end| segment.start <= end) {
                return Err(CdsError::OverlappingSegments {
                    first_end,
                    second_start: segment.start,
                });
            }
            let slice = segment
                .start
                .checked_sub(1)
                .and_then(|from| residues.get(from..segment.end))
                .ok_or_else(|| CdsError::OutOfBounds {
                    assembly: assembly.id.clone(),
                    start: segment.start,
                    end: segment.end,
                    length: residues.chars().count(),
                })?;
            spliced.push_str(slice);
            previous_end = Some(segment.end);
        }

        if strand == Strand::Reverse {
            Ok(reverse_complement(&spliced))
        } else {
            Ok(spliced)
        }
    }
}

/// Complement of one nucleotide, IUPAC codes included. Case is preserved.
fn complement(base: char) -> char {
    let upper = match base.to_ascii_uppercase() {
        'A' => 'T',
        'T' | 'U' => 'A',
        'C' => 'G',
        'G' => 'C',
        'R' => 'Y',
        'Y' => 'R',
        'S' => 'S',
        'W' => 'W',
        'K' => 'M',
        'M' => 'K',
        'B' => 'V',
        'V' => 'B',
        'D' => 'H',
        'H' => 'D',
        _ => 'N',
    };
    if base.is_ascii_lowercase() {
        upper.to_ascii_lowercase()
    } else {
        upper
    }
}

/// Reverse complement of a nucleotide string.
pub fn reverse_complement(sequence: &str) -> String {
    sequence.chars().rev().map(complement).collect()
}

/// Errors raised while linking features into the annotation tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("duplicate feature ID '{0}'")]
    DuplicateId(String),

    #[error("'{child}' refers to unknown parent '{parent}'")]
    UnknownParent { child: String, parent: String },

    #[error("'{child}' is on '{found}' but its parent is on '{expected}'")]
    SeqidMismatch {
        child: String,
        expected: String,
        found: String,
    },
}

/// All assemblies, genes and mRNAs of one annotation file.
///
/// Iteration follows insertion order at every level.
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    assemblies: Vec<Assembly>,
    assembly_index: HashMap<String, usize>,
    genes: Vec<Gene>,
    gene_index: HashMap<String, usize>,
    mrnas: Vec<Mrna>,
    mrna_index: HashMap<String, usize>,
}

impl Annotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the assembly with this id, creating it if needed.
    pub fn ensure_assembly(&mut self, id: &str) -> &mut Assembly {
        let idx = match self.assembly_index.get(id) {
            Some(&idx) => idx,
            None => {
                self.assemblies.push(Assembly::new(id));
                let idx = self.assemblies.len() - 1;
                self.assembly_index.insert(id.to_string(), idx);
                idx
            }
        };
        &mut self.assemblies[idx]
    }

    /// Adds a gene on `assembly_id`, creating the assembly if needed.
    pub fn add_gene(&mut self, id: &str, assembly_id: &str) -> Result<(), LinkError> {
        if self.gene_index.contains_key(id) {
            return Err(LinkError::DuplicateId(id.to_string()));
        }
        let gene_idx = self.genes.len();
        self.ensure_assembly(assembly_id).genes.push(gene_idx);
        self.genes.push(Gene {
            id: id.to_string(),
            assembly_id: assembly_id.to_string(),
            mrnas: Vec::new(),
        });
        self.gene_index.insert(id.to_string(), gene_idx);
        Ok(())
    }

    /// Adds an mRNA under an existing gene on the same assembly.
    pub fn add_mrna(&mut self, id: &str, gene_id: &str, seqid: &str) -> Result<(), LinkError> {
        if self.mrna_index.contains_key(id) {
            return Err(LinkError::DuplicateId(id.to_string()));
        }
        let gene_idx = *self
            .gene_index
            .get(gene_id)
            .ok_or_else(|| LinkError::UnknownParent {
                child: id.to_string(),
                parent: gene_id.to_string(),
            })?;
        let gene = &mut self.genes[gene_idx];
        if gene.assembly_id != seqid {
            return Err(LinkError::SeqidMismatch {
                child: id.to_string(),
                expected: gene.assembly_id.clone(),
                found: seqid.to_string(),
            });
        }

        let mrna_idx = self.mrnas.len();
        gene.mrnas.push(mrna_idx);
        self.mrnas.push(Mrna {
            id: id.to_string(),
            gene_id: gene_id.to_string(),
            assembly_id: gene.assembly_id.clone(),
            segments: Vec::new(),
        });
        self.mrna_index.insert(id.to_string(), mrna_idx);
        Ok(())
    }

    /// Appends a CDS segment to an existing mRNA on the same assembly.
    pub fn add_cds(
        &mut self,
        cds_id: &str,
        mrna_id: &str,
        seqid: &str,
        segment: CdsSegment,
    ) -> Result<(), LinkError> {
        let mrna_idx = *self
            .mrna_index
            .get(mrna_id)
            .ok_or_else(|| LinkError::UnknownParent {
                child: cds_id.to_string(),
                parent: mrna_id.to_string(),
            })?;
        let mrna = &mut self.mrnas[mrna_idx];
        if mrna.assembly_id != seqid {
            return Err(LinkError::SeqidMismatch {
                child: cds_id.to_string(),
                expected: mrna.assembly_id.clone(),
                found: seqid.to_string(),
            });
        }
        mrna.segments.push(segment);
        Ok(())
    }

    pub fn assemblies(&self) -> impl Iterator<Item = &Assembly> {
        self.assemblies.iter()
    }

    pub fn assembly(&self, id: &str) -> Option<&Assembly> {
        self.assembly_index.get(id).map(|&idx| &self.assemblies[idx])
    }

    pub fn assembly_mut(&mut self, id: &str) -> Option<&mut Assembly> {
        self.assembly_index
            .get(id)
            .map(|&idx| &mut self.assemblies[idx])
    }

    pub fn gene(&self, id: &str) -> Option<&Gene> {
        self.gene_index.get(id).map(|&idx| &self.genes[idx])
    }

    pub fn mrna(&self, id: &str) -> Option<&Mrna> {
        self.mrna_index.get(id).map(|&idx| &self.mrnas[idx])
    }

    /// Genes located on `assembly`, in insertion order.
    pub fn genes_on<'a>(&'a self, assembly: &'a Assembly) -> impl Iterator<Item = &'a Gene> {
        assembly.genes.iter().map(move |&idx| &self.genes[idx])
    }

    /// mRNAs of `gene`, in insertion order.
    pub fn mrnas_of<'a>(&'a self, gene: &'a Gene) -> impl Iterator<Item = &'a Mrna> {
        gene.mrnas.iter().map(move |&idx| &self.mrnas[idx])
    }

    pub fn assembly_count(&self) -> usize {
        self.assemblies.len()
    }

    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }

    pub fn mrna_count(&self) -> usize {
        self.mrnas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly_with(residues: &str) -> Assembly {
        let mut assembly = Assembly::new("chr1");
        assembly.set_residues(residues);
        assembly
    }

    fn mrna_with(segments: Vec<CdsSegment>) -> Mrna {
        Mrna {
            id: "mRNA1".into(),
            gene_id: "gene1".into(),
            assembly_id: "chr1".into(),
            segments,
        }
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ATGC"), "GCAT");
        assert_eq!(reverse_complement("aTgN"), "NcAt");
        assert_eq!(reverse_complement("RYKM"), "KMRY");
        assert_eq!(reverse_complement(""), "");
    }

    #[test]
    fn test_set_residues_updates_length() {
        let assembly = assembly_with("ACGTACGT");
        assert_eq!(assembly.length, Some(8));
        assert_eq!(assembly.residues.as_deref(), Some("ACGTACGT"));
    }

    #[test]
    fn test_forward_splice_sorts_segments() {
        //                        1234567890123
        let assembly = assembly_with("ATGAAACCCTAAG");
        let mrna = mrna_with(vec![
            CdsSegment::new(10, 12, Strand::Forward),
            CdsSegment::new(1, 6, Strand::Forward),
        ]);
        assert_eq!(mrna.coding_sequence(&assembly).unwrap(), "ATGAAATAA");
    }

    #[test]
    fn test_reverse_splice() {
        // minus-strand ATG AAA TAA laid out as its reverse complement
        let assembly = assembly_with("TTATTTCAT");
        let mrna = mrna_with(vec![
            CdsSegment::new(1, 3, Strand::Reverse),
            CdsSegment::new(4, 9, Strand::Reverse),
        ]);
        assert_eq!(mrna.coding_sequence(&assembly).unwrap(), "ATGAAATAA");
    }

    #[test]
    fn test_empty_transcript_needs_no_sequence() {
        let assembly = Assembly::new("chr1");
        let mrna = mrna_with(Vec::new());
        assert_eq!(mrna.coding_sequence(&assembly).unwrap(), "");
    }

    #[test]
    fn test_splice_errors() {
        let bare = Assembly::new("chr1");
        let mrna = mrna_with(vec![CdsSegment::new(1, 3, Strand::Forward)]);
        assert_eq!(
            mrna.coding_sequence(&bare),
            Err(CdsError::MissingSequence("chr1".into()))
        );

        let assembly = assembly_with("ATGAAA");
        let past_end = mrna_with(vec![CdsSegment::new(4, 9, Strand::Forward)]);
        assert!(matches!(
            past_end.coding_sequence(&assembly),
            Err(CdsError::OutOfBounds { length: 6, .. })
        ));

        // length is counted in characters, as on the assembly
        let accented = assembly_with("ACGTé");
        let err = past_end.coding_sequence(&accented).unwrap_err();
        assert!(matches!(err, CdsError::OutOfBounds { length: 5, .. }));
        assert_eq!(accented.length, Some(5));

        let zero = mrna_with(vec![CdsSegment::new(0, 3, Strand::Forward)]);
        assert!(matches!(
            zero.coding_sequence(&assembly),
            Err(CdsError::OutOfBounds { .. })
        ));

        let overlapping = mrna_with(vec![
            CdsSegment::new(1, 4, Strand::Forward),
            CdsSegment::new(4, 6, Strand::Forward),
        ]);
        assert_eq!(
            overlapping.coding_sequence(&assembly),
            Err(CdsError::OverlappingSegments {
                first_end: 4,
                second_start: 4
            })
        );

        let mixed = mrna_with(vec![
            CdsSegment::new(1, 3, Strand::Forward),
            CdsSegment::new(4, 6, Strand::Reverse),
        ]);
        assert_eq!(mixed.coding_sequence(&assembly), Err(CdsError::MixedStrands));
    }

    #[test]
    fn test_annotation_linking() {
        let mut annotation = Annotation::new();
        annotation.add_gene("gene1", "chr1").unwrap();
        annotation.add_mrna("mRNA1", "gene1", "chr1").unwrap();
        annotation
            .add_cds("cds1", "mRNA1", "chr1", CdsSegment::new(1, 3, Strand::Forward))
            .unwrap();

        assert_eq!(annotation.assembly_count(), 1);
        assert_eq!(annotation.gene("gene1").unwrap().mrna_count(), 1);
        assert_eq!(annotation.mrna("mRNA1").unwrap().segments.len(), 1);
        assert_eq!(annotation.assembly("chr1").unwrap().gene_count(), 1);

        assert_eq!(
            annotation.add_gene("gene1", "chr2"),
            Err(LinkError::DuplicateId("gene1".into()))
        );
        assert!(matches!(
            annotation.add_mrna("mRNA2", "nope", "chr1"),
            Err(LinkError::UnknownParent { .. })
        ));
        assert!(matches!(
            annotation.add_mrna("mRNA2", "gene1", "chr2"),
            Err(LinkError::SeqidMismatch { .. })
        ));
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut annotation = Annotation::new();
        annotation.add_gene("g2", "chrB").unwrap();
        annotation.add_gene("g1", "chrA").unwrap();
        annotation.add_gene("g3", "chrB").unwrap();

        let order: Vec<&str> = annotation.assemblies().map(|a| a.id.as_str()).collect();
        assert_eq!(order, ["chrB", "chrA"]);

        let chr_b = annotation.assembly("chrB").unwrap();
        let genes: Vec<&str> = annotation.genes_on(chr_b).map(|g| g.id.as_str()).collect();
        assert_eq!(genes, ["g2", "g3"]);
    }

    #[test]
    fn test_strand_column() {
        assert_eq!(Strand::from_column("+"), Some(Strand::Forward));
        assert_eq!(Strand::from_column("-"), Some(Strand::Reverse));
        assert_eq!(Strand::from_column("?"), Some(Strand::Unknown));
        assert_eq!(Strand::from_column("x"), None);
        assert_eq!(Strand::Reverse.to_string(), "-");
    }
}
