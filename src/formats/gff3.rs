//! GFF3 annotation loader.
//!
//! Builds an [`Annotation`] tree (assembly → gene → mRNA → CDS) from a GFF3
//! file. Only `gene`, `mRNA` and `CDS` features are modelled; every other
//! feature type is skipped.
//!
//! ## Format
//!
//! Nine tab-separated columns per feature:
//!
//! ```text
//! seqid  source  type  start  end  score  strand  phase  attributes
//! chr1   maker   CDS   1201   1500 .      +       0      ID=cds1;Parent=mRNA1
//! ```
//!
//! Children may appear before their parents, so features are collected
//! first and linked once the feature section has been read. Sequence data
//! after a `##FASTA` directive is attached to the matching assemblies.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::fasta::{merge_fasta, FastaBuilder, FastaError};
use super::open_input;
use crate::model::{Annotation, CdsSegment, LinkError, Strand};

/// Errors that can occur during GFF3 parsing.
#[derive(Error, Debug)]
pub enum GffError {
    #[error("Failed to read GFF3: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Expected 9 tab-separated columns, got {actual} at line {line}")]
    FieldCount { line: usize, actual: usize },

    #[error("Invalid {field} '{value}' at line {line}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("Start {start} is after end {end} at line {line}")]
    InvalidRange { line: usize, start: usize, end: usize },

    #[error("Malformed attribute '{attribute}' at line {line}")]
    InvalidAttribute { line: usize, attribute: String },

    #[error("{feature} feature without {attribute} attribute at line {line}")]
    MissingAttribute {
        line: usize,
        feature: &'static str,
        attribute: &'static str,
    },

    #[error("Malformed directive at line {line}: {directive}")]
    InvalidDirective { line: usize, directive: String },

    #[error("Line {line}: {source}")]
    Link {
        line: usize,
        #[source]
        source: LinkError,
    },

    #[error("Embedded FASTA: {0}")]
    Fasta(#[from] FastaError),
}

/// Result type for GFF3 operations.
pub type GffResult<T> = Result<T, GffError>;

/// Counters collected while loading, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Feature lines read, all types
    pub feature_lines: usize,
    /// Feature lines of types that are not modelled
    pub skipped_features: usize,
    /// mRNA and CDS lines whose parents are all unmodelled features
    pub unlinked_features: usize,
    /// Assemblies that received sequence from a `##FASTA` section
    pub embedded_sequences: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeatureKind {
    Gene,
    Mrna,
    Cds,
}

impl FeatureKind {
    fn from_type(column: &str) -> Option<Self> {
        match column {
            "gene" => Some(FeatureKind::Gene),
            "mRNA" => Some(FeatureKind::Mrna),
            "CDS" => Some(FeatureKind::Cds),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FeatureKind::Gene => "gene",
            FeatureKind::Mrna => "mRNA",
            FeatureKind::Cds => "CDS",
        }
    }
}

/// One parsed feature line.
#[derive(Debug)]
enum ParsedLine {
    Modelled(FeatureLine),
    /// A feature type that is not modelled; its ID may still be a parent.
    Skipped(Option<String>),
}

/// A modelled feature line awaiting linking.
#[derive(Debug)]
struct FeatureLine {
    line: usize,
    kind: FeatureKind,
    seqid: String,
    segment: CdsSegment,
    id: Option<String>,
    parents: Vec<String>,
}

/// Decodes GFF3 percent escapes (`%3B` → `;`). Malformed escapes are kept.
fn percent_decode(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn parse_position(value: &str, field: &'static str, line: usize) -> GffResult<usize> {
    match value.parse::<usize>() {
        Ok(pos) if pos > 0 => Ok(pos),
        _ => Err(GffError::InvalidField {
            line,
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_phase(value: &str, line: usize) -> GffResult<Option<u8>> {
    match value {
        "." => Ok(None),
        "0" => Ok(Some(0)),
        "1" => Ok(Some(1)),
        "2" => Ok(Some(2)),
        _ => Err(GffError::InvalidField {
            line,
            field: "phase",
            value: value.to_string(),
        }),
    }
}

/// Extracts `ID` and `Parent` from column 9.
fn parse_attributes(column: &str, line: usize) -> GffResult<(Option<String>, Vec<String>)> {
    let mut id = None;
    let mut parents = Vec::new();

    for attribute in column.split(';').map(str::trim).filter(|a| !a.is_empty()) {
        let Some((key, value)) = attribute.split_once('=') else {
            return Err(GffError::InvalidAttribute {
                line,
                attribute: attribute.to_string(),
            });
        };
        match key.trim() {
            "ID" => id = Some(percent_decode(value.trim())),
            "Parent" => parents.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(percent_decode),
            ),
            _ => {}
        }
    }
    Ok((id, parents))
}

/// Parses one feature line. Feature types that are not modelled keep only
/// their ID, after validating the columns they share with modelled ones.
fn parse_feature_line(text: &str, line: usize) -> GffResult<ParsedLine> {
    let columns: Vec<&str> = text.split('\t').collect();
    let [seqid, _source, kind, start, end, _score, strand, phase, attributes] = columns[..] else {
        return Err(GffError::FieldCount {
            line,
            actual: columns.len(),
        });
    };

    let start = parse_position(start, "start", line)?;
    let end = parse_position(end, "end", line)?;
    if start > end {
        return Err(GffError::InvalidRange { line, start, end });
    }
    let strand = Strand::from_column(strand).ok_or_else(|| GffError::InvalidField {
        line,
        field: "strand",
        value: strand.to_string(),
    })?;

    let (id, parents) = parse_attributes(attributes, line)?;
    let Some(kind) = FeatureKind::from_type(kind) else {
        return Ok(ParsedLine::Skipped(id));
    };

    let segment = CdsSegment {
        start,
        end,
        strand,
        phase: parse_phase(phase, line)?,
    };

    Ok(ParsedLine::Modelled(FeatureLine {
        line,
        kind,
        seqid: percent_decode(seqid),
        segment,
        id,
        parents,
    }))
}

fn parse_sequence_region(text: &str, line: usize, annotation: &mut Annotation) -> GffResult<()> {
    let fields: Vec<&str> = text.split_whitespace().skip(1).collect();
    let [seqid, start, end] = fields[..] else {
        return Err(GffError::InvalidDirective {
            line,
            directive: text.to_string(),
        });
    };
    let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) else {
        return Err(GffError::InvalidDirective {
            line,
            directive: text.to_string(),
        });
    };

    let assembly = annotation.ensure_assembly(&percent_decode(seqid));
    if assembly.residues.is_none() {
        assembly.length = Some((end + 1).saturating_sub(start));
    }
    Ok(())
}

fn require_id(feature: &FeatureLine) -> GffResult<&str> {
    feature
        .id
        .as_deref()
        .ok_or(GffError::MissingAttribute {
            line: feature.line,
            feature: feature.kind.name(),
            attribute: "ID",
        })
}

fn require_parents(feature: &FeatureLine) -> GffResult<&[String]> {
    if feature.parents.is_empty() {
        return Err(GffError::MissingAttribute {
            line: feature.line,
            feature: feature.kind.name(),
            attribute: "Parent",
        });
    }
    Ok(&feature.parents)
}

/// Links collected features: genes, then mRNAs, then CDS segments.
///
/// `unmodelled` holds the IDs of skipped feature lines. A child attached
/// only to such features (a CDS under a `V_gene_segment` or directly under
/// a `gene`, an mRNA under a `pseudogene`) is left out of the tree; a parent
/// ID defined nowhere in the file is an error. Returns how many children
/// were left out.
fn link_features(
    annotation: &mut Annotation,
    features: &[FeatureLine],
    mut unmodelled: HashSet<String>,
) -> GffResult<usize> {
    let link = |line: usize| move |source: LinkError| GffError::Link { line, source };
    let mut unlinked = 0;

    for gene in features.iter().filter(|f| f.kind == FeatureKind::Gene) {
        annotation
            .add_gene(require_id(gene)?, &gene.seqid)
            .map_err(link(gene.line))?;
    }

    for mrna in features.iter().filter(|f| f.kind == FeatureKind::Mrna) {
        let id = require_id(mrna)?;
        let parents = require_parents(mrna)?;
        // an mRNA belongs to exactly one gene: the first modelled parent
        let Some(gene_id) = parents.iter().find(|p| annotation.gene(p).is_some()) else {
            if let Some(missing) = parents.iter().find(|p| !unmodelled.contains(*p)) {
                return Err(GffError::Link {
                    line: mrna.line,
                    source: LinkError::UnknownParent {
                        child: id.to_string(),
                        parent: missing.clone(),
                    },
                });
            }
            debug!(mrna = id, parent = %parents[0], line = mrna.line, "mRNA under unmodelled feature skipped");
            unmodelled.insert(id.to_string());
            unlinked += 1;
            continue;
        };
        annotation
            .add_mrna(id, gene_id, &mrna.seqid)
            .map_err(link(mrna.line))?;
    }

    // genes are defined features, but CDS lines only hang off mRNAs
    let genes: HashSet<&str> = features
        .iter()
        .filter(|f| f.kind == FeatureKind::Gene)
        .filter_map(|f| f.id.as_deref())
        .collect();

    for cds in features.iter().filter(|f| f.kind == FeatureKind::Cds) {
        let cds_id = cds.id.as_deref().unwrap_or("CDS");
        let mut linked = false;
        for parent in require_parents(cds)? {
            if annotation.mrna(parent).is_some() {
                annotation
                    .add_cds(cds_id, parent, &cds.seqid, cds.segment)
                    .map_err(link(cds.line))?;
                linked = true;
            } else if !unmodelled.contains(parent) && !genes.contains(parent.as_str()) {
                return Err(GffError::Link {
                    line: cds.line,
                    source: LinkError::UnknownParent {
                        child: cds_id.to_string(),
                        parent: parent.clone(),
                    },
                });
            }
        }
        if !linked {
            debug!(cds = cds_id, line = cds.line, "CDS under unmodelled feature skipped");
            unlinked += 1;
        }
    }
    Ok(unlinked)
}

/// Parses GFF3 content from a reader.
pub fn parse_gff3<R: BufRead>(reader: R) -> GffResult<(Annotation, LoadStats)> {
    let mut annotation = Annotation::new();
    let mut stats = LoadStats::default();
    let mut features = Vec::new();
    let mut unmodelled = HashSet::new();
    let mut embedded: Option<FastaBuilder> = None;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;

        if let Some(fasta) = embedded.as_mut() {
            fasta.push_line(&line, line_number)?;
            continue;
        }

        let text = line.trim_end_matches('\r');
        if text.trim().is_empty() {
            continue;
        }

        if let Some(directive) = text.strip_prefix("##") {
            let name = directive.split_whitespace().next().unwrap_or("");
            match name {
                "FASTA" => embedded = Some(FastaBuilder::new()),
                "sequence-region" => parse_sequence_region(text, line_number, &mut annotation)?,
                _ => {}
            }
            continue;
        }
        if text.starts_with('#') {
            continue;
        }
        // FASTA without the directive, as some tools write it
        if text.starts_with('>') {
            let mut fasta = FastaBuilder::new();
            fasta.push_line(text, line_number)?;
            embedded = Some(fasta);
            continue;
        }

        stats.feature_lines += 1;
        match parse_feature_line(text, line_number)? {
            ParsedLine::Modelled(feature) => {
                annotation.ensure_assembly(&feature.seqid);
                features.push(feature);
            }
            ParsedLine::Skipped(id) => {
                stats.skipped_features += 1;
                unmodelled.extend(id);
            }
        }
    }

    stats.unlinked_features = link_features(&mut annotation, &features, unmodelled)?;

    if let Some(fasta) = embedded {
        stats.embedded_sequences = merge_fasta(&mut annotation, fasta.finish());
    }

    debug!(
        feature_lines = stats.feature_lines,
        skipped = stats.skipped_features,
        unlinked = stats.unlinked_features,
        embedded_sequences = stats.embedded_sequences,
        assemblies = annotation.assembly_count(),
        genes = annotation.gene_count(),
        mrnas = annotation.mrna_count(),
        "GFF3 loaded"
    );
    Ok((annotation, stats))
}

/// Parses a GFF3 file, plain or gzip-compressed.
pub fn parse_gff3_file<P: AsRef<Path>>(path: P) -> GffResult<(Annotation, LoadStats)> {
    parse_gff3(open_input(path.as_ref())?)
}

/// Parses GFF3 content from a string.
pub fn parse_gff3_str(content: &str) -> GffResult<(Annotation, LoadStats)> {
    parse_gff3(content.as_bytes())
}
