//! # stopcheck - internal stop codon audit for GFF3 gene models
//!
//! Reads a GFF3 annotation together with its genome sequence (embedded
//! `##FASTA` section or a separate FASTA file) and counts the mRNAs whose
//! translated CDS contains a premature stop codon.
//!
//! ## Architecture
//!
//! - `model`: assemblies, genes, mRNAs and CDS splicing
//! - `formats`: GFF3 and FASTA readers, genome merge
//! - `genetic_code`: NCBI translation tables
//! - `audit`: the transcript walk and its counters
//!
//! ```no_run
//! use std::path::Path;
//! use stopcheck::audit::{audit, AuditConfig};
//! use stopcheck::formats::load_annotation;
//!
//! let annotation = load_annotation(Path::new("genes.gff3"), Some(Path::new("genome.fa"))).unwrap();
//! let report = audit(&annotation, &AuditConfig::default()).unwrap();
//! println!("{report}");
//! ```

pub mod audit;
pub mod formats;
pub mod genetic_code;
pub mod model;
