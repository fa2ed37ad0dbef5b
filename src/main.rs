//! stopcheck - count GFF3 mRNAs with internal stop codons
//!
//! ## Usage
//!
//! ```bash
//! stopcheck -i genes.gff3                  # sequence embedded after ##FASTA
//! stopcheck -i genes.gff3 -g genome.fasta  # separate genome FASTA
//! stopcheck -i genes.gff3.gz -g genome.fa.gz --genetic-code 11
//! ```
//!
//! The summary goes to stdout; logs go to stderr (`RUST_LOG=stopcheck=debug`
//! lists flagged transcripts).

// Use jemalloc for better memory management (returns memory to OS)
#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stopcheck::audit::{audit, AuditConfig, AuditReport};
use stopcheck::formats::load_annotation;
use stopcheck::genetic_code::GeneticCodes;

/// Checks the CDS of every mRNA in a GFF3 file for internal stop codons.
///
/// Terminal stop codons are removed before checking, so a stop at the very
/// end of the reading frame is not reported.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input GFF3
    #[arg(short = 'i', long = "input-file", alias = "input_file")]
    input_file: PathBuf,

    /// Genome FASTA. Required unless the molecule sequences are embedded in the GFF3
    #[arg(short = 'g', long = "genome-fasta", alias = "genome_fasta")]
    genome_fasta: Option<PathBuf>,

    /// Genetic code for translation (NCBI table id, default: 1 = Standard)
    #[arg(long = "genetic-code", default_value = "1")]
    genetic_code: u8,

    /// Log the CDS and translation of this mRNA
    #[arg(long = "debug-mrna", value_name = "MRNA_ID")]
    debug_mrna: Option<String>,
}

/// Logs to stderr; STOPCHECK_LOG_FORMAT=json switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "stopcheck=warn".into());
    let json = std::env::var("STOPCHECK_LOG_FORMAT").is_ok_and(|f| f == "json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Loads the inputs and audits every mRNA.
fn run(input_file: &Path, genome_fasta: Option<&Path>, config: &AuditConfig) -> Result<AuditReport> {
    let annotation = load_annotation(input_file, genome_fasta)
        .with_context(|| format!("Failed to load {}", input_file.display()))?;

    if let Some(id) = config.debug_mrna.as_deref() {
        if annotation.mrna(id).is_none() {
            tracing::warn!(mrna = id, "--debug-mrna names no mRNA in the annotation");
        }
    }

    let report = audit(&annotation, config)?;
    tracing::debug!(flagged = ?report.flagged, "flagged mRNAs");
    Ok(report)
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let genetic_code = GeneticCodes::new()
        .take(args.genetic_code)
        .ok_or_else(|| anyhow::anyhow!("Unknown genetic code: {}", args.genetic_code))?;

    let config = AuditConfig {
        genetic_code,
        debug_mrna: args.debug_mrna,
    };

    let report = run(&args.input_file, args.genome_fasta.as_deref(), &config)?;
    println!("{report}");

    Ok(())
}
