// src/lib.rs
pub mod types;
pub mod error;
pub mod config;
pub mod names;
pub mod input;
pub mod alignment;
pub mod detectors;
pub mod master_key;
pub mod consensus;
pub mod curation;
pub mod matrix;
pub mod corpus;
pub mod prefix;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::ReconcileConfig;
use crate::consensus::{ConsensusEngine, GenomeEvidencePaths, GenomeProfile, ProfileBuilder};
use crate::corpus::{load_profiles_dir, reconcile_corpus, with_threads, CorpusReport};
use crate::curation::{export_patterns, write_pattern_template, Curation};
use crate::error::Result;
use crate::master_key::MasterKeyResolver;
use crate::matrix::{apply_curation, tabulate, DefenceMatrix};
use crate::types::{EvidencePattern, ProteinResolution};

/// The loaded master key and settings, shared by every genome of a run.
pub struct Reconciler {
    pub resolver: MasterKeyResolver,
    pub engine: ConsensusEngine,
    pub config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(resolver: MasterKeyResolver, config: ReconcileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resolver,
            engine: ConsensusEngine::new(config.outcome_policy.clone()),
            config,
        })
    }

    /// Loads the master key from `master_key` and validates `config`.
    pub fn open(master_key: &Path, config: ReconcileConfig) -> Result<Self> {
        let resolver = MasterKeyResolver::from_path(master_key)?;
        Self::new(resolver, config)
    }

    pub fn profile_builder(&self) -> ProfileBuilder<'_> {
        ProfileBuilder::new(&self.resolver, &self.engine, &self.config)
    }

    /// Consensus profile of one genome; nothing is written.
    pub fn reconcile_genome(&self, genome_id: &str, paths: &GenomeEvidencePaths) -> Result<GenomeProfile> {
        self.profile_builder().build(genome_id, paths)
    }

    /// Profiles every genome of `input_dir` (all genomes found there when
    /// `genomes` is empty) into `output_dir`.
    pub fn reconcile_corpus<P>(
        &self,
        input_dir: &Path,
        genomes: &[String],
        output_dir: &Path,
        threads: Option<usize>,
        progress: P,
    ) -> Result<CorpusReport>
    where
        P: Fn(&str) + Sync + Send,
    {
        let discovered;
        let genomes = if genomes.is_empty() {
            discovered = self.config.layout.discover(input_dir)?;
            &discovered[..]
        } else {
            genomes
        };
        let builder = self.profile_builder();
        with_threads(threads, || {
            reconcile_corpus(&builder, input_dir, genomes, output_dir, progress)
        })?
    }
}

/// Reads all profiles in `profiles_dir` and writes the curation template to
/// `output`. Returns the exported patterns.
pub fn export_pattern_file(
    profiles_dir: &Path,
    output: &Path,
    example_limit: usize,
) -> Result<Vec<EvidencePattern>> {
    let loaded = load_profiles_dir(profiles_dir)?.require_complete()?;
    let patterns = export_patterns(&loaded.resolutions, example_limit);
    write_pattern_template(BufWriter::new(File::create(output)?), &patterns)?;
    log::info!(
        "Wrote {} patterns covering {} proteins to {}",
        patterns.len(),
        patterns.iter().map(|p| p.count).sum::<usize>(),
        output.display()
    );
    Ok(patterns)
}

/// Curated resolutions and the matrix built from them.
pub struct Finalized {
    pub resolutions: Vec<ProteinResolution>,
    pub matrix: DefenceMatrix,
}

/// Merges curated patterns into the profiles in `profiles_dir` and tabulates
/// the defence matrix. Fails on an unreadable profile file and on the first
/// pattern with no curated entry.
pub fn finalize_corpus(profiles_dir: &Path, curation_path: &Path) -> Result<Finalized> {
    let loaded = load_profiles_dir(profiles_dir)?.require_complete()?;
    let (curation, _) = Curation::from_path(curation_path)?;
    if curation.is_empty() {
        log::warn!("{}: no curated patterns", curation_path.display());
    } else {
        log::info!("Loaded {} curated patterns", curation.len());
    }
    let resolutions = apply_curation(loaded.resolutions, &curation)?;
    let matrix = tabulate(&resolutions);
    Ok(Finalized {
        resolutions,
        matrix,
    })
}
