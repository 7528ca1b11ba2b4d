// src/consensus/profile.rs

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::engine::ConsensusEngine;
use crate::alignment::{best_by_key, filter_hits, read_hits_from};
use crate::config::ReconcileConfig;
use crate::detectors::{read_detector_rows, DetectorFormat, DetectorRow};
use crate::error::{ReconcileError, Result};
use crate::input::{delimited_reader, open_input, open_with_policy};
use crate::master_key::MasterKeyResolver;
use crate::names::{genome_of, system_label, with_genome_prefix, NameNormalizer};
use crate::types::{
    AlignmentHit, CanonicalCall, Direction, EvidenceSet, ParseStats, ProteinResolution,
    ResolutionStatus, SourceCall, SourceTool, StatusCounts,
};

/// File name suffix of per-genome consensus profiles.
pub const PROFILE_SUFFIX: &str = "_defenceprofile.csv";

/// The four evidence files of one genome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeEvidencePaths {
    pub detector_a: PathBuf,
    pub detector_b: PathBuf,
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

/// Bookkeeping for one genome, reported rather than fatal.
#[derive(Debug, Clone, Default)]
pub struct ProfileStats {
    pub rows: ParseStats,
    pub missing_inputs: Vec<&'static str>,
    pub unmapped_labels: usize,
    pub filtered_alignment_only: usize,
}

/// Consensus records of every protein with evidence in one genome.
#[derive(Debug, Clone)]
pub struct GenomeProfile {
    pub genome_id: String,
    pub resolutions: Vec<ProteinResolution>,
    pub stats: ProfileStats,
}

impl GenomeProfile {
    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts::from_resolutions(&self.resolutions)
    }
}

/// Per-protein evidence gathered before resolution.
struct Gathered {
    evidence: EvidenceSet,
    forward_hit: Option<AlignmentHit>,
}

impl Gathered {
    fn new() -> Self {
        Self {
            evidence: EvidenceSet::empty(),
            forward_hit: None,
        }
    }
}

/// Everything needed to resolve genomes, borrowed for the whole run.
pub struct ProfileBuilder<'a> {
    pub resolver: &'a MasterKeyResolver,
    pub engine: &'a ConsensusEngine,
    pub config: &'a ReconcileConfig,
    normalizer: NameNormalizer,
}

impl<'a> ProfileBuilder<'a> {
    pub fn new(
        resolver: &'a MasterKeyResolver,
        engine: &'a ConsensusEngine,
        config: &'a ReconcileConfig,
    ) -> Self {
        Self {
            resolver,
            engine,
            config,
            normalizer: config.normalizer(),
        }
    }

    /// Reads, cleans and resolves all evidence of one genome.
    pub fn build(&self, genome_id: &str, paths: &GenomeEvidencePaths) -> Result<GenomeProfile> {
        let mut stats = ProfileStats::default();
        let mut proteins: BTreeMap<String, Gathered> = BTreeMap::new();

        for (tool, format, path) in [
            (SourceTool::DetectorA, &self.config.detector_a, &paths.detector_a),
            (SourceTool::DetectorB, &self.config.detector_b, &paths.detector_b),
        ] {
            let rows = self.load_detector(format, path, &mut stats)?;
            for row in rows {
                let protein_id = match with_genome_prefix(genome_id, &row.protein_id) {
                    Ok(id) => id,
                    Err(e) => {
                        stats.rows.rows_skipped += 1;
                        log::warn!("{}: {e}", path.display());
                        continue;
                    }
                };
                let gathered = proteins.entry(protein_id).or_insert_with(Gathered::new);
                let slot = gathered.evidence.get_mut(tool);
                if slot.call.is_no_hit() {
                    slot.label = self.normalizer.normalize(&row.label);
                    slot.call = CanonicalCall::unknown();
                } else {
                    log::debug!("{tool}: extra label '{}' ignored for {}", row.label, row.protein_id);
                }
            }
        }

        let forward = self.load_hits(&paths.forward, "Forward alignment", &mut stats)?;
        let forward = filter_hits(forward, Direction::Forward, &self.normalizer);
        for hit in best_by_key(forward, |h| h.query_id.as_str()) {
            let Some(protein_id) = self.prefixed(genome_id, &hit.query_id, &paths.forward, &mut stats) else {
                continue;
            };
            let gathered = proteins.entry(protein_id).or_insert_with(Gathered::new);
            gathered.evidence.forward.label = system_label(&hit.subject_id).to_string();
            gathered.evidence.forward.call = CanonicalCall::unknown();
            gathered.forward_hit = Some(hit);
        }

        let reverse = self.load_hits(&paths.reverse, "Reverse alignment", &mut stats)?;
        for hit in filter_hits(reverse, Direction::Reverse, &self.normalizer) {
            let Some(protein_id) = self.prefixed(genome_id, &hit.subject_id, &paths.reverse, &mut stats) else {
                continue;
            };
            let gathered = proteins.entry(protein_id).or_insert_with(Gathered::new);
            gathered.evidence.reverse.label = system_label(&hit.query_id).to_string();
            gathered.evidence.reverse.call = CanonicalCall::unknown();
        }

        let mut resolutions = Vec::with_capacity(proteins.len());
        for (protein_id, mut gathered) in proteins {
            for tool in SourceTool::ALL {
                let source = gathered.evidence.get_mut(tool);
                if source.call.is_no_hit() {
                    continue;
                }
                source.call = self.resolver.resolve(tool, &source.label);
                if source.call.is_unknown() {
                    stats.unmapped_labels += 1;
                    log::warn!(
                        "{}: no master key mapping for {} label '{}', using unknown",
                        protein_id,
                        tool,
                        source.label
                    );
                }
            }

            self.apply_alignment_only_filter(&protein_id, &mut gathered, &mut stats);
            resolutions.push(self.engine.resolve(genome_id, &protein_id, gathered.evidence));
        }

        let profile = GenomeProfile {
            genome_id: genome_id.to_string(),
            resolutions,
            stats,
        };
        log::info!(
            "{}: {} proteins ({}), {} unmapped labels, {} rows skipped",
            genome_id,
            profile.resolutions.len(),
            profile.status_counts(),
            profile.stats.unmapped_labels,
            profile.stats.rows.rows_skipped
        );
        Ok(profile)
    }

    fn prefixed(
        &self,
        genome_id: &str,
        protein_id: &str,
        path: &Path,
        stats: &mut ProfileStats,
    ) -> Option<String> {
        match with_genome_prefix(genome_id, protein_id) {
            Ok(id) => Some(id),
            Err(e) => {
                stats.rows.rows_skipped += 1;
                log::warn!("{}: {e}", path.display());
                None
            }
        }
    }

    fn load_detector(
        &self,
        format: &DetectorFormat,
        path: &Path,
        stats: &mut ProfileStats,
    ) -> Result<Vec<DetectorRow>> {
        match open_with_policy(path, format.name, self.config.missing_inputs)? {
            Some(reader) => {
                let (rows, parsed) = read_detector_rows(reader, format, path)?;
                stats.rows.merge(parsed);
                Ok(rows)
            }
            None => {
                stats.missing_inputs.push(format.name);
                Ok(Vec::new())
            }
        }
    }

    fn load_hits(
        &self,
        path: &Path,
        what: &'static str,
        stats: &mut ProfileStats,
    ) -> Result<Vec<AlignmentHit>> {
        match open_with_policy(path, what, self.config.missing_inputs)? {
            Some(reader) => {
                let (hits, parsed) = read_hits_from(reader, path)?;
                stats.rows.merge(parsed);
                Ok(hits)
            }
            None => {
                stats.missing_inputs.push(what);
                Ok(Vec::new())
            }
        }
    }

    /// Alignment-only evidence needs both a reverse hit and a
    /// length-consistent forward hit, otherwise both alignment calls are
    /// dropped.
    fn apply_alignment_only_filter(
        &self,
        protein_id: &str,
        gathered: &mut Gathered,
        stats: &mut ProfileStats,
    ) {
        let Some(filter) = &self.config.blast_only_filter else {
            return;
        };
        let ev = &gathered.evidence;
        let detectors_silent = ev.detector_a.call.is_no_hit() && ev.detector_b.call.is_no_hit();
        let has_alignment = !ev.forward.call.is_no_hit() || !ev.reverse.call.is_no_hit();
        if !detectors_silent || !has_alignment {
            return;
        }

        let verdict = match &gathered.forward_hit {
            _ if ev.reverse.call.is_no_hit() => Err("no reverse hit".to_string()),
            Some(hit) => filter.check(hit),
            None => Err("no forward hit".to_string()),
        };
        if let Err(reason) = verdict {
            stats.filtered_alignment_only += 1;
            log::warn!("{protein_id}: alignment-only evidence dropped: {reason}");
            gathered.evidence.forward = SourceCall::absent();
            gathered.evidence.reverse = SourceCall::absent();
        }
    }
}

/// Flat CSV form of a [`ProteinResolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileRow {
    protein_id: String,
    #[serde(default)]
    genome_id: String,
    detector_a: String,
    detector_a_type: String,
    detector_a_subtype: String,
    detector_a_outcome: String,
    detector_b: String,
    detector_b_type: String,
    detector_b_subtype: String,
    detector_b_outcome: String,
    forward: String,
    forward_type: String,
    forward_subtype: String,
    forward_outcome: String,
    reverse: String,
    reverse_type: String,
    reverse_subtype: String,
    reverse_outcome: String,
    status: String,
    final_type: String,
    final_subtype: String,
    final_outcome: String,
    #[serde(default)]
    curated: bool,
    #[serde(default)]
    explanation: String,
}

fn split_source(source: &SourceCall) -> (String, String, String, String) {
    (
        source.label.clone(),
        source.call.system_type.clone(),
        source.call.subtype.clone(),
        source.call.outcome.clone(),
    )
}

impl From<&ProteinResolution> for ProfileRow {
    fn from(r: &ProteinResolution) -> Self {
        let (detector_a, detector_a_type, detector_a_subtype, detector_a_outcome) =
            split_source(&r.evidence.detector_a);
        let (detector_b, detector_b_type, detector_b_subtype, detector_b_outcome) =
            split_source(&r.evidence.detector_b);
        let (forward, forward_type, forward_subtype, forward_outcome) =
            split_source(&r.evidence.forward);
        let (reverse, reverse_type, reverse_subtype, reverse_outcome) =
            split_source(&r.evidence.reverse);
        Self {
            protein_id: r.protein_id.clone(),
            genome_id: r.genome_id.clone(),
            detector_a,
            detector_a_type,
            detector_a_subtype,
            detector_a_outcome,
            detector_b,
            detector_b_type,
            detector_b_subtype,
            detector_b_outcome,
            forward,
            forward_type,
            forward_subtype,
            forward_outcome,
            reverse,
            reverse_type,
            reverse_subtype,
            reverse_outcome,
            status: r.status.as_str().to_string(),
            final_type: r.final_call.system_type.clone(),
            final_subtype: r.final_call.subtype.clone(),
            final_outcome: r.final_call.outcome.clone(),
            curated: r.curated,
            explanation: r.explanation.clone(),
        }
    }
}

impl ProfileRow {
    fn into_resolution(self) -> std::result::Result<ProteinResolution, String> {
        let status = ResolutionStatus::parse(&self.status)
            .ok_or_else(|| format!("unknown status '{}'", self.status))?;
        let genome_id = if self.genome_id.is_empty() {
            genome_of(&self.protein_id)
                .ok_or_else(|| format!("no genome id for protein '{}'", self.protein_id))?
                .to_string()
        } else {
            self.genome_id
        };
        let source = |label: String, t: String, s: String, o: String| SourceCall {
            label,
            call: CanonicalCall::new(t, s, o),
        };
        Ok(ProteinResolution {
            genome_id,
            protein_id: self.protein_id,
            evidence: EvidenceSet {
                detector_a: source(
                    self.detector_a,
                    self.detector_a_type,
                    self.detector_a_subtype,
                    self.detector_a_outcome,
                ),
                detector_b: source(
                    self.detector_b,
                    self.detector_b_type,
                    self.detector_b_subtype,
                    self.detector_b_outcome,
                ),
                forward: source(self.forward, self.forward_type, self.forward_subtype, self.forward_outcome),
                reverse: source(self.reverse, self.reverse_type, self.reverse_subtype, self.reverse_outcome),
            },
            status,
            final_call: CanonicalCall::new(self.final_type, self.final_subtype, self.final_outcome),
            curated: self.curated,
            explanation: self.explanation,
        })
    }
}

/// Writes a consensus profile, one row per protein.
pub fn write_profile<W: Write>(writer: W, resolutions: &[ProteinResolution]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for r in resolutions {
        wtr.serialize(ProfileRow::from(r))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_profile_file(path: &Path, resolutions: &[ProteinResolution]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_profile(std::io::BufWriter::new(file), resolutions)
}

/// Reads a profile written by [`write_profile`]. Unparseable rows are
/// skipped and counted.
pub fn read_profile(path: &Path) -> Result<(Vec<ProteinResolution>, ParseStats)> {
    let reader = open_input(path, "Consensus profile")?;
    let mut rdr = delimited_reader(reader, b',');
    let mut stats = ParseStats::default();
    let mut resolutions = Vec::new();

    for (idx, row) in rdr.deserialize::<ProfileRow>().enumerate() {
        stats.rows_read += 1;
        let parsed = row
            .map_err(|e| e.to_string())
            .and_then(ProfileRow::into_resolution);
        match parsed {
            Ok(r) => resolutions.push(r),
            Err(reason) => {
                stats.rows_skipped += 1;
                let err = ReconcileError::MalformedRow {
                    path: path.to_path_buf(),
                    line: idx + 2,
                    reason,
                };
                log::warn!("skipping profile row: {err}");
            }
        }
    }
    Ok((resolutions, stats))
}
