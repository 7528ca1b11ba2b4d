//src/corpus.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::consensus::profile::{
    read_profile, write_profile_file, GenomeEvidencePaths, ProfileBuilder, PROFILE_SUFFIX,
};
use crate::curation::PatternTally;
use crate::error::{ReconcileError, Result};
use crate::types::{ParseStats, ProteinResolution, StatusCounts};

pub const GENOME_PLACEHOLDER: &str = "{genome}";

/// File name templates of the four evidence tables inside an input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLayout {
    pub detector_a: String,
    pub detector_b: String,
    pub forward: String,
    pub reverse: String,
}

impl Default for InputLayout {
    fn default() -> Self {
        Self {
            detector_a: "{genome}_padloc.csv".to_string(),
            detector_b: "{genome}_defense_finder_genes.tsv".to_string(),
            forward: "{genome}_forward_best.tsv".to_string(),
            reverse: "{genome}_reverse_best.tsv".to_string(),
        }
    }
}

impl InputLayout {
    fn templates(&self) -> [&str; 4] {
        [&self.detector_a, &self.detector_b, &self.forward, &self.reverse]
    }

    pub fn validate(&self) -> Result<()> {
        for template in self.templates() {
            if !template.contains(GENOME_PLACEHOLDER) {
                return Err(ReconcileError::Config(format!(
                    "input file template '{template}' lacks {GENOME_PLACEHOLDER}"
                )));
            }
        }
        Ok(())
    }

    pub fn paths_for(&self, dir: &Path, genome_id: &str) -> GenomeEvidencePaths {
        let fill = |t: &str| dir.join(t.replace(GENOME_PLACEHOLDER, genome_id));
        GenomeEvidencePaths {
            detector_a: fill(&self.detector_a),
            detector_b: fill(&self.detector_b),
            forward: fill(&self.forward),
            reverse: fill(&self.reverse),
        }
    }

    /// Genome id a file name was generated from, if it matches any template.
    pub fn genome_of_file<'n>(&self, file_name: &'n str) -> Option<&'n str> {
        self.templates().into_iter().find_map(|template| {
            let (head, tail) = template.split_once(GENOME_PLACEHOLDER)?;
            let genome = file_name.strip_prefix(head)?.strip_suffix(tail)?;
            (!genome.is_empty()).then_some(genome)
        })
    }

    /// Every genome with at least one evidence file in `dir`, sorted.
    pub fn discover(&self, dir: &Path) -> Result<Vec<String>> {
        let mut genomes = BTreeSet::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(genome) = self.genome_of_file(name) {
                genomes.insert(genome.to_string());
            }
        }
        Ok(genomes.into_iter().collect())
    }
}

/// A genome left out of the run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedGenome {
    pub genome_id: String,
    pub reason: String,
}

/// Outcome of a corpus run, merged across workers.
#[derive(Debug, Clone, Default)]
pub struct CorpusReport {
    pub written: Vec<(String, PathBuf)>,
    pub skipped: Vec<SkippedGenome>,
    pub statuses: StatusCounts,
    pub rows: ParseStats,
    pub unmapped_labels: usize,
    /// Curation patterns, first-seen in genome id order.
    pub patterns: PatternTally,
    per_genome: Vec<(String, PatternTally)>,
}

impl CorpusReport {
    fn new(example_limit: usize) -> Self {
        Self {
            patterns: PatternTally::new(example_limit),
            ..Self::default()
        }
    }

    /// Folds the per-genome tallies into `patterns` by genome id, so the
    /// result does not depend on how rayon split the work.
    fn settle_patterns(&mut self) {
        let mut per_genome = std::mem::take(&mut self.per_genome);
        per_genome.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, tally) in per_genome {
            let merged = std::mem::take(&mut self.patterns).merge(tally);
            self.patterns = merged;
        }
    }
}

fn merge_reports(mut a: CorpusReport, b: CorpusReport) -> CorpusReport {
    a.written.extend(b.written);
    a.skipped.extend(b.skipped);
    a.statuses.merge(b.statuses);
    a.rows.merge(b.rows);
    a.unmapped_labels += b.unmapped_labels;
    a.per_genome.extend(b.per_genome);
    a
}

/// Runs `f` on a dedicated pool when a thread count is given, otherwise on
/// the global rayon pool.
pub fn with_threads<T, F>(threads: Option<usize>, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| ReconcileError::Config(format!("thread pool: {e}")))?;
            Ok(pool.install(f))
        }
        None => Ok(f()),
    }
}

/// Builds and writes `<genome>_defenceprofile.csv` for every genome.
///
/// Genomes are processed in parallel. A genome that fails (a missing input
/// under the strict policy, an unreadable table, an unwritable output) is
/// logged and reported in [`CorpusReport::skipped`]; the rest of the corpus
/// carries on. `progress` is called once per finished genome.
pub fn reconcile_corpus<P>(
    builder: &ProfileBuilder<'_>,
    input_dir: &Path,
    genomes: &[String],
    output_dir: &Path,
    progress: P,
) -> Result<CorpusReport>
where
    P: Fn(&str) + Sync,
{
    std::fs::create_dir_all(output_dir)?;
    let layout = &builder.config.layout;
    let example_limit = builder.config.example_limit;

    let mut report = genomes
        .par_iter()
        .fold(
            || CorpusReport::new(example_limit),
            |mut acc, genome_id| {
                let paths = layout.paths_for(input_dir, genome_id);
                let outcome = builder.build(genome_id, &paths).and_then(|profile| {
                    let out = output_dir.join(format!("{genome_id}{PROFILE_SUFFIX}"));
                    write_profile_file(&out, &profile.resolutions)?;
                    Ok((profile, out))
                });
                match outcome {
                    Ok((profile, out)) => {
                        let mut tally = PatternTally::new(example_limit);
                        for r in &profile.resolutions {
                            acc.statuses.add(r.status);
                            tally.add(r);
                        }
                        acc.per_genome.push((genome_id.clone(), tally));
                        acc.rows.merge(profile.stats.rows);
                        acc.unmapped_labels += profile.stats.unmapped_labels;
                        acc.written.push((genome_id.clone(), out));
                    }
                    Err(e) => {
                        log::warn!("{genome_id}: skipped: {e}");
                        acc.skipped.push(SkippedGenome {
                            genome_id: genome_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                progress(genome_id);
                acc
            },
        )
        .reduce(|| CorpusReport::new(example_limit), merge_reports);

    report.settle_patterns();
    report.written.sort();
    report.skipped.sort_by(|a, b| a.genome_id.cmp(&b.genome_id));
    log::info!(
        "Corpus: {} genomes written, {} skipped ({})",
        report.written.len(),
        report.skipped.len(),
        report.statuses
    );
    Ok(report)
}

/// Profiles loaded from a directory, plus the files that could not be read.
#[derive(Debug, Default)]
pub struct LoadedProfiles {
    pub resolutions: Vec<ProteinResolution>,
    pub files: usize,
    pub rows: ParseStats,
    pub failures: Vec<(PathBuf, String)>,
}

impl LoadedProfiles {
    /// Fails when any profile file in the directory could not be read.
    pub fn require_complete(self) -> Result<Self> {
        if let Some((path, _)) = self.failures.first() {
            return Err(ReconcileError::UnreadableProfiles {
                count: self.failures.len(),
                first: path.clone(),
            });
        }
        Ok(self)
    }
}

/// Profile files in `dir`, sorted by name.
pub fn profile_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_profile = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(PROFILE_SUFFIX))
            .unwrap_or(false);
        if is_profile && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reads every profile in `dir` in parallel. Records keep file order.
pub fn load_profiles_dir(dir: &Path) -> Result<LoadedProfiles> {
    let files = profile_files(dir)?;
    let failures = Mutex::new(Vec::new());

    let loaded: Vec<(Vec<ProteinResolution>, ParseStats)> = files
        .par_iter()
        .filter_map(|path| match read_profile(path) {
            Ok((_, stats)) if stats.rows_read > 0 && stats.rows_skipped == stats.rows_read => {
                log::warn!("{}: no readable profile rows", path.display());
                failures
                    .lock()
                    .push((path.clone(), "no readable profile rows".to_string()));
                None
            }
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("{}: {e}", path.display());
                failures.lock().push((path.clone(), e.to_string()));
                None
            }
        })
        .collect();

    let mut out = LoadedProfiles {
        files: loaded.len(),
        failures: failures.into_inner(),
        ..LoadedProfiles::default()
    };
    out.failures.sort();
    for (resolutions, stats) in loaded {
        out.resolutions.extend(resolutions);
        out.rows.merge(stats);
    }
    log::info!(
        "Loaded {} records from {} profile files ({} failed)",
        out.resolutions.len(),
        out.files,
        out.failures.len()
    );
    Ok(out)
}
