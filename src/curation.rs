//! Human-in-the-loop half of the pipeline.
//!
//! CONFLICT and UNRESOLVED proteins are grouped by the exact labels their
//! four sources reported. Each group is written once to a curator-facing CSV
//! with blank `TYPE`, `SUBTYPE` and `OUTCOME` columns; the filled-in file is
//! read back as a [`Curation`] and consumed by the matrix builder.
//!
//! `type_unresolved` / `subtype_unresolved` / `outcome_unresolved` entered by
//! a curator mean "confirmed defence gene, naming undetermined" and are kept
//! verbatim. They are not the same as `unknown`.

use std::io::Write;
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};
use crate::input::{delimited_reader, open_input};
use crate::types::{CanonicalCall, EvidencePattern, ParseStats, PatternKey, ProteinResolution};

/// Pattern counts in first-seen order. Partial tallies from different
/// workers combine with [`PatternTally::merge`].
#[derive(Debug, Clone, Default)]
pub struct PatternTally {
    slot_of: AHashMap<PatternKey, usize>,
    patterns: Vec<EvidencePattern>,
    example_limit: usize,
}

impl PatternTally {
    pub fn new(example_limit: usize) -> Self {
        Self {
            example_limit,
            ..Self::default()
        }
    }

    /// Counts a record if it needs curation; other records are ignored.
    pub fn add(&mut self, resolution: &ProteinResolution) {
        if !resolution.status.needs_curation() {
            return;
        }
        let key = resolution.pattern_key();
        let slot = match self.slot_of.get(&key) {
            Some(&slot) => slot,
            None => {
                self.slot_of.insert(key.clone(), self.patterns.len());
                self.patterns.push(EvidencePattern {
                    key,
                    count: 0,
                    example_proteins: Vec::new(),
                });
                self.patterns.len() - 1
            }
        };
        let pattern = &mut self.patterns[slot];
        pattern.count += 1;
        if pattern.example_proteins.len() < self.example_limit {
            pattern.example_proteins.push(resolution.protein_id.clone());
        }
    }

    /// Sums counts; patterns first seen in `other` go after ours.
    pub fn merge(mut self, other: PatternTally) -> PatternTally {
        for theirs in other.patterns {
            match self.slot_of.get(&theirs.key) {
                Some(&slot) => {
                    let ours = &mut self.patterns[slot];
                    ours.count += theirs.count;
                    let room = self.example_limit.saturating_sub(ours.example_proteins.len());
                    ours.example_proteins
                        .extend(theirs.example_proteins.into_iter().take(room));
                }
                None => {
                    self.slot_of.insert(theirs.key.clone(), self.patterns.len());
                    self.patterns.push(theirs);
                }
            }
        }
        self.example_limit = self.example_limit.max(other.example_limit);
        self
    }

    pub fn total(&self) -> usize {
        self.patterns.iter().map(|p| p.count).sum()
    }

    /// Patterns by descending count; ties keep first-seen order.
    pub fn into_patterns(self) -> Vec<EvidencePattern> {
        let mut patterns = self.patterns;
        // stable sort keeps first-seen order among equal counts
        patterns.sort_by(|a, b| b.count.cmp(&a.count));
        patterns
    }
}

/// Groups CONFLICT/UNRESOLVED records into unique evidence patterns,
/// most frequent first.
pub fn export_patterns<'a, I>(resolutions: I, example_limit: usize) -> Vec<EvidencePattern>
where
    I: IntoIterator<Item = &'a ProteinResolution>,
{
    let mut tally = PatternTally::new(example_limit);
    for r in resolutions {
        tally.add(r);
    }
    tally.into_patterns()
}

#[derive(Debug, Serialize, Deserialize)]
struct PatternRow {
    #[serde(alias = "PADLOC")]
    detector_a: String,
    #[serde(alias = "DefenseFinder")]
    detector_b: String,
    #[serde(alias = "BLAST_fwd")]
    forward: String,
    #[serde(alias = "BLAST_rev")]
    reverse: String,
    #[serde(default)]
    protein_count: usize,
    #[serde(default)]
    example_proteins: String,
    #[serde(rename = "TYPE", default)]
    system_type: String,
    #[serde(rename = "SUBTYPE", default)]
    subtype: String,
    #[serde(rename = "OUTCOME", default)]
    outcome: String,
}

/// Writes the curation template: one row per pattern, curation columns blank.
pub fn write_pattern_template<W: Write>(writer: W, patterns: &[EvidencePattern]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for p in patterns {
        let mut examples = p.example_proteins.join(", ");
        if p.count > p.example_proteins.len() {
            examples.push_str(&format!(", ... ({} more)", p.count - p.example_proteins.len()));
        }
        wtr.serialize(PatternRow {
            detector_a: p.key.detector_a.clone(),
            detector_b: p.key.detector_b.clone(),
            forward: p.key.forward.clone(),
            reverse: p.key.reverse.clone(),
            protein_count: p.count,
            example_proteins: examples,
            system_type: String::new(),
            subtype: String::new(),
            outcome: String::new(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Curated pattern -> canonical call mapping.
#[derive(Debug, Clone, Default)]
pub struct Curation {
    resolutions: AHashMap<PatternKey, CanonicalCall>,
}

impl Curation {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (PatternKey, CanonicalCall)>,
    {
        Self {
            resolutions: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &PatternKey) -> Option<&CanonicalCall> {
        self.resolutions.get(key)
    }

    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }

    /// Reads a curated pattern file. Rows whose TYPE, SUBTYPE or OUTCOME is
    /// still blank are left out (and so still count as uncurated).
    pub fn from_path(path: &Path) -> Result<(Self, ParseStats)> {
        let reader = open_input(path, "Curated patterns")?;
        let mut rdr = delimited_reader(reader, b',');
        let mut stats = ParseStats::default();
        let mut resolutions = AHashMap::new();
        let mut blank = 0usize;

        for (idx, row) in rdr.deserialize::<PatternRow>().enumerate() {
            stats.rows_read += 1;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    stats.rows_skipped += 1;
                    let err = ReconcileError::MalformedRow {
                        path: path.to_path_buf(),
                        line: idx + 2,
                        reason: e.to_string(),
                    };
                    log::warn!("skipping curation row: {err}");
                    continue;
                }
            };
            if row.system_type.is_empty() || row.subtype.is_empty() || row.outcome.is_empty() {
                blank += 1;
                continue;
            }
            let key = PatternKey {
                detector_a: row.detector_a,
                detector_b: row.detector_b,
                forward: row.forward,
                reverse: row.reverse,
            };
            let call = CanonicalCall::new(row.system_type, row.subtype, row.outcome);
            if let Some(previous) = resolutions.insert(key.clone(), call) {
                log::warn!("pattern ({key}) curated twice; last entry wins over {previous}");
            }
        }

        log::info!(
            "Loaded {} curated patterns from {} ({} left blank, {} malformed)",
            resolutions.len(),
            path.display(),
            blank,
            stats.rows_skipped
        );
        Ok((Self { resolutions }, stats))
    }
}
