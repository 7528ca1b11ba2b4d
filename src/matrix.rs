//src/matrix.rs

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use ahash::{AHashMap, AHashSet};

use crate::curation::Curation;
use crate::error::{ReconcileError, Result};
use crate::types::{CanonicalCall, PatternKey, ProteinResolution, ResolutionStatus, StatusCounts};

/// Per-genome totals that accompany the matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenomeSummary {
    pub statuses: StatusCounts,
    /// Records whose final call came from the curation file.
    pub curated: usize,
    /// Distinct defence systems present.
    pub systems: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeRow {
    pub genome_id: String,
    /// Protein counts, aligned with [`DefenceMatrix::columns`].
    pub counts: Vec<usize>,
    pub summary: GenomeSummary,
}

/// Genome x defence-system table built once from curated resolutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefenceMatrix {
    pub columns: Vec<CanonicalCall>,
    pub rows: Vec<GenomeRow>,
}

#[cfg(test)]
impl DefenceMatrix {
    pub(crate) fn row(&self, genome_id: &str) -> Option<&GenomeRow> {
        self.rows.iter().find(|r| r.genome_id == genome_id)
    }

    pub(crate) fn column_index(&self, call: &CanonicalCall) -> Option<usize> {
        self.columns.iter().position(|c| c == call)
    }

    /// `None` when the genome or the system is not in the matrix at all.
    pub(crate) fn presence(&self, genome_id: &str, call: &CanonicalCall) -> Option<bool> {
        let col = self.column_index(call)?;
        self.row(genome_id).map(|r| r.counts[col] > 0)
    }
}

impl DefenceMatrix {
    fn header(&self, first: &str) -> Vec<String> {
        std::iter::once(first.to_string())
            .chain(self.columns.iter().map(CanonicalCall::column_label))
            .collect()
    }

    /// Binary presence/absence matrix.
    pub fn write_presence<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.header("genome_id"))?;
        for row in &self.rows {
            let mut record = vec![row.genome_id.clone()];
            record.extend(row.counts.iter().map(|&c| u8::from(c > 0).to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Same layout with protein counts instead of 0/1.
    pub fn write_counts<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.header("genome_id"))?;
        for row in &self.rows {
            let mut record = vec![row.genome_id.clone()];
            record.extend(row.counts.iter().map(|c| c.to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_summary<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["genome_id".to_string(), "proteins".to_string()];
        header.extend(ResolutionStatus::ALL.iter().map(|s| s.as_str().to_string()));
        header.push("curated".to_string());
        header.push("defence_systems".to_string());
        wtr.write_record(&header)?;

        for row in &self.rows {
            let s = &row.summary;
            let mut record = vec![row.genome_id.clone(), s.statuses.total().to_string()];
            record.extend(ResolutionStatus::ALL.iter().map(|st| s.statuses.get(*st).to_string()));
            record.push(s.curated.to_string());
            record.push(s.systems.to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Patterns with no curated entry, in first-seen order.
pub fn uncurated_patterns<'a, I>(resolutions: I, curation: &Curation) -> Vec<PatternKey>
where
    I: IntoIterator<Item = &'a ProteinResolution>,
{
    let mut seen = AHashSet::new();
    let mut missing = Vec::new();
    for r in resolutions {
        if !r.status.needs_curation() {
            continue;
        }
        let key = r.pattern_key();
        if curation.get(&key).is_none() && seen.insert(key.clone()) {
            missing.push(key);
        }
    }
    missing
}

/// Fills the final call of every CONFLICT/UNRESOLVED record from the
/// curation. Any pattern without a curated entry stops the merge.
pub fn apply_curation(
    mut resolutions: Vec<ProteinResolution>,
    curation: &Curation,
) -> Result<Vec<ProteinResolution>> {
    let missing = uncurated_patterns(&resolutions, curation);
    if let Some(first) = missing.first() {
        for key in &missing {
            log::error!("uncurated pattern: {key}");
        }
        return Err(ReconcileError::UncuratedPattern {
            pattern: first.clone(),
            missing: missing.len(),
        });
    }

    for r in resolutions.iter_mut().filter(|r| r.status.needs_curation()) {
        if let Some(call) = curation.get(&r.pattern_key()) {
            r.final_call = call.clone();
            r.curated = true;
        }
    }
    Ok(resolutions)
}

/// Builds the genome x system matrix from (possibly uncurated) resolutions.
///
/// NO_EVIDENCE records and records curated to `no_hit` are counted in the
/// summary but never become matrix columns.
pub fn build_matrix(resolutions: &[ProteinResolution], curation: &Curation) -> Result<DefenceMatrix> {
    let merged = apply_curation(resolutions.to_vec(), curation)?;
    Ok(tabulate(&merged))
}

/// Tabulates already-curated resolutions.
pub fn tabulate(resolutions: &[ProteinResolution]) -> DefenceMatrix {
    struct Acc<'a> {
        counts: AHashMap<&'a CanonicalCall, usize>,
        summary: GenomeSummary,
    }

    let mut columns: BTreeSet<&CanonicalCall> = BTreeSet::new();
    let mut per_genome: BTreeMap<&str, Acc> = BTreeMap::new();

    for r in resolutions {
        let acc = per_genome.entry(r.genome_id.as_str()).or_insert_with(|| Acc {
            counts: AHashMap::new(),
            summary: GenomeSummary::default(),
        });
        acc.summary.statuses.add(r.status);
        if r.curated {
            acc.summary.curated += 1;
        }
        if r.status == ResolutionStatus::NoEvidence || r.final_call.is_no_hit() {
            continue;
        }
        *acc.counts.entry(&r.final_call).or_insert(0) += 1;
        columns.insert(&r.final_call);
    }

    let columns: Vec<&CanonicalCall> = columns.into_iter().collect();
    let rows = per_genome
        .into_iter()
        .map(|(genome_id, mut acc)| {
            let counts: Vec<usize> = columns
                .iter()
                .map(|c| acc.counts.get(c).copied().unwrap_or(0))
                .collect();
            acc.summary.systems = counts.iter().filter(|&&c| c > 0).count();
            GenomeRow {
                genome_id: genome_id.to_string(),
                counts,
                summary: acc.summary,
            }
        })
        .collect();

    let matrix = DefenceMatrix {
        columns: columns.into_iter().cloned().collect(),
        rows,
    };
    log::info!(
        "Defence matrix: {} genomes x {} systems",
        matrix.rows.len(),
        matrix.columns.len()
    );
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvidenceSet, SourceCall};

    fn record(
        genome: &str,
        protein: &str,
        labels: [&str; 4],
        status: ResolutionStatus,
        final_call: CanonicalCall,
    ) -> ProteinResolution {
        let src = |l: &str| SourceCall {
            label: l.to_string(),
            call: CanonicalCall::unknown(),
        };
        ProteinResolution {
            genome_id: genome.to_string(),
            protein_id: format!("{genome}@{protein}"),
            evidence: EvidenceSet {
                detector_a: src(labels[0]),
                detector_b: src(labels[1]),
                forward: src(labels[2]),
                reverse: src(labels[3]),
            },
            status,
            final_call,
            curated: false,
            explanation: String::new(),
        }
    }

    fn gabija() -> CanonicalCall {
        CanonicalCall::new("Gabija", "Gabija", "Abi")
    }

    fn corpus() -> Vec<ProteinResolution> {
        use ResolutionStatus::*;
        let clash = ["Dynamins", "Eleos", "No_hit", "No_hit"];
        vec![
            record("g2", "p1", ["Gabija", "Gabija", "No_hit", "No_hit"], Concordant, gabija()),
            record("g1", "p1", clash, Conflict, CanonicalCall::unresolved()),
            record("g1", "p2", ["No_hit"; 4], NoEvidence, CanonicalCall::no_hit()),
            record("g2", "p2", clash, Conflict, CanonicalCall::unresolved()),
            record("g1", "p3", ["Gabija", "No_hit", "No_hit", "No_hit"], Concordant, gabija()),
        ]
    }

    fn curation() -> Curation {
        Curation::from_entries([(
            corpus()[1].pattern_key(),
            CanonicalCall::new("Dynamins", "subtype_unresolved", "Direct"),
        )])
    }

    #[test]
    fn builds_rows_and_columns() {
        let matrix = build_matrix(&corpus(), &curation()).unwrap();
        assert_eq!(
            matrix.rows.iter().map(|r| r.genome_id.as_str()).collect::<Vec<_>>(),
            vec!["g1", "g2"]
        );
        assert_eq!(matrix.columns.len(), 2);

        let dyn_call = CanonicalCall::new("Dynamins", "subtype_unresolved", "Direct");
        assert_eq!(matrix.presence("g1", &dyn_call), Some(true));
        assert_eq!(matrix.presence("g2", &gabija()), Some(true));

        let g1 = matrix.row("g1").unwrap();
        assert_eq!(g1.summary.statuses.total(), 3);
        assert_eq!(g1.summary.statuses.get(ResolutionStatus::NoEvidence), 1);
        assert_eq!(g1.summary.curated, 1);
        assert_eq!(g1.summary.systems, 2);
    }

    #[test]
    fn no_evidence_never_becomes_a_column() {
        let matrix = build_matrix(&corpus(), &curation()).unwrap();
        assert!(matrix.column_index(&CanonicalCall::no_hit()).is_none());
        assert!(matrix.columns.iter().all(|c| !c.is_no_hit()));
    }

    #[test]
    fn uncurated_pattern_fails_deterministically() {
        let mut records = corpus();
        records.push(record(
            "g3",
            "p1",
            ["Novel", "No_hit", "No_hit", "No_hit"],
            ResolutionStatus::Unresolved,
            CanonicalCall::unresolved(),
        ));
        let expected = records.last().unwrap().pattern_key();

        for _ in 0..3 {
            match build_matrix(&records, &curation()) {
                Err(ReconcileError::UncuratedPattern { pattern, missing }) => {
                    assert_eq!(pattern, expected);
                    assert_eq!(missing, 1);
                }
                other => panic!("expected UncuratedPattern, got {other:?}"),
            }
        }
    }

    #[test]
    fn writers_emit_binary_counts_and_summary() {
        let matrix = build_matrix(&corpus(), &curation()).unwrap();

        let mut out = Vec::new();
        matrix.write_presence(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "genome_id,Dynamins:subtype_unresolved:Direct,Gabija:Gabija:Abi"
        );
        assert_eq!(lines[1], "g1,1,1");
        assert_eq!(lines[2], "g2,1,1");

        let mut out = Vec::new();
        matrix.write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(
            "genome_id,proteins,CONCORDANT,BLAST_RESOLVED,CONFLICT,UNRESOLVED,NO_EVIDENCE,curated,defence_systems"
        ));
        assert!(text.contains("g1,3,1,0,1,0,1,1,2"));
    }
}
