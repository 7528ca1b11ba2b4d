//! Tabular alignment results (BLAST outfmt 6 with three extra columns).
//!
//! ```text
//! qseqid sseqid pident length mismatch gapopen qstart qend sstart send evalue bitscore qcovs qlen slen
//! ```
//!
//! Forward searches put the genome protein in `qseqid`; reverse searches put
//! the reference protein (`locus#system_1`) in `qseqid` and the genome protein
//! in `sseqid`.

use std::io::BufRead;
use std::path::Path;

use ahash::AHashMap;

use crate::error::{ReconcileError, Result};
use crate::input::open_input;
use crate::names::NameNormalizer;
use crate::types::{AlignmentHit, Direction, ParseStats};

pub const ALIGNMENT_COLUMNS: [&str; 15] = [
    "qseqid", "sseqid", "pident", "length", "mismatch", "gapopen", "qstart", "qend", "sstart",
    "send", "evalue", "bitscore", "qcovs", "qlen", "slen",
];

impl AlignmentHit {
    /// Parses one tab-separated row. The error is a human-readable reason.
    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != ALIGNMENT_COLUMNS.len() {
            return Err(format!(
                "expected {} columns, found {}",
                ALIGNMENT_COLUMNS.len(),
                fields.len()
            ));
        }
        if fields[0].is_empty() || fields[1].is_empty() {
            return Err("empty query or subject id".to_string());
        }

        fn num<T: std::str::FromStr>(fields: &[&str], idx: usize) -> std::result::Result<T, String> {
            fields[idx]
                .parse()
                .map_err(|_| format!("non-numeric {} '{}'", ALIGNMENT_COLUMNS[idx], fields[idx]))
        }

        // NaN and inf parse as f64 but do not order against real scores
        fn real(fields: &[&str], idx: usize) -> std::result::Result<f64, String> {
            let v: f64 = num(fields, idx)?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(format!("non-finite {} '{}'", ALIGNMENT_COLUMNS[idx], fields[idx]))
            }
        }

        Ok(Self {
            query_id: fields[0].to_string(),
            subject_id: fields[1].to_string(),
            pident: real(&fields, 2)?,
            length: num(&fields, 3)?,
            mismatches: num(&fields, 4)?,
            gap_opens: num(&fields, 5)?,
            q_start: num(&fields, 6)?,
            q_end: num(&fields, 7)?,
            s_start: num(&fields, 8)?,
            s_end: num(&fields, 9)?,
            evalue: real(&fields, 10)?,
            bit_score: real(&fields, 11)?,
            query_coverage: real(&fields, 12)?,
            query_len: num(&fields, 13)?,
            subject_len: num(&fields, 14)?,
        })
    }
}

/// Reads an alignment table. A missing file is `InputNotFound`; an empty
/// file yields no hits. Malformed rows are logged, skipped and counted.
pub fn read_hits(path: &Path, what: &'static str) -> Result<(Vec<AlignmentHit>, ParseStats)> {
    let reader = open_input(path, what)?;
    read_hits_from(reader, path)
}

pub fn read_hits_from<R: BufRead>(reader: R, source: &Path) -> Result<(Vec<AlignmentHit>, ParseStats)> {
    let mut hits = Vec::new();
    let mut stats = ParseStats::default();

    let mut seen_data = false;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        // optional header, only before the first data row
        let first = !seen_data;
        seen_data = true;
        if first && trimmed.starts_with(ALIGNMENT_COLUMNS[0]) {
            continue;
        }

        stats.rows_read += 1;
        match AlignmentHit::parse_line(trimmed) {
            Ok(hit) => hits.push(hit),
            Err(reason) => {
                stats.rows_skipped += 1;
                let err = ReconcileError::MalformedRow {
                    path: source.to_path_buf(),
                    line: idx + 1,
                    reason,
                };
                log::warn!("skipping row: {err}");
            }
        }
    }

    log::debug!(
        "{}: {} alignment rows, {} skipped",
        source.display(),
        stats.rows_read,
        stats.rows_skipped
    );
    Ok((hits, stats))
}

/// Keeps the highest bit score hit per key. Ties go to the first hit seen;
/// keys come out in first-seen order.
pub fn best_by_key<F>(hits: Vec<AlignmentHit>, key: F) -> Vec<AlignmentHit>
where
    F: Fn(&AlignmentHit) -> &str,
{
    let mut slot_of: AHashMap<String, usize> = AHashMap::with_capacity(hits.len());
    let mut best: Vec<AlignmentHit> = Vec::new();

    for hit in hits {
        match slot_of.get(key(&hit)) {
            Some(&slot) => {
                if hit.bit_score > best[slot].bit_score {
                    best[slot] = hit;
                }
            }
            None => {
                slot_of.insert(key(&hit).to_string(), best.len());
                best.push(hit);
            }
        }
    }
    best
}

/// Cleans and deduplicates hits for one search direction.
///
/// Forward hits only get their subject id normalized. Reverse hits get their
/// query id normalized and are then reduced to the single best hit per
/// genome protein (subject).
pub fn filter_hits(
    hits: Vec<AlignmentHit>,
    direction: Direction,
    normalizer: &NameNormalizer,
) -> Vec<AlignmentHit> {
    match direction {
        Direction::Forward => hits
            .into_iter()
            .map(|mut hit| {
                hit.subject_id = normalizer.normalize_hit_id(&hit.subject_id);
                hit
            })
            .collect(),
        Direction::Reverse => {
            let normalized = hits
                .into_iter()
                .map(|mut hit| {
                    hit.query_id = normalizer.normalize_hit_id(&hit.query_id);
                    hit
                })
                .collect();
            best_by_key(normalized, |hit| hit.subject_id.as_str())
        }
    }
}

/// Length-consistency check for hits that have no detector support:
/// query/subject length ratio and alignment length over mean length must
/// both fall in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthRatioFilter {
    pub min: f64,
    pub max: f64,
}

impl Default for LengthRatioFilter {
    fn default() -> Self {
        Self { min: 0.8, max: 1.25 }
    }
}

impl LengthRatioFilter {
    pub fn check(&self, hit: &AlignmentHit) -> std::result::Result<(), String> {
        let q = hit.query_len as f64;
        let s = hit.subject_len as f64;

        let qs_ratio = if s > 0.0 { q / s } else { 0.0 };
        if !(self.min..=self.max).contains(&qs_ratio) {
            return Err(format!(
                "Q/S ratio {:.3} outside {}-{}",
                qs_ratio, self.min, self.max
            ));
        }

        let mean_len = (q + s) / 2.0;
        let coverage = if mean_len > 0.0 { hit.length as f64 / mean_len } else { 0.0 };
        if !(self.min..=self.max).contains(&coverage) {
            return Err(format!(
                "coverage {:.3} outside {}-{}",
                coverage, self.min, self.max
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hit(q: &str, s: &str, score: f64) -> AlignmentHit {
        AlignmentHit {
            query_id: q.to_string(),
            subject_id: s.to_string(),
            pident: 90.0,
            length: 300,
            mismatches: 10,
            gap_opens: 0,
            q_start: 1,
            q_end: 300,
            s_start: 1,
            s_end: 300,
            evalue: 1e-50,
            bit_score: score,
            query_coverage: 100.0,
            query_len: 300,
            subject_len: 310,
        }
    }

    #[test]
    fn reverse_keeps_best_hit_after_normalizing_queries() {
        let n = NameNormalizer::new(Vec::<String>::new());
        let hits = vec![hit("geneX_1", "sysA", 50.0), hit("geneX", "sysA", 80.0)];
        let out = filter_hits(hits, Direction::Reverse, &n);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].query_id, "geneX");
        assert_eq!(out[0].bit_score, 80.0);
    }

    #[test]
    fn reverse_returns_one_top_hit_per_subject() {
        let n = NameNormalizer::default();
        let hits = vec![
            hit("r1#Gabija_1", "g@p1", 120.0),
            hit("r2#Zorya", "g@p2", 40.0),
            hit("r3#Thoeris", "g@p1", 300.0),
            hit("r4#Zorya", "g@p2", 40.0),
            hit("r5#Gabija", "g@p1", 299.0),
        ];
        let out = filter_hits(hits.clone(), Direction::Reverse, &n);
        assert_eq!(out.len(), 2);
        for kept in &out {
            assert!(hits
                .iter()
                .filter(|h| h.subject_id == kept.subject_id)
                .all(|h| kept.bit_score >= h.bit_score));
        }
        assert_eq!(out[0].subject_id, "g@p1");
        assert_eq!(out[0].query_id, "r3#Thoeris");
        // tie: first encountered wins
        assert_eq!(out[1].query_id, "r2#Zorya");
    }

    #[test]
    fn forward_is_pass_through_cleaning() {
        let n = NameNormalizer::default();
        let hits = vec![
            hit("g@p1", "r1#Gabija_1", 10.0),
            hit("g@p1", "r2#DISARM_1", 20.0),
            hit("g@p1", "r1#Gabija_1", 5.0),
        ];
        let out = filter_hits(hits, Direction::Forward, &n);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].subject_id, "r1#Gabija");
        assert_eq!(out[1].subject_id, "r2#DISARM_1");
    }

    #[test]
    fn parse_skips_malformed_rows_and_header() {
        let text = "qseqid\tsseqid\tpident\tlength\tmismatch\tgapopen\tqstart\tqend\tsstart\tsend\tevalue\tbitscore\tqcovs\tqlen\tslen\n\
                    g@p1\tr1#Gabija_1\t98.5\t300\t4\t0\t1\t300\t1\t300\t1e-120\t550\t100\t300\t302\n\
                    g@p2\tr2#Zorya\t98.5\t300\t4\t0\t1\t300\t1\t300\t1e-120\tNaNx\t100\t300\t302\n\
                    g@p3\tshort\t1\n\
                    \n";
        let (hits, stats) = read_hits_from(Cursor::new(text), Path::new("mem.tsv")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].bit_score, 550.0);
        assert_eq!(stats, ParseStats { rows_read: 3, rows_skipped: 2 });
    }

    fn row(q: &str, s: &str, bit_score: &str) -> String {
        format!("{q}\t{s}\t97.0\t300\t3\t0\t1\t300\t1\t300\t1e-90\t{bit_score}\t100\t300\t300\n")
    }

    #[test]
    fn non_finite_scores_are_malformed() {
        let mut text = row("r1#Gabija", "g@p1", "NaN");
        text += &row("r2#Zorya", "g@p1", "80");
        text += &row("r3#Lamassu", "g@p2", "inf");
        let (hits, stats) = read_hits_from(Cursor::new(text), Path::new("rev.tsv")).unwrap();
        assert_eq!(stats, ParseStats { rows_read: 3, rows_skipped: 2 });

        let best = filter_hits(hits, Direction::Reverse, &NameNormalizer::default());
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].query_id, "r2#Zorya");
        assert_eq!(best[0].bit_score, 80.0);

        let bad_evalue = row("q", "s", "50").replace("1e-90", "nan");
        assert!(AlignmentHit::parse_line(bad_evalue.trim_end())
            .unwrap_err()
            .contains("non-finite evalue"));
    }

    #[test]
    fn header_after_comment_lines_is_skipped() {
        let mut text = String::from("# BLASTP 2.15.0+\n# Fields: see below\n");
        text += "qseqid\tsseqid\tpident\tlength\tmismatch\tgapopen\tqstart\tqend\tsstart\tsend\tevalue\tbitscore\tqcovs\tqlen\tslen\n";
        text += &row("g@p1", "r1#Gabija", "120");
        // a later qseqid line is data, and malformed
        text += "qseqid\tsseqid\n";
        let (hits, stats) = read_hits_from(Cursor::new(text), Path::new("fwd.tsv")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(stats, ParseStats { rows_read: 2, rows_skipped: 1 });
    }

    #[test]
    fn empty_table_is_not_an_error() {
        let (hits, stats) = read_hits_from(Cursor::new(""), Path::new("empty.tsv")).unwrap();
        assert!(hits.is_empty());
        assert_eq!(stats.rows_read, 0);
    }

    #[test]
    fn missing_table_is_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_hits(&dir.path().join("nope.tsv"), "Reverse alignment").unwrap_err();
        assert!(matches!(err, ReconcileError::InputNotFound { .. }));
    }

    #[test]
    fn length_filter_bounds() {
        let f = LengthRatioFilter::default();
        assert!(f.check(&hit("q", "s", 1.0)).is_ok());

        let mut short = hit("q", "s", 1.0);
        short.subject_len = 600;
        assert!(f.check(&short).unwrap_err().contains("Q/S ratio"));

        let mut partial = hit("q", "s", 1.0);
        partial.length = 100;
        assert!(f.check(&partial).unwrap_err().contains("coverage"));
    }
}
