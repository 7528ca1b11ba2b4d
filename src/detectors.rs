//src/detectors.rs

use std::io::BufRead;
use std::path::Path;

use crate::error::{ReconcileError, Result};
use crate::input::{column_index, delimited_reader};
use crate::types::ParseStats;

/// Where a detector keeps the protein id and the system label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorFormat {
    pub name: &'static str,
    pub delimiter: u8,
    pub id_column: String,
    pub label_column: String,
}

impl DetectorFormat {
    /// PADLOC-style CSV: `target.name`, `system`.
    pub fn detector_a() -> Self {
        Self {
            name: "Detector A",
            delimiter: b',',
            id_column: "target.name".to_string(),
            label_column: "system".to_string(),
        }
    }

    /// DefenseFinder-style TSV: `hit_id`, `subtype`.
    pub fn detector_b() -> Self {
        Self {
            name: "Detector B",
            delimiter: b'\t',
            id_column: "hit_id".to_string(),
            label_column: "subtype".to_string(),
        }
    }
}

/// One detector annotation: a protein and the raw label it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorRow {
    pub protein_id: String,
    pub label: String,
}

/// Reads the id/label columns of a detector table. A file with no header at
/// all is empty; a header without the configured columns is `MissingColumn`.
/// Rows with a blank id or label are skipped and counted.
pub fn read_detector_rows<R: BufRead + 'static>(
    reader: R,
    format: &DetectorFormat,
    source: &Path,
) -> Result<(Vec<DetectorRow>, ParseStats)> {
    let mut rdr = delimited_reader(Box::new(reader), format.delimiter);
    let mut stats = ParseStats::default();
    let mut rows = Vec::new();

    let headers = rdr.headers()?.clone();
    if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
        log::info!("{} table is empty: {}", format.name, source.display());
        return Ok((rows, stats));
    }
    let id_idx = column_index(&headers, &format.id_column, source)?;
    let label_idx = column_index(&headers, &format.label_column, source)?;

    for (idx, record) in rdr.records().enumerate() {
        stats.rows_read += 1;
        // header is line 1
        let line = idx + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                stats.rows_skipped += 1;
                log::warn!("skipping {} row at {}:{}: {}", format.name, source.display(), line, e);
                continue;
            }
        };

        let protein_id = record.get(id_idx).unwrap_or("").trim();
        let label = record.get(label_idx).unwrap_or("").trim();
        if protein_id.is_empty() || label.is_empty() {
            stats.rows_skipped += 1;
            let err = ReconcileError::MalformedRow {
                path: source.to_path_buf(),
                line,
                reason: format!("blank {} or {}", format.id_column, format.label_column),
            };
            log::warn!("skipping {} row: {err}", format.name);
            continue;
        }

        rows.push(DetectorRow {
            protein_id: protein_id.to_string(),
            label: label.to_string(),
        });
    }

    log::info!(
        "{}: {} valid rows ({} skipped) from {}",
        format.name,
        rows.len(),
        stats.rows_skipped,
        source.display()
    );
    Ok((rows, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_detector_a_csv() {
        let text = "system.number,seqid,system,target.name,hmm.accession\n\
                    1,contig1,CBASS_other,g1@locus_001,PDLC001\n\
                    1,contig1,,g1@locus_002,PDLC002\n\
                    2,contig1,DISARM_1,g1@locus_003,PDLC003\n";
        let (rows, stats) = read_detector_rows(
            Cursor::new(text.as_bytes().to_vec()),
            &DetectorFormat::detector_a(),
            Path::new("g1_padloc.csv"),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "CBASS_other");
        assert_eq!(rows[1].protein_id, "g1@locus_003");
        assert_eq!(stats, ParseStats { rows_read: 3, rows_skipped: 1 });
    }

    #[test]
    fn reads_detector_b_tsv() {
        let text = "replicon\thit_id\tgene_name\tsubtype\n\
                    contig1\tlocus_010\tCap2\tCBASS_IIs\n";
        let (rows, _) = read_detector_rows(
            Cursor::new(text.as_bytes().to_vec()),
            &DetectorFormat::detector_b(),
            Path::new("g1_defense_finder_genes.tsv"),
        )
        .unwrap();
        assert_eq!(
            rows,
            vec![DetectorRow {
                protein_id: "locus_010".to_string(),
                label: "CBASS_IIs".to_string()
            }]
        );
    }

    #[test]
    fn empty_file_yields_no_rows() {
        let (rows, stats) = read_detector_rows(
            Cursor::new(Vec::new()),
            &DetectorFormat::detector_b(),
            Path::new("empty.tsv"),
        )
        .unwrap();
        assert!(rows.is_empty());
        assert_eq!(stats.rows_read, 0);
    }

    #[test]
    fn missing_column_is_reported() {
        let text = "replicon\tgene\n c1\tx\n";
        let err = read_detector_rows(
            Cursor::new(text.as_bytes().to_vec()),
            &DetectorFormat::detector_b(),
            Path::new("bad.tsv"),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingColumn { ref column, .. } if column == "hit_id"));
    }
}
