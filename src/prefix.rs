//src/prefix.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::detectors::DetectorFormat;
use crate::error::{ReconcileError, Result};
use crate::input::column_index;
use crate::names::with_genome_prefix;

/// Suffix of the untouched copy kept next to a rewritten file.
pub const BACKUP_SUFFIX: &str = ".original";

/// Suffix of the per-genome detector output directories.
pub const TOOL_OUTPUT_DIR_SUFFIX: &str = "_TOOLOUTPUTS";

const DETECTOR_A_STEM: &str = "_padloc";
const DETECTOR_B_STEM: &str = "_defense_finder_genes";

/// Kind of upstream file, judged by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixTarget {
    Fasta,
    DetectorA,
    DetectorB,
}

impl PrefixTarget {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".faa") {
            Some(PrefixTarget::Fasta)
        } else if name.ends_with(".csv") && name.contains("padloc") {
            Some(PrefixTarget::DetectorA)
        } else if name.ends_with(".tsv") && name.contains("defense_finder_genes") {
            Some(PrefixTarget::DetectorB)
        } else {
            None
        }
    }
}

/// Genome id implied by a file name: the stem, minus a detector suffix.
pub fn infer_genome_id(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let genome = [DETECTOR_A_STEM, DETECTOR_B_STEM]
        .iter()
        .find_map(|suffix| stem.strip_suffix(suffix))
        .unwrap_or(stem);
    (!genome.is_empty()).then(|| genome.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefixStats {
    pub records: usize,
    pub updated: usize,
}

/// Adds the genome prefix to protein ids in place, keeping the first run's
/// input as `<file>.original`. Ids already carrying the same prefix are left alone, so running twice
/// changes nothing; an id carrying another genome's prefix aborts the file
/// before anything is written.
pub fn prefix_file(
    path: &Path,
    genome_id: Option<&str>,
    detector_a: &DetectorFormat,
    detector_b: &DetectorFormat,
) -> Result<PrefixStats> {
    if !path.exists() {
        return Err(ReconcileError::InputNotFound {
            what: "Input",
            path: path.to_path_buf(),
        });
    }
    let target = PrefixTarget::from_path(path).ok_or_else(|| {
        ReconcileError::Config(format!(
            "{}: expected a .faa, padloc .csv or defense_finder_genes .tsv file",
            path.display()
        ))
    })?;
    let genome_id = match genome_id {
        Some(g) => g.to_string(),
        None => infer_genome_id(path).ok_or_else(|| {
            ReconcileError::Config(format!("{}: cannot infer a genome id", path.display()))
        })?,
    };

    let original = fs::read_to_string(path)?;
    let (rewritten, stats) = match target {
        PrefixTarget::Fasta => prefix_fasta(&original, &genome_id)?,
        PrefixTarget::DetectorA => prefix_table(&original, &genome_id, detector_a, path)?,
        PrefixTarget::DetectorB => prefix_table(&original, &genome_id, detector_b, path)?,
    };

    let mut backup = PathBuf::from(path);
    backup.as_mut_os_string().push(BACKUP_SUFFIX);
    // a second run must not clobber the first backup
    if !backup.exists() {
        fs::copy(path, &backup)?;
    }
    fs::write(path, rewritten)?;

    log::info!(
        "{}: genome {}, updated {}/{} ids",
        path.display(),
        genome_id,
        stats.updated,
        stats.records
    );
    Ok(stats)
}

/// Files a directory run touches, sorted, each with the genome id taken from
/// its `<genome>_TOOLOUTPUTS` parent when it has one.
pub fn directory_targets(dir: &Path) -> Result<Vec<(PathBuf, Option<String>)>> {
    if !dir.is_dir() {
        return Err(ReconcileError::InputNotFound {
            what: "Directory",
            path: dir.to_path_buf(),
        });
    }
    let mut targets = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if PrefixTarget::from_path(&path).is_some() {
                targets.push((path, None));
            }
            continue;
        }
        let genome = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(TOOL_OUTPUT_DIR_SUFFIX))
            .filter(|g| !g.is_empty())
            .map(str::to_string);
        let Some(genome) = genome else {
            continue;
        };
        for (stem, ext) in [(DETECTOR_A_STEM, "csv"), (DETECTOR_B_STEM, "tsv")] {
            let file = path.join(format!("{genome}{stem}.{ext}"));
            if file.is_file() {
                targets.push((file, Some(genome.clone())));
            } else {
                log::warn!("{}: not found", file.display());
            }
        }
    }
    targets.sort();
    Ok(targets)
}

/// Prefixes every file [`directory_targets`] finds in `dir`. A file that
/// fails is reported and the rest carry on.
pub fn prefix_directory(
    dir: &Path,
    detector_a: &DetectorFormat,
    detector_b: &DetectorFormat,
) -> Result<Vec<(PathBuf, Result<PrefixStats>)>> {
    let targets = directory_targets(dir)?;
    log::info!("{}: {} files to prefix", dir.display(), targets.len());
    Ok(targets
        .into_iter()
        .map(|(path, genome)| {
            let outcome = prefix_file(&path, genome.as_deref(), detector_a, detector_b);
            if let Err(e) = &outcome {
                log::warn!("{}: {e}", path.display());
            }
            (path, outcome)
        })
        .collect())
}

/// Rewrites `>locus desc` headers to `>genome@locus desc`.
pub fn prefix_fasta(contents: &str, genome_id: &str) -> Result<(String, PrefixStats)> {
    let mut out = String::with_capacity(contents.len() + 64);
    let mut stats = PrefixStats::default();

    for line in contents.split_inclusive('\n') {
        let Some(header) = line.strip_prefix('>') else {
            out.push_str(line);
            continue;
        };
        stats.records += 1;
        let body = header.trim_end_matches(['\n', '\r']);
        let ending = &header[body.len()..];
        let (id, rest) = match body.find(char::is_whitespace) {
            Some(i) => body.split_at(i),
            None => (body, ""),
        };
        let prefixed = with_genome_prefix(genome_id, id)?;
        if prefixed != id {
            stats.updated += 1;
        }
        out.push('>');
        out.push_str(&prefixed);
        out.push_str(rest);
        out.push_str(ending);
    }
    Ok((out, stats))
}

/// Rewrites the id column of a detector table, leaving every other cell as is.
pub fn prefix_table(
    contents: &str,
    genome_id: &str,
    format: &DetectorFormat,
    source: &Path,
) -> Result<(String, PrefixStats)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(format.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();
    let id_idx = column_index(&headers, &format.id_column, source)?;

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(format.delimiter)
        .flexible(true)
        .from_writer(Vec::new());
    wtr.write_record(&headers)?;

    let mut stats = PrefixStats::default();
    for record in rdr.records() {
        let record = record?;
        stats.records += 1;
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        if let Some(id) = fields.get_mut(id_idx) {
            if !id.trim().is_empty() {
                let prefixed = with_genome_prefix(genome_id, id.trim())?;
                if prefixed != *id {
                    stats.updated += 1;
                    *id = prefixed;
                }
            }
        }
        wtr.write_record(&fields)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| ReconcileError::Io(e.into_error()))?;
    let text = String::from_utf8(bytes).map_err(|e| ReconcileError::MalformedRow {
        path: source.to_path_buf(),
        line: 0,
        reason: e.to_string(),
    })?;
    Ok((text, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_genome_ids_from_file_names() {
        assert_eq!(infer_genome_id(Path::new("/x/1004153.3.faa")).as_deref(), Some("1004153.3"));
        assert_eq!(infer_genome_id(Path::new("g7_padloc.csv")).as_deref(), Some("g7"));
        assert_eq!(
            infer_genome_id(Path::new("g7_defense_finder_genes.tsv")).as_deref(),
            Some("g7")
        );
        assert_eq!(PrefixTarget::from_path(Path::new("g7.faa")), Some(PrefixTarget::Fasta));
        assert_eq!(PrefixTarget::from_path(Path::new("g7.fna")), None);
    }

    #[test]
    fn fasta_headers_are_prefixed_once() {
        let faa = ">locus_1 DNA helicase\nMKV\nLLA\n>g1@locus_2\nMAA\n";
        let (once, stats) = prefix_fasta(faa, "g1").unwrap();
        assert_eq!(once, ">g1@locus_1 DNA helicase\nMKV\nLLA\n>g1@locus_2\nMAA\n");
        assert_eq!(stats, PrefixStats { records: 2, updated: 1 });

        let (twice, stats) = prefix_fasta(&once, "g1").unwrap();
        assert_eq!(twice, once);
        assert_eq!(stats.updated, 0);

        assert!(matches!(
            prefix_fasta(">g2@locus_9\nM\n", "g1"),
            Err(ReconcileError::ConflictingGenomePrefix { .. })
        ));
    }

    #[test]
    fn detector_tables_keep_other_columns() {
        let tsv = "hit_id\tsubtype\tscore\np1\tGabija\t12.5\ng1@p2\tEleos\t3\n";
        let (out, stats) =
            prefix_table(tsv, "g1", &DetectorFormat::detector_b(), Path::new("t.tsv")).unwrap();
        assert_eq!(out, "hit_id\tsubtype\tscore\ng1@p1\tGabija\t12.5\ng1@p2\tEleos\t3\n");
        assert_eq!(stats, PrefixStats { records: 2, updated: 1 });

        let err = prefix_table("id,system\np1,X\n", "g1", &DetectorFormat::detector_a(), Path::new("a.csv"));
        assert!(matches!(err, Err(ReconcileError::MissingColumn { .. })));
    }

    #[test]
    fn prefix_file_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g3_padloc.csv");
        fs::write(&path, "system,target.name\nGabija,p1\n").unwrap();

        let stats = prefix_file(
            &path,
            None,
            &DetectorFormat::detector_a(),
            &DetectorFormat::detector_b(),
        )
        .unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "system,target.name\nGabija,g3@p1\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("g3_padloc.csv.original")).unwrap(),
            "system,target.name\nGabija,p1\n"
        );
    }

    #[test]
    fn directory_run_covers_tool_output_dirs_and_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let g5 = dir.path().join("g5_TOOLOUTPUTS");
        fs::create_dir(&g5).unwrap();
        fs::write(g5.join("g5_padloc.csv"), "system,target.name\nGabija,p1\n").unwrap();
        fs::write(g5.join("g5_defense_finder_genes.tsv"), "hit_id\tsubtype\np1\tEleos\n").unwrap();
        fs::create_dir(dir.path().join("misc")).unwrap();
        fs::write(dir.path().join("g5.faa"), ">p1\nMKV\n").unwrap();
        fs::write(dir.path().join("g6.faa"), ">g1@p1\nMKV\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let a = DetectorFormat::detector_a();
        let b = DetectorFormat::detector_b();
        let results = prefix_directory(dir.path(), &a, &b).unwrap();
        let names: Vec<String> = results
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["g5.faa", "g5_defense_finder_genes.tsv", "g5_padloc.csv", "g6.faa"]
        );
        // g6.faa already carries another genome's ids; the rest still run
        assert!(matches!(
            results[3].1,
            Err(ReconcileError::ConflictingGenomePrefix { .. })
        ));
        assert!(results[..3].iter().all(|(_, r)| matches!(r, Ok(s) if s.updated == 1)));
        assert_eq!(
            fs::read_to_string(g5.join("g5_defense_finder_genes.tsv")).unwrap(),
            "hit_id\tsubtype\ng5@p1\tEleos\n"
        );

        // backups are not picked up on a second run, which changes nothing
        let again = prefix_directory(dir.path(), &a, &b).unwrap();
        assert_eq!(again.len(), 4);
        assert!(again[..3].iter().all(|(_, r)| matches!(r, Ok(s) if s.updated == 0)));
    }
}
