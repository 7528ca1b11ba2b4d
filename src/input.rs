//src/input.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::config::MissingInputPolicy;
use crate::error::{ReconcileError, Result};

/// Opens an evidence table for reading, transparently decompressing `.gz`.
/// An absent file is `InputNotFound`; `what` names the file in the error.
pub fn open_input(path: &Path, what: &'static str) -> Result<Box<dyn BufRead>> {
    if !path.exists() {
        return Err(ReconcileError::InputNotFound {
            what,
            path: path.to_path_buf(),
        });
    }
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Like [`open_input`], but under `TreatAsEmpty` a missing file becomes
/// `Ok(None)` after a warning instead of an error.
pub fn open_with_policy(
    path: &Path,
    what: &'static str,
    policy: MissingInputPolicy,
) -> Result<Option<Box<dyn BufRead>>> {
    match open_input(path, what) {
        Ok(reader) => Ok(Some(reader)),
        Err(ReconcileError::InputNotFound { .. }) if policy == MissingInputPolicy::TreatAsEmpty => {
            log::warn!("{} file missing, treating as empty: {}", what, path.display());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// A header-aware delimited reader over any opened input.
pub fn delimited_reader(reader: Box<dyn BufRead>, delimiter: u8) -> csv::Reader<Box<dyn BufRead>> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Index of a named column in a header record.
pub fn column_index(headers: &csv::StringRecord, column: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| ReconcileError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    #[test]
    fn missing_file_is_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_input(&dir.path().join("absent.tsv"), "Forward alignment").err().unwrap();
        assert!(matches!(err, ReconcileError::InputNotFound { what: "Forward alignment", .. }));
    }

    #[test]
    fn tolerant_policy_turns_missing_into_none() {
        let dir = tempfile::tempdir().unwrap();
        let opened = open_with_policy(
            &dir.path().join("absent.tsv"),
            "Detector A",
            MissingInputPolicy::TreatAsEmpty,
        )
        .unwrap();
        assert!(opened.is_none());
    }

    #[test]
    fn gz_input_is_decompressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.tsv.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"a\tb\n").unwrap();
        enc.finish().unwrap();

        let mut text = String::new();
        open_input(&path, "Forward alignment")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "a\tb\n");
    }
}
