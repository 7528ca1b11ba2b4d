//src/names.rs

use ahash::AHashSet;

use crate::error::{ReconcileError, Result};

/// Duplicate-hit marker appended by the reference set builder.
const DUPLICATE_SUFFIX: &str = "_1";

/// Separates the locus tag from the defence-system label in reference ids,
/// e.g. `BC_0123#CBASS_II_1`.
const SYSTEM_SEPARATOR: char = '#';

/// Separates the genome id from the locus tag: `genome@locus`.
pub const GENOME_SEPARATOR: char = '@';

/// Base names whose `_1` ending is part of the canonical name.
pub const DEFAULT_SUFFIX_EXCEPTIONS: &[&str] = &["DISARM", "PD-T7-5"];

/// Strips the trailing `_1` duplicate marker from labels, except for
/// names that legitimately end that way.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    exceptions: AHashSet<String>,
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX_EXCEPTIONS.iter().copied())
    }
}

impl NameNormalizer {
    pub fn new<I, S>(exceptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exceptions: exceptions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_exception(&self, base: &str) -> bool {
        self.exceptions.contains(base)
    }

    /// Removes at most one trailing `_1`.
    pub fn normalize(&self, label: &str) -> String {
        match label.strip_suffix(DUPLICATE_SUFFIX) {
            Some(base) if !self.is_exception(base) => base.to_string(),
            _ => label.to_string(),
        }
    }

    /// Normalizes the system part of a `locus#system` id, keeping the locus.
    /// Ids without a `#` are normalized whole.
    pub fn normalize_hit_id(&self, id: &str) -> String {
        match id.rsplit_once(SYSTEM_SEPARATOR) {
            Some((locus, system)) => {
                format!("{}{}{}", locus, SYSTEM_SEPARATOR, self.normalize(system))
            }
            None => self.normalize(id),
        }
    }
}

/// The defence-system label of a reference id (`locus#system` -> `system`).
pub fn system_label(id: &str) -> &str {
    id.rsplit_once(SYSTEM_SEPARATOR)
        .map(|(_, system)| system)
        .unwrap_or(id)
}

/// Genome id of a prefixed protein id, if it has one.
pub fn genome_of(protein_id: &str) -> Option<&str> {
    protein_id
        .split_once(GENOME_SEPARATOR)
        .map(|(genome, _)| genome)
}

/// Adds `genome@` to a protein id. Idempotent for the same genome; an id
/// already owned by a different genome is rejected.
pub fn with_genome_prefix(genome_id: &str, protein_id: &str) -> Result<String> {
    match genome_of(protein_id) {
        Some(existing) if existing == genome_id => Ok(protein_id.to_string()),
        Some(_) => Err(ReconcileError::ConflictingGenomePrefix {
            id: protein_id.to_string(),
            expected: genome_id.to_string(),
        }),
        None => Ok(format!("{}{}{}", genome_id, GENOME_SEPARATOR, protein_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_duplicate_marker() {
        let n = NameNormalizer::default();
        assert_eq!(n.normalize("CBASS_II_1"), "CBASS_II");
        assert_eq!(n.normalize("Gabija"), "Gabija");
        // only the outer suffix goes
        assert_eq!(n.normalize("Zorya_1_1"), "Zorya_1");
    }

    #[test]
    fn exception_names_keep_suffix() {
        let n = NameNormalizer::default();
        for base in DEFAULT_SUFFIX_EXCEPTIONS {
            let label = format!("{base}_1");
            assert_eq!(n.normalize(&label), label);
        }
        assert_eq!(n.normalize("GAO_19"), "GAO_19");
    }

    #[test]
    fn normalize_is_idempotent() {
        let n = NameNormalizer::new(["DISARM"]);
        for label in ["geneX_1", "geneX", "DISARM_1", "DISARM", "PD-T7-5_1", "a_11"] {
            let once = n.normalize(label);
            assert_eq!(n.normalize(&once), once, "label {label}");
        }
    }

    #[test]
    fn hit_ids_normalize_system_part_only() {
        let n = NameNormalizer::default();
        assert_eq!(n.normalize_hit_id("BC_01_1#Gabija_1"), "BC_01_1#Gabija");
        assert_eq!(n.normalize_hit_id("BC_02#DISARM_1"), "BC_02#DISARM_1");
        assert_eq!(n.normalize_hit_id("geneX_1"), "geneX");
        assert_eq!(system_label("BC_01#Gabija"), "Gabija");
        assert_eq!(system_label("Gabija"), "Gabija");
    }

    #[test]
    fn genome_prefix_is_idempotent() {
        let once = with_genome_prefix("1004153.3", "locus_001").unwrap();
        assert_eq!(once, "1004153.3@locus_001");
        let twice = with_genome_prefix("1004153.3", &once).unwrap();
        assert_eq!(twice, once);
        assert_eq!(genome_of(&once), Some("1004153.3"));
        assert_eq!(genome_of("locus_001"), None);
    }

    #[test]
    fn foreign_genome_prefix_is_rejected() {
        let err = with_genome_prefix("g2", "g1@locus_001").unwrap_err();
        assert!(matches!(err, ReconcileError::ConflictingGenomePrefix { .. }));
    }
}
