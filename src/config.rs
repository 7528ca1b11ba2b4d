//src/config.rs

use crate::alignment::LengthRatioFilter;
use crate::consensus::policy::OutcomePolicy;
use crate::corpus::InputLayout;
use crate::detectors::DetectorFormat;
use crate::error::{ReconcileError, Result};
use crate::names::{NameNormalizer, DEFAULT_SUFFIX_EXCEPTIONS};

/// How a missing evidence file is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingInputPolicy {
    /// Missing input is an `InputNotFound` error (the genome is skipped in a corpus run).
    #[default]
    Strict,
    /// Missing input is logged and read as an empty table.
    TreatAsEmpty,
}

/// Run-wide settings. Built once, then only borrowed.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Base names that keep their `_1` suffix.
    pub suffix_exceptions: Vec<String>,
    pub outcome_policy: OutcomePolicy,
    pub missing_inputs: MissingInputPolicy,
    /// Applied to alignment-only evidence (both detectors silent). `None` disables it.
    pub blast_only_filter: Option<LengthRatioFilter>,
    /// How many protein ids to list per curation pattern.
    pub example_limit: usize,
    pub detector_a: DetectorFormat,
    pub detector_b: DetectorFormat,
    pub layout: InputLayout,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            suffix_exceptions: DEFAULT_SUFFIX_EXCEPTIONS.iter().map(|s| s.to_string()).collect(),
            outcome_policy: OutcomePolicy::default(),
            missing_inputs: MissingInputPolicy::Strict,
            blast_only_filter: Some(LengthRatioFilter::default()),
            example_limit: 5,
            detector_a: DetectorFormat::detector_a(),
            detector_b: DetectorFormat::detector_b(),
            layout: InputLayout::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn normalizer(&self) -> NameNormalizer {
        NameNormalizer::new(self.suffix_exceptions.iter().cloned())
    }

    /// Rejects settings that would make later stages misbehave.
    pub fn validate(&self) -> Result<()> {
        self.outcome_policy.validate()?;
        if let Some(filter) = &self.blast_only_filter {
            if !(filter.min > 0.0 && filter.min <= filter.max) {
                return Err(ReconcileError::Config(format!(
                    "length ratio bounds must satisfy 0 < min <= max, got {}..{}",
                    filter.min, filter.max
                )));
            }
        }
        self.layout.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ReconcileConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.missing_inputs, MissingInputPolicy::Strict);
        assert!(cfg.normalizer().is_exception("DISARM"));
    }

    #[test]
    fn inverted_length_bounds_are_rejected() {
        let cfg = ReconcileConfig {
            blast_only_filter: Some(LengthRatioFilter { min: 1.5, max: 1.0 }),
            ..ReconcileConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ReconcileError::Config(_))));
    }
}
