// src/consensus/policy.rs

use crate::error::{ReconcileError, Result};
use crate::types::SourceTool;

/// How the outcome is picked when agreeing calls report different outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutcomeRule {
    /// Most frequent outcome; ties go to the highest-priority source.
    #[default]
    MajorityThenPriority,
    /// Outcome of the highest-priority present source, ignoring frequency.
    PriorityOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomePolicy {
    pub rule: OutcomeRule,
    /// Highest priority first. Must list every source exactly once.
    pub priority: Vec<SourceTool>,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self {
            rule: OutcomeRule::default(),
            priority: SourceTool::ALL.to_vec(),
        }
    }
}

impl OutcomePolicy {
    /// Parses a comma-separated priority list such as `b,a,forward,reverse`.
    pub fn parse_priority(s: &str) -> Result<Vec<SourceTool>> {
        s.split(',')
            .map(|part| {
                SourceTool::parse(part)
                    .ok_or_else(|| ReconcileError::Config(format!("unknown source '{}'", part.trim())))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let complete = self.priority.len() == SourceTool::ALL.len()
            && SourceTool::ALL.iter().all(|t| self.priority.contains(t));
        if !complete {
            return Err(ReconcileError::Config(format!(
                "outcome priority must name each of detector_a, detector_b, forward, reverse once, got {:?}",
                self.priority
            )));
        }
        Ok(())
    }

    fn rank(&self, tool: SourceTool) -> usize {
        self.priority
            .iter()
            .position(|t| *t == tool)
            .unwrap_or(self.priority.len())
    }

    /// Picks one outcome from `(source, outcome)` pairs. `None` if empty.
    pub fn choose<'a>(&self, votes: &[(SourceTool, &'a str)]) -> Option<&'a str> {
        match self.rule {
            OutcomeRule::PriorityOnly => votes.iter().min_by_key(|v| self.rank(v.0)).map(|v| v.1),
            OutcomeRule::MajorityThenPriority => {
                let count = |outcome: &str| votes.iter().filter(|v| v.1 == outcome).count();
                let top = votes.iter().map(|v| count(v.1)).max()?;
                votes
                    .iter()
                    .filter(|v| count(v.1) == top)
                    .min_by_key(|v| self.rank(v.0))
                    .map(|v| v.1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SourceTool::*;

    #[test]
    fn majority_wins_over_priority() {
        let p = OutcomePolicy::default();
        let votes = [(DetectorA, "Abi"), (DetectorB, "Direct"), (Forward, "Direct")];
        assert_eq!(p.choose(&votes), Some("Direct"));
    }

    #[test]
    fn ties_fall_back_to_priority() {
        let p = OutcomePolicy::default();
        let votes = [(Reverse, "Direct"), (DetectorB, "Abi")];
        assert_eq!(p.choose(&votes), Some("Abi"));

        let custom = OutcomePolicy {
            rule: OutcomeRule::MajorityThenPriority,
            priority: vec![Reverse, Forward, DetectorB, DetectorA],
        };
        assert_eq!(custom.choose(&votes), Some("Direct"));
    }

    #[test]
    fn priority_only_ignores_counts() {
        let p = OutcomePolicy {
            rule: OutcomeRule::PriorityOnly,
            ..OutcomePolicy::default()
        };
        let votes = [(DetectorA, "Abi"), (DetectorB, "Direct"), (Forward, "Direct")];
        assert_eq!(p.choose(&votes), Some("Abi"));
        assert_eq!(p.choose(&[]), None);
    }

    #[test]
    fn priority_parsing_and_validation() {
        let prio = OutcomePolicy::parse_priority("b, a, fwd, rev").unwrap();
        assert_eq!(prio, vec![DetectorB, DetectorA, Forward, Reverse]);
        assert!(OutcomePolicy::parse_priority("a,x").is_err());

        let partial = OutcomePolicy {
            rule: OutcomeRule::PriorityOnly,
            priority: vec![DetectorA, DetectorA, Forward, Reverse],
        };
        assert!(partial.validate().is_err());
    }
}
