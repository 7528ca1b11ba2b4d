// src/consensus/engine.rs

use super::policy::OutcomePolicy;
use crate::types::{
    CanonicalCall, EvidenceSet, ProteinResolution, ResolutionStatus, SourceTool,
};

/// Merges the four evidence calls of one protein into a consensus record.
///
/// A call is *present* when it is not `no_hit`, and *classified* when it is
/// also not `unknown`. Rules, first match wins:
///  1. nothing present                                   -> NO_EVIDENCE
///  2. every present call classified, same type/subtype  -> CONCORDANT
///  3. forward and reverse classified and agreeing       -> BLAST_RESOLVED
///  4. detectors classified but disagreeing, alignment
///     evidence not split between two answers            -> CONFLICT
///  5. anything else                                     -> UNRESOLVED
///
/// Stateless apart from the outcome policy, so one engine serves a whole run.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    policy: OutcomePolicy,
}

impl ConsensusEngine {
    pub fn new(policy: OutcomePolicy) -> Self {
        Self { policy }
    }

    pub fn resolve(
        &self,
        genome_id: &str,
        protein_id: &str,
        evidence: EvidenceSet,
    ) -> ProteinResolution {
        let (status, final_call, explanation) = self.decide(&evidence);
        log::debug!("{protein_id}: {status} -> {final_call} ({explanation})");

        ProteinResolution {
            genome_id: genome_id.to_string(),
            protein_id: protein_id.to_string(),
            evidence,
            status,
            final_call,
            curated: false,
            explanation,
        }
    }

    fn decide(&self, evidence: &EvidenceSet) -> (ResolutionStatus, CanonicalCall, String) {
        let present: Vec<(SourceTool, &CanonicalCall)> = SourceTool::ALL
            .iter()
            .map(|&tool| (tool, &evidence.get(tool).call))
            .filter(|(_, call)| !call.is_no_hit())
            .collect();

        // 1
        if present.is_empty() {
            return (
                ResolutionStatus::NoEvidence,
                CanonicalCall::no_hit(),
                "no source reported this protein".to_string(),
            );
        }

        // 2
        let anchor = present[0].1;
        if present
            .iter()
            .all(|(_, call)| call.is_classified() && call.same_system(anchor))
        {
            let votes: Vec<(SourceTool, &str)> = present
                .iter()
                .map(|(tool, call)| (*tool, call.outcome.as_str()))
                .collect();
            let outcome = self
                .policy
                .choose(&votes)
                .unwrap_or(anchor.outcome.as_str());
            let sources: Vec<&str> = present.iter().map(|(tool, _)| tool.as_str()).collect();
            return (
                ResolutionStatus::Concordant,
                CanonicalCall::new(&anchor.system_type, &anchor.subtype, outcome),
                format!("{} agree on {}", sources.join("+"), anchor.subtype),
            );
        }

        let a = &evidence.detector_a.call;
        let b = &evidence.detector_b.call;
        let fwd = &evidence.forward.call;
        let rev = &evidence.reverse.call;

        // 3
        if fwd.is_classified() && rev.is_classified() && fwd.same_system(rev) {
            return (
                ResolutionStatus::BlastResolved,
                fwd.clone(),
                format!(
                    "reciprocal hits agree on {} (detector_a={}, detector_b={})",
                    fwd.subtype, evidence.detector_a.label, evidence.detector_b.label
                ),
            );
        }

        // 4
        let detectors_clash = a.is_classified() && b.is_classified() && !a.same_system(b);
        let alignment_split = !fwd.is_no_hit() && !rev.is_no_hit();
        if detectors_clash && !alignment_split {
            return (
                ResolutionStatus::Conflict,
                CanonicalCall::unresolved(),
                format!(
                    "detectors disagree ({} vs {}) without reciprocal confirmation",
                    a.subtype, b.subtype
                ),
            );
        }

        // 5
        let reason = if present.iter().any(|(_, call)| call.is_unknown()) {
            "unmapped or unclassified evidence"
        } else if alignment_split {
            "forward and reverse hits disagree"
        } else {
            "partial evidence without agreement"
        };
        (
            ResolutionStatus::Unresolved,
            CanonicalCall::unresolved(),
            reason.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceCall, NO_HIT_LABEL};

    fn src(label: &str, call: CanonicalCall) -> SourceCall {
        SourceCall {
            label: label.to_string(),
            call,
        }
    }

    fn cbass(subtype: &str) -> CanonicalCall {
        CanonicalCall::new("CBASS", subtype, "Abi")
    }

    fn evidence(a: SourceCall, b: SourceCall, f: SourceCall, r: SourceCall) -> EvidenceSet {
        EvidenceSet {
            detector_a: a,
            detector_b: b,
            forward: f,
            reverse: r,
        }
    }

    fn none() -> SourceCall {
        SourceCall::absent()
    }

    #[test]
    fn cbass_scenario_is_blast_resolved() {
        let engine = ConsensusEngine::default();
        let ev = evidence(
            src("CBASS_other", cbass("CBASS_other")),
            src("CBASS_IIs", cbass("CBASS_IIs")),
            src("CBASS_II", cbass("CBASS_II")),
            src("CBASS_II", cbass("CBASS_II")),
        );
        let res = engine.resolve("g1", "g1@p1", ev);
        assert_eq!(res.status, ResolutionStatus::BlastResolved);
        assert_eq!(res.final_call.system_type, "CBASS");
        assert_eq!(res.final_call.subtype, "CBASS_II");
    }

    #[test]
    fn all_no_hit_is_no_evidence() {
        let engine = ConsensusEngine::default();
        let res = engine.resolve("g1", "g1@p1", EvidenceSet::empty());
        assert_eq!(res.status, ResolutionStatus::NoEvidence);
        assert!(res.final_call.is_no_hit());
        assert_eq!(res.evidence.detector_a.label, NO_HIT_LABEL);
    }

    #[test]
    fn detectors_and_alignments_all_disagree_is_unresolved() {
        let engine = ConsensusEngine::default();
        let ev = evidence(
            src("Dynamins", CanonicalCall::new("Dynamins", "Dynamins", "Direct")),
            src("Eleos", CanonicalCall::new("Eleos", "Eleos", "Direct")),
            src("Gabija", CanonicalCall::new("Gabija", "Gabija", "Direct")),
            src("Zorya", CanonicalCall::new("Zorya", "Zorya_I", "Direct")),
        );
        let res = engine.resolve("g1", "g1@p1", ev);
        assert_eq!(res.status, ResolutionStatus::Unresolved);
        assert_eq!(res.final_call, CanonicalCall::unresolved());
    }

    #[test]
    fn detector_clash_without_alignment_is_conflict() {
        let engine = ConsensusEngine::default();
        let ev = evidence(
            src("Dynamins", CanonicalCall::new("Dynamins", "Dynamins", "Direct")),
            src("Eleos", CanonicalCall::new("Eleos", "Eleos", "Direct")),
            none(),
            none(),
        );
        let res = engine.resolve("g1", "g1@p1", ev);
        assert_eq!(res.status, ResolutionStatus::Conflict);
        assert_eq!(res.final_call, CanonicalCall::unresolved());

        // one-sided alignment support is still a conflict
        let ev = evidence(
            src("Dynamins", CanonicalCall::new("Dynamins", "Dynamins", "Direct")),
            src("Eleos", CanonicalCall::new("Eleos", "Eleos", "Direct")),
            src("Eleos", CanonicalCall::new("Eleos", "Eleos", "Direct")),
            none(),
        );
        assert_eq!(engine.resolve("g1", "g1@p2", ev).status, ResolutionStatus::Conflict);
    }

    #[test]
    fn single_source_is_concordant() {
        let engine = ConsensusEngine::default();
        let ev = evidence(src("CBASS_II", cbass("CBASS_II")), none(), none(), none());
        let res = engine.resolve("g1", "g1@p1", ev);
        assert_eq!(res.status, ResolutionStatus::Concordant);
        assert_eq!(res.final_call, cbass("CBASS_II"));
    }

    #[test]
    fn concordant_outcome_follows_policy() {
        let engine = ConsensusEngine::default();
        let ev = evidence(
            src("x", CanonicalCall::new("Gabija", "Gabija", "Abi")),
            src("y", CanonicalCall::new("Gabija", "Gabija", "Direct")),
            src("z", CanonicalCall::new("Gabija", "Gabija", "Direct")),
            none(),
        );
        let res = engine.resolve("g1", "g1@p1", ev.clone());
        assert_eq!(res.status, ResolutionStatus::Concordant);
        assert_eq!(res.final_call.outcome, "Direct");

        let priority_only = ConsensusEngine::new(OutcomePolicy {
            rule: crate::consensus::policy::OutcomeRule::PriorityOnly,
            ..OutcomePolicy::default()
        });
        assert_eq!(priority_only.resolve("g1", "g1@p1", ev).final_call.outcome, "Abi");
    }

    #[test]
    fn unknown_calls_never_agree() {
        let engine = ConsensusEngine::default();
        let ev = evidence(
            src("Novel_1", CanonicalCall::unknown()),
            src("Novel_2", CanonicalCall::unknown()),
            none(),
            none(),
        );
        let res = engine.resolve("g1", "g1@p1", ev);
        assert_eq!(res.status, ResolutionStatus::Unresolved);

        // reciprocal hits still settle it
        let ev = evidence(
            src("Novel_1", CanonicalCall::unknown()),
            none(),
            src("CBASS_II", cbass("CBASS_II")),
            src("CBASS_II", cbass("CBASS_II")),
        );
        assert_eq!(engine.resolve("g1", "g1@p2", ev).status, ResolutionStatus::BlastResolved);
    }
}
