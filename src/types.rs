//src/types.rs

use std::fmt;

/// Label written wherever a source reported nothing for a protein.
pub const NO_HIT_LABEL: &str = "No_hit";

pub const NO_HIT: &str = "no_hit";
pub const UNKNOWN: &str = "unknown";
pub const TYPE_UNRESOLVED: &str = "type_unresolved";
pub const SUBTYPE_UNRESOLVED: &str = "subtype_unresolved";
pub const OUTCOME_UNRESOLVED: &str = "outcome_unresolved";

/// A canonical (type, subtype, outcome) defence-system call.
///
/// Three sentinel triples exist and must never be conflated:
///  - `no_hit`: no evidence at all
///  - `unknown`: evidence exists but is unclassified (or unmapped)
///  - `*_unresolved`: confirmed defence gene whose naming could not be decided
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalCall {
    pub system_type: String,
    pub subtype: String,
    pub outcome: String,
}

impl CanonicalCall {
    pub fn new(
        system_type: impl Into<String>,
        subtype: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            system_type: system_type.into(),
            subtype: subtype.into(),
            outcome: outcome.into(),
        }
    }

    pub fn no_hit() -> Self {
        Self::new(NO_HIT, NO_HIT, NO_HIT)
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN, UNKNOWN)
    }

    pub fn unresolved() -> Self {
        Self::new(TYPE_UNRESOLVED, SUBTYPE_UNRESOLVED, OUTCOME_UNRESOLVED)
    }

    #[inline]
    pub fn is_no_hit(&self) -> bool {
        self.system_type == NO_HIT
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        self.system_type == UNKNOWN
    }

    /// Present evidence that also carries a usable classification.
    #[inline]
    pub fn is_classified(&self) -> bool {
        !self.is_no_hit() && !self.is_unknown()
    }

    /// Agreement ignores the outcome column.
    #[inline]
    pub fn same_system(&self, other: &CanonicalCall) -> bool {
        self.system_type == other.system_type && self.subtype == other.subtype
    }

    /// Column label used in the defence matrix.
    pub fn column_label(&self) -> String {
        format!("{}:{}:{}", self.system_type, self.subtype, self.outcome)
    }
}

impl fmt::Display for CanonicalCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.system_type, self.subtype, self.outcome)
    }
}

/// The four evidence streams, in default outcome-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTool {
    DetectorA,
    DetectorB,
    Forward,
    Reverse,
}

impl SourceTool {
    pub const ALL: [SourceTool; 4] = [
        SourceTool::DetectorA,
        SourceTool::DetectorB,
        SourceTool::Forward,
        SourceTool::Reverse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTool::DetectorA => "detector_a",
            SourceTool::DetectorB => "detector_b",
            SourceTool::Forward => "forward",
            SourceTool::Reverse => "reverse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detector_a" | "a" | "padloc" => Some(SourceTool::DetectorA),
            "detector_b" | "b" | "defensefinder" => Some(SourceTool::DetectorB),
            "forward" | "fwd" => Some(SourceTool::Forward),
            "reverse" | "rev" => Some(SourceTool::Reverse),
            _ => None,
        }
    }
}

impl fmt::Display for SourceTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the reciprocal search a hit table comes from.
/// Forward: genome protein is the query. Reverse: reference protein is the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// One row of a tabular (outfmt 6 style, 15 column) alignment result.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentHit {
    pub query_id: String,
    pub subject_id: String,
    pub pident: f64,
    pub length: u32,
    pub mismatches: u32,
    pub gap_opens: u32,
    pub q_start: u32,
    pub q_end: u32,
    pub s_start: u32,
    pub s_end: u32,
    pub evalue: f64,
    pub bit_score: f64,
    pub query_coverage: f64,
    pub query_len: u32,
    pub subject_len: u32,
}

/// What one source said about a protein: the normalized label it reported
/// (`No_hit` when silent) and the canonical call that label resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCall {
    pub label: String,
    pub call: CanonicalCall,
}

impl SourceCall {
    pub fn absent() -> Self {
        Self {
            label: NO_HIT_LABEL.to_string(),
            call: CanonicalCall::no_hit(),
        }
    }
}

/// The four source calls for one protein.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceSet {
    pub detector_a: SourceCall,
    pub detector_b: SourceCall,
    pub forward: SourceCall,
    pub reverse: SourceCall,
}

impl EvidenceSet {
    pub fn empty() -> Self {
        Self {
            detector_a: SourceCall::absent(),
            detector_b: SourceCall::absent(),
            forward: SourceCall::absent(),
            reverse: SourceCall::absent(),
        }
    }

    pub fn get(&self, tool: SourceTool) -> &SourceCall {
        match tool {
            SourceTool::DetectorA => &self.detector_a,
            SourceTool::DetectorB => &self.detector_b,
            SourceTool::Forward => &self.forward,
            SourceTool::Reverse => &self.reverse,
        }
    }

    pub fn get_mut(&mut self, tool: SourceTool) -> &mut SourceCall {
        match tool {
            SourceTool::DetectorA => &mut self.detector_a,
            SourceTool::DetectorB => &mut self.detector_b,
            SourceTool::Forward => &mut self.forward,
            SourceTool::Reverse => &mut self.reverse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResolutionStatus {
    Concordant,
    BlastResolved,
    Conflict,
    Unresolved,
    NoEvidence,
}

impl ResolutionStatus {
    pub const ALL: [ResolutionStatus; 5] = [
        ResolutionStatus::Concordant,
        ResolutionStatus::BlastResolved,
        ResolutionStatus::Conflict,
        ResolutionStatus::Unresolved,
        ResolutionStatus::NoEvidence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Concordant => "CONCORDANT",
            ResolutionStatus::BlastResolved => "BLAST_RESOLVED",
            ResolutionStatus::Conflict => "CONFLICT",
            ResolutionStatus::Unresolved => "UNRESOLVED",
            ResolutionStatus::NoEvidence => "NO_EVIDENCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s.trim())
    }

    /// Statuses that need a curated resolution before the matrix can be built.
    #[inline]
    pub fn needs_curation(&self) -> bool {
        matches!(self, ResolutionStatus::Conflict | ResolutionStatus::Unresolved)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One consensus record per protein per genome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinResolution {
    pub genome_id: String,
    pub protein_id: String,
    pub evidence: EvidenceSet,
    pub status: ResolutionStatus,
    pub final_call: CanonicalCall,
    pub curated: bool,
    pub explanation: String,
}

impl ProteinResolution {
    pub fn pattern_key(&self) -> PatternKey {
        PatternKey {
            detector_a: self.evidence.detector_a.label.clone(),
            detector_b: self.evidence.detector_b.label.clone(),
            forward: self.evidence.forward.label.clone(),
            reverse: self.evidence.reverse.label.clone(),
        }
    }
}

/// The exact 4-tuple of source labels curation is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternKey {
    pub detector_a: String,
    pub detector_b: String,
    pub forward: String,
    pub reverse: String,
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "detector_a={} detector_b={} forward={} reverse={}",
            self.detector_a, self.detector_b, self.forward, self.reverse
        )
    }
}

/// A unique unresolved evidence pattern and how often it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidencePattern {
    pub key: PatternKey,
    pub count: usize,
    pub example_proteins: Vec<String>,
}

/// Row and skip counts for one parsed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows_read: usize,
    pub rows_skipped: usize,
}

impl ParseStats {
    pub fn merge(&mut self, other: ParseStats) {
        self.rows_read += other.rows_read;
        self.rows_skipped += other.rows_skipped;
    }
}

/// Protein counts per resolution status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    counts: [usize; 5],
}

impl StatusCounts {
    fn slot(status: ResolutionStatus) -> usize {
        match status {
            ResolutionStatus::Concordant => 0,
            ResolutionStatus::BlastResolved => 1,
            ResolutionStatus::Conflict => 2,
            ResolutionStatus::Unresolved => 3,
            ResolutionStatus::NoEvidence => 4,
        }
    }

    pub fn add(&mut self, status: ResolutionStatus) {
        self.counts[Self::slot(status)] += 1;
    }

    pub fn get(&self, status: ResolutionStatus) -> usize {
        self.counts[Self::slot(status)]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn merge(&mut self, other: StatusCounts) {
        for (ours, theirs) in self.counts.iter_mut().zip(other.counts) {
            *ours += theirs;
        }
    }

    pub fn from_resolutions<'a, I>(resolutions: I) -> Self
    where
        I: IntoIterator<Item = &'a ProteinResolution>,
    {
        let mut counts = Self::default();
        for r in resolutions {
            counts.add(r.status);
        }
        counts
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = ResolutionStatus::ALL
            .iter()
            .map(|st| format!("{}={}", st, self.get(*st)))
            .collect();
        f.write_str(&parts.join(" "))
    }
}
