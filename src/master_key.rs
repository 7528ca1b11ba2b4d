//src/master_key.rs

use std::io::BufRead;
use std::path::Path;

use ahash::AHashMap;

use crate::error::{ReconcileError, Result};
use crate::input::{column_index, delimited_reader, open_input};
use crate::types::{CanonicalCall, ParseStats, SourceTool, NO_HIT_LABEL};

/// Master-key namespaces. Forward and reverse hits both carry reference
/// labels, so they share one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTool {
    DetectorA,
    DetectorB,
    Reference,
}

impl KeyTool {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detector_a" | "padloc" => Some(KeyTool::DetectorA),
            "detector_b" | "defensefinder" => Some(KeyTool::DetectorB),
            "reference" | "blast" | "forward" | "reverse" => Some(KeyTool::Reference),
            _ => None,
        }
    }
}

impl From<SourceTool> for KeyTool {
    fn from(tool: SourceTool) -> Self {
        match tool {
            SourceTool::DetectorA => KeyTool::DetectorA,
            SourceTool::DetectorB => KeyTool::DetectorB,
            SourceTool::Forward | SourceTool::Reverse => KeyTool::Reference,
        }
    }
}

// Column names of the wide spreadsheet layout.
const WIDE_DETECTOR_A: &str = "PADLOC_systems";
const WIDE_DETECTOR_B: &str = "DefenseFinder_subtypes";
const WIDE_SUBTYPE: &str = "Novel_subtypes";
const WIDE_TYPE: &str = "Novel_types";
const WIDE_OUTCOME: &str = "Defense_outcome";

/// Static (tool, label) -> canonical call lookup. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct MasterKeyResolver {
    entries: AHashMap<(KeyTool, String), CanonicalCall>,
}

fn is_blank_cell(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s == "/"
}

impl MasterKeyResolver {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (KeyTool, String, CanonicalCall)>,
    {
        let mut resolver = Self::default();
        for (tool, label, call) in entries {
            resolver.insert(tool, label, call);
        }
        resolver
    }

    fn insert(&mut self, tool: KeyTool, label: String, call: CanonicalCall) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.entry((tool, label)) {
            Entry::Vacant(v) => {
                v.insert(call);
                true
            }
            Entry::Occupied(o) => {
                if o.get() != &call {
                    log::warn!(
                        "master key: conflicting entry for {:?} '{}' ({} vs {}), keeping the first",
                        o.key().0,
                        o.key().1,
                        o.get(),
                        call
                    );
                }
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads the master key TSV. Both the long layout
    /// `tool  label  type  subtype  outcome` and the wide spreadsheet
    /// layout (`PADLOC_systems`, `DefenseFinder_subtypes`, `Novel_subtypes`,
    /// `Novel_types`, `Defense_outcome`) are accepted.
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = open_input(path, "Master key")?;
        let (resolver, stats) = Self::from_reader(reader, path)?;
        log::info!(
            "Loaded master key {}: {} mappings ({} rows, {} skipped)",
            path.display(),
            resolver.len(),
            stats.rows_read,
            stats.rows_skipped
        );
        Ok(resolver)
    }

    pub fn from_reader<R: BufRead + 'static>(reader: R, source: &Path) -> Result<(Self, ParseStats)> {
        let mut rdr = delimited_reader(Box::new(reader), b'\t');
        let headers = rdr.headers()?.clone();
        let mut resolver = Self::default();
        let mut stats = ParseStats::default();

        if headers.iter().any(|h| h == WIDE_SUBTYPE) {
            let a_idx = column_index(&headers, WIDE_DETECTOR_A, source)?;
            let b_idx = column_index(&headers, WIDE_DETECTOR_B, source)?;
            let sub_idx = column_index(&headers, WIDE_SUBTYPE, source)?;
            let type_idx = column_index(&headers, WIDE_TYPE, source)?;
            let out_idx = column_index(&headers, WIDE_OUTCOME, source)?;

            for record in rdr.records() {
                let record = record?;
                stats.rows_read += 1;
                let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

                let subtype = cell(sub_idx);
                if is_blank_cell(subtype) {
                    stats.rows_skipped += 1;
                    continue;
                }
                let system_type = if is_blank_cell(cell(type_idx)) { "unknown" } else { cell(type_idx) };
                let outcome = if is_blank_cell(cell(out_idx)) { "unknown" } else { cell(out_idx) };
                let call = CanonicalCall::new(system_type, subtype, outcome);

                resolver.insert(KeyTool::Reference, subtype.to_string(), call.clone());
                if !is_blank_cell(cell(a_idx)) {
                    resolver.insert(KeyTool::DetectorA, cell(a_idx).to_string(), call.clone());
                }
                if !is_blank_cell(cell(b_idx)) {
                    resolver.insert(KeyTool::DetectorB, cell(b_idx).to_string(), call);
                }
            }
        } else {
            for (idx, record) in rdr.records().enumerate() {
                let record = record?;
                stats.rows_read += 1;
                let fields: Vec<&str> = record.iter().map(str::trim).collect();

                if fields.len() < 5 || fields[..5].iter().any(|f| f.is_empty()) {
                    stats.rows_skipped += 1;
                    log::warn!(
                        "master key {}:{}: expected 5 non-empty columns, skipping",
                        source.display(),
                        idx + 2
                    );
                    continue;
                }
                let Some(tool) = KeyTool::parse(fields[0]) else {
                    stats.rows_skipped += 1;
                    log::warn!(
                        "master key {}:{}: unknown tool '{}', skipping",
                        source.display(),
                        idx + 2,
                        fields[0]
                    );
                    continue;
                };
                resolver.insert(
                    tool,
                    fields[1].to_string(),
                    CanonicalCall::new(fields[2], fields[3], fields[4]),
                );
            }
        }

        Ok((resolver, stats))
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, tool: SourceTool, label: &str) -> Result<&CanonicalCall> {
        self.entries
            .get(&(KeyTool::from(tool), label.to_string()))
            .ok_or_else(|| ReconcileError::MappingNotFound {
                tool,
                label: label.to_string(),
            })
    }

    /// Resolves a label to its canonical call. Absent evidence is `no_hit`;
    /// an unmapped label is `unknown`.
    pub fn resolve(&self, tool: SourceTool, label: &str) -> CanonicalCall {
        if label.is_empty() || label == NO_HIT_LABEL {
            return CanonicalCall::no_hit();
        }
        match self.lookup(tool, label) {
            Ok(call) => call.clone(),
            Err(e) => {
                log::debug!("{e}; using unknown");
                CanonicalCall::unknown()
            }
        }
    }
}
