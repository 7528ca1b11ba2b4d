//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{PatternKey, SourceTool};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A required evidence file is absent.
    #[error("{what} file not found: {}", path.display())]
    InputNotFound { what: &'static str, path: PathBuf },

    /// A label with no master-key entry. Callers downgrade this to the
    /// `unknown` call; it never aborts a run.
    #[error("no master key mapping for {tool} label '{label}'")]
    MappingNotFound { tool: SourceTool, label: String },

    #[error("uncurated pattern ({pattern}); {missing} distinct pattern(s) lack a curated resolution")]
    UncuratedPattern { pattern: PatternKey, missing: usize },

    #[error("{count} profile file(s) could not be read, first: {}", first.display())]
    UnreadableProfiles { count: usize, first: PathBuf },

    #[error("malformed row at {}:{line}: {reason}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("required column '{column}' missing in {}", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("protein id '{id}' already carries a genome prefix other than '{expected}'")]
    ConflictingGenomePrefix { id: String, expected: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
