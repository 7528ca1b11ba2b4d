pub mod engine;
pub mod policy;
pub mod profile;

pub use engine::ConsensusEngine;
pub use policy::{OutcomePolicy, OutcomeRule};
pub use profile::{GenomeEvidencePaths, GenomeProfile, ProfileBuilder};
