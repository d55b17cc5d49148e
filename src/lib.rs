//! Strata: typed construct trees for infrastructure definition.
//!
//! Compose stages, stacks and resources into a scoped tree. Synthesize it
//! deterministically into CloudFormation-shaped templates. BLAKE3 template
//! hashes. Provenance event log.

pub mod cli;
pub mod constructs;
pub mod core;
pub mod provenance;
