//! Core construct logic: tree, tokens, parsing, composition, ordering, synthesis.

pub mod assembly;
pub mod builder;
pub mod construct;
pub mod parser;
pub mod resolver;
pub mod synth;
pub mod tree;
pub mod types;
