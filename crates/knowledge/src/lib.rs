//! Knowledge sources for cairn.
//!
//! Long-term preferences, past threads and reference documents are
//! collaborators the loop queries with keyword search during Gather.
//! This crate ships the in-memory implementation used by the CLI and tests.

pub mod in_memory;

pub use in_memory::InMemoryKnowledge;
