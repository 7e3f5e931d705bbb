//! Storage backend traits.

mod vector;

pub use vector::{RecordPage, VectorStore, elapsed_ms};
