//! Storage layer abstraction.
//!
//! Two layers:
//! - **Contract**: the [`VectorStore`] trait every engine adapter satisfies
//! - **Adapters**: in-process index, Qdrant, Elasticsearch, content-addressed
//!
//! The in-process and content-addressed adapters share the append-only
//! [`ann`] indices.

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - lock guards span short critical sections.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod ann;
pub mod traits;
pub mod vector;

pub use traits::{RecordPage, VectorStore};
