//! Vector backend implementations.
//!
//! | Backend | Engine | Persistence |
//! |---------|--------|-------------|
//! | [`LocalVectorStore`] | in-process [`crate::storage::ann`] index | optional directory |
//! | [`QdrantVectorStore`] | Qdrant REST | server |
//! | [`ElasticsearchVectorStore`] | Elasticsearch `dense_vector` | cluster |
//! | [`IpfsVectorStore`] | flat index + content-addressed blocks | router |

mod common;
pub mod elasticsearch;
pub mod ipfs;
mod local;
pub mod qdrant;

pub use elasticsearch::ElasticsearchVectorStore;
pub use ipfs::{FsBlockRouter, IpfsVectorStore, MemoryRouter, NullRouter, Router};
pub use local::LocalVectorStore;
pub use qdrant::QdrantVectorStore;
