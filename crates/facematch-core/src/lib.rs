//! facematch-core: face identity registry and matching engine.
//!
//! Holds named reference embeddings, compares probe embeddings against them
//! by L2 distance between unit vectors, and persists the registry as a JSON
//! snapshot. Face detection and embedding are consumed through the
//! [`CapturePipeline`] trait; this crate never touches images or models.

pub mod capture;
pub mod config;
pub mod import;
pub mod service;
pub mod similarity;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod types;

pub use capture::{CaptureError, CapturePipeline, FacePatch};
pub use config::MatcherConfig;
pub use service::{MatchingService, Recognition, Registration, ServiceError};
pub use similarity::{Comparison, SimilarityError};
pub use snapshot::Snapshot;
pub use storage::{FileStorage, MemoryStorage, SnapshotStorage, StorageError};
pub use store::{EmbeddingStore, StoreError};
pub use types::{Embedding, IdentityRecord};
