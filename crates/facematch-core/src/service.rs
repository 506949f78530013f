//! Matching service: owns the live registry and its snapshot storage.
//!
//! The published registry is an immutable `Arc<EmbeddingStore>` behind a
//! read-write lock. Readers clone the `Arc` and scan without holding the lock.
//! Register and reload build a complete replacement off to the side and
//! publish it with a single pointer swap, under a writer mutex that also
//! serializes snapshot writes.

use crate::capture::CaptureError;
use crate::config::MatcherConfig;
use crate::similarity::{self, Comparison, SimilarityError};
use crate::storage::{SnapshotStorage, StorageError};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, IdentityRecord};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Name reported when no registered identity is close enough.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("registration was not persisted: {0}")]
    PersistenceFailure(#[source] StorageError),
    #[error("cannot read registry snapshot: {0}")]
    SnapshotUnreadable(#[source] StorageError),
}

/// Result of a one-to-many lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// The registry holds no identities; nothing was compared.
    NoIdentities,
    /// Identities exist but none is within the threshold.
    Unknown,
    /// Closest identity within the threshold.
    Match { name: String, distance: f32 },
}

impl Recognition {
    /// Matched name, or `"Unknown"` for both non-match outcomes.
    pub fn name(&self) -> &str {
        match self {
            Recognition::Match { name, .. } => name,
            _ => UNKNOWN_NAME,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            Recognition::Match { distance, .. } => Some(*distance),
            _ => None,
        }
    }
}

/// Outcome of a durable registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    /// An existing identity of the same name was overwritten.
    pub replaced: bool,
    /// Registry size after the registration.
    pub total: usize,
}

pub struct MatchingService {
    config: MatcherConfig,
    storage: Box<dyn SnapshotStorage>,
    registry: RwLock<Arc<EmbeddingStore>>,
    writer: Mutex<()>,
}

impl MatchingService {
    /// Create the service and load the last persisted snapshot.
    ///
    /// A missing snapshot yields an empty, usable registry. Any other read or
    /// parse failure is returned.
    pub fn initialize(
        config: MatcherConfig,
        storage: impl SnapshotStorage + 'static,
    ) -> Result<Self, ServiceError> {
        let storage: Box<dyn SnapshotStorage> = Box::new(storage);
        let store = load_registry(&config, storage.as_ref())?;
        tracing::info!(
            count = store.len(),
            threshold = config.threshold,
            dimension = config.dimension,
            snapshot = %storage.location(),
            "matching service initialized"
        );
        Ok(Self {
            config,
            storage,
            registry: RwLock::new(Arc::new(store)),
            writer: Mutex::new(()),
        })
    }

    /// The currently published registry.
    pub fn registry(&self) -> Arc<EmbeddingStore> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn threshold(&self) -> f32 {
        self.config.threshold
    }

    pub fn snapshot_location(&self) -> String {
        self.storage.location()
    }

    /// Find the closest registered identity within the threshold.
    ///
    /// Linear in registry size. Ties go to the first name in lexicographic order.
    pub fn recognize(&self, probe: &Embedding) -> Result<Recognition, ServiceError> {
        let registry = self.registry();
        if registry.is_empty() {
            return Ok(Recognition::NoIdentities);
        }

        let mut best: Option<(&IdentityRecord, f32)> = None;
        for record in registry.iter() {
            let cmp = similarity::is_match(probe, &record.embedding, self.config.threshold)?;
            if !cmp.matched {
                continue;
            }
            if best.map_or(true, |(_, d)| cmp.distance < d) {
                best = Some((record, cmp.distance));
            }
        }

        let result = match best {
            Some((record, distance)) => Recognition::Match {
                name: record.name.clone(),
                distance,
            },
            None => Recognition::Unknown,
        };
        tracing::debug!(name = result.name(), distance = ?result.distance(), "recognize");
        Ok(result)
    }

    /// One-to-one comparison; the registry is not consulted.
    pub fn verify(&self, a: &Embedding, b: &Embedding) -> Result<Comparison, ServiceError> {
        Ok(similarity::is_match(a, b, self.config.threshold)?)
    }

    /// Insert or overwrite `name` and persist the whole registry.
    ///
    /// The new registry is published only after the snapshot write succeeds;
    /// on [`ServiceError::PersistenceFailure`] the live registry is unchanged.
    pub fn register(
        &self,
        name: &str,
        embedding: Embedding,
        source: &str,
    ) -> Result<Registration, ServiceError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.registry()).clone();
        let replaced = next
            .put(IdentityRecord::new(name, embedding, source))?
            .is_some();

        let bytes = next.to_snapshot().to_vec_pretty()?;
        if let Err(e) = self.storage.write_snapshot(&bytes) {
            tracing::error!(name, error = %e, "failed to persist registration");
            return Err(ServiceError::PersistenceFailure(e));
        }

        let total = next.len();
        self.publish(next);
        tracing::info!(name, replaced, total, "identity registered");

        Ok(Registration {
            name: name.to_string(),
            replaced,
            total,
        })
    }

    /// Discard the live registry and rebuild it from the stored snapshot.
    ///
    /// Returns the new registry size. On failure the current registry stays
    /// published.
    pub fn reload(&self) -> Result<usize, ServiceError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let store = load_registry(&self.config, self.storage.as_ref())?;
        let count = store.len();
        self.publish(store);
        tracing::info!(count, "registry reloaded");
        Ok(count)
    }

    fn publish(&self, store: EmbeddingStore) {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(store);
    }
}

fn load_registry(
    config: &MatcherConfig,
    storage: &dyn SnapshotStorage,
) -> Result<EmbeddingStore, ServiceError> {
    match storage.read_snapshot() {
        Ok(bytes) => {
            let store = EmbeddingStore::from_slice(&bytes, config)?;
            tracing::info!(
                count = store.len(),
                names = ?store.names(),
                snapshot = %storage.location(),
                "loaded registry snapshot"
            );
            Ok(store)
        }
        Err(StorageError::NotFound(location)) => {
            tracing::warn!(
                snapshot = %location,
                "no registry snapshot found; starting with an empty registry"
            );
            Ok(EmbeddingStore::new(config))
        }
        Err(e) => Err(ServiceError::SnapshotUnreadable(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn service() -> MatchingService {
        MatchingService::initialize(MatcherConfig::with_dimension(3), MemoryStorage::new()).unwrap()
    }

    fn emb(values: [f32; 3]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    struct FailingStorage;

    impl SnapshotStorage for FailingStorage {
        fn read_snapshot(&self) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound("<failing>".into()))
        }

        fn write_snapshot(&self, _bytes: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Io {
                path: "<failing>".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn location(&self) -> String {
            "<failing>".into()
        }
    }

    #[test]
    fn test_recognize_empty_registry() {
        let svc = service();
        assert_eq!(svc.recognize(&emb([1.0, 0.0, 0.0])).unwrap(), Recognition::NoIdentities);
    }

    #[test]
    fn test_register_then_recognize_self() {
        let svc = service();
        let e = emb([0.3, -1.2, 2.0]);
        svc.register("alice", e.clone(), "register").unwrap();
        assert_eq!(
            svc.recognize(&e).unwrap(),
            Recognition::Match { name: "alice".into(), distance: 0.0 }
        );
    }

    #[test]
    fn test_recognize_unknown_is_distinct_from_empty() {
        let svc = service();
        svc.register("alice", emb([1.0, 0.0, 0.0]), "register").unwrap();
        let r = svc.recognize(&emb([-1.0, 0.0, 0.0])).unwrap();
        assert_eq!(r, Recognition::Unknown);
        assert_ne!(r, Recognition::NoIdentities);
        assert_eq!(r.name(), UNKNOWN_NAME);
        assert_eq!(r.distance(), None);
    }

    #[test]
    fn test_recognize_picks_minimum_distance() {
        let svc = service();
        svc.register("far", emb([0.8, 0.6, 0.0]), "register").unwrap();
        svc.register("near", emb([0.99, 0.141, 0.0]), "register").unwrap();
        let r = svc.recognize(&emb([1.0, 0.0, 0.0])).unwrap();
        assert_eq!(r.name(), "near");
    }

    #[test]
    fn test_recognize_tie_breaks_by_name() {
        let svc = service();
        svc.register("zed", emb([1.0, 0.0, 0.0]), "register").unwrap();
        svc.register("amy", emb([1.0, 0.0, 0.0]), "register").unwrap();
        assert_eq!(svc.recognize(&emb([1.0, 0.0, 0.0])).unwrap().name(), "amy");
    }

    #[test]
    fn test_recognize_dimension_mismatch() {
        let svc = service();
        svc.register("alice", emb([1.0, 0.0, 0.0]), "register").unwrap();
        let err = svc.recognize(&Embedding::new(vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Similarity(SimilarityError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_identical() {
        let svc = service();
        let c = svc.verify(&emb([0.6, 0.8, 0.0]), &emb([0.6, 0.8, 0.0])).unwrap();
        assert!(c.matched);
        assert_eq!(c.distance, 0.0);
    }

    #[test]
    fn test_verify_does_not_need_registry() {
        let svc = service();
        let c = svc.verify(&emb([1.0, 0.0, 0.0]), &emb([0.0, 1.0, 0.0])).unwrap();
        assert!(!c.matched);
        assert!((c.distance - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_register_overwrite_reports_replaced() {
        let svc = service();
        let first = svc.register("alice", emb([1.0, 0.0, 0.0]), "a.jpg").unwrap();
        assert!(!first.replaced);
        let second = svc.register("alice", emb([0.0, 1.0, 0.0]), "b.jpg").unwrap();
        assert!(second.replaced);
        assert_eq!(second.total, 1);
        assert_eq!(svc.registry().get("alice").unwrap().source, "b.jpg");
    }

    #[test]
    fn test_register_persistence_failure_leaves_registry_unchanged() {
        let svc =
            MatchingService::initialize(MatcherConfig::with_dimension(3), FailingStorage).unwrap();
        let err = svc.register("alice", emb([1.0, 0.0, 0.0]), "register").unwrap_err();
        assert!(matches!(err, ServiceError::PersistenceFailure(_)));
        assert!(svc.registry().is_empty());
    }

    #[test]
    fn test_register_rejects_wrong_dimension() {
        let svc = service();
        let err = svc.register("alice", Embedding::new(vec![1.0]), "register").unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_degenerate_registration_keeps_registry_usable() {
        let svc = service();
        let alice = emb([0.3, -1.2, 2.0]);
        svc.register("alice", alice.clone(), "register").unwrap();

        let err = svc.register("zero", emb([0.0, 0.0, 0.0]), "register").unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::ZeroNorm { .. })));
        let err = svc.register("huge", emb([3e38, 3e38, 3e38]), "register").unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::NonFinite { .. })));

        assert_eq!(svc.registry().names(), ["alice"]);
        assert_eq!(svc.recognize(&alice).unwrap().name(), "alice");
        assert_eq!(svc.reload().unwrap(), 1);
    }

    #[test]
    fn test_large_finite_embedding_is_comparable() {
        let svc = service();
        svc.register("big", emb([1e20, 0.0, 0.0]), "register").unwrap();
        assert_eq!(svc.recognize(&emb([1.0, 0.0, 0.0])).unwrap().name(), "big");
    }

    #[test]
    fn test_initialize_rejects_snapshot_with_zero_vector() {
        let storage = MemoryStorage::with_snapshot(
            br#"{"metadata": {}, "embeddings": {"zero": {"embedding": [0.0, 0.0, 0.0]}}}"#.to_vec(),
        );
        let err = MatchingService::initialize(MatcherConfig::with_dimension(3), storage)
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::Store(StoreError::CorruptRecord { .. })));
    }

    #[test]
    fn test_reload_discards_unpersisted_state() {
        let storage = MemoryStorage::new();
        let svc = MatchingService::initialize(MatcherConfig::with_dimension(3), storage).unwrap();
        svc.register("alice", emb([1.0, 0.0, 0.0]), "register").unwrap();
        assert_eq!(svc.reload().unwrap(), 1);
        assert_eq!(svc.registry().names(), ["alice"]);
    }

    #[test]
    fn test_initialize_fails_on_corrupt_snapshot() {
        let storage = MemoryStorage::with_snapshot(b"{\"embeddings\": {}}".to_vec());
        let err = MatchingService::initialize(MatcherConfig::with_dimension(3), storage)
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::Store(StoreError::InvalidSnapshotFormat(_))));
    }
}
