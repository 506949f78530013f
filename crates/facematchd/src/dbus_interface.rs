use crate::engine::{EngineError, EngineHandle};
use facematch_core::service::UNKNOWN_NAME;
use facematch_core::similarity::{self, similarity_percent};
use facematch_core::{
    CaptureError, Comparison, MatchingService, Recognition, Registration, ServiceError, StoreError,
};
use std::sync::Arc;
use thiserror::Error;
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "io.facematch.FaceMatch1";
pub const OBJECT_PATH: &str = "/io/facematch/FaceMatch1";

/// Source recorded for identities registered without one.
const DEFAULT_SOURCE: &str = "register";

/// Why a request was refused, before it is flattened into a D-Bus error.
#[derive(Error, Debug)]
enum RequestError {
    #[error("image is empty")]
    EmptyImage,
    #[error("image is {size} bytes, limit is {limit}")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("identity name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<RequestError> for fdo::Error {
    fn from(e: RequestError) -> Self {
        let msg = e.to_string();
        match e {
            RequestError::EmptyImage | RequestError::ImageTooLarge { .. } | RequestError::EmptyName => {
                fdo::Error::InvalidArgs(msg)
            }
            RequestError::Engine(EngineError::Capture(c))
            | RequestError::Service(ServiceError::Capture(c)) => capture_error(c, msg),
            RequestError::Engine(EngineError::Timeout(_)) => fdo::Error::TimedOut(msg),
            RequestError::Engine(EngineError::ChannelClosed) | RequestError::Join(_) => {
                fdo::Error::Failed(msg)
            }
            RequestError::Service(ServiceError::Similarity(_))
            | RequestError::Service(ServiceError::Store(
                StoreError::InvalidName
                | StoreError::DimensionMismatch { .. }
                | StoreError::NonFinite { .. }
                | StoreError::ZeroNorm { .. },
            )) => fdo::Error::InvalidArgs(msg),
            RequestError::Service(_) => fdo::Error::Failed(msg),
        }
    }
}

fn capture_error(e: CaptureError, msg: String) -> fdo::Error {
    match e {
        CaptureError::NoFaceDetected | CaptureError::InvalidImage(_) => fdo::Error::InvalidArgs(msg),
        CaptureError::ModelNotFound(_) | CaptureError::InferenceFailed(_) => fdo::Error::Failed(msg),
    }
}

/// D-Bus interface for the FaceMatch daemon.
///
/// Bus name: io.facematch.FaceMatch1
/// Object path: /io/facematch/FaceMatch1
pub struct FaceMatchService {
    engine: EngineHandle,
    matcher: Arc<MatchingService>,
    max_image_bytes: usize,
}

impl FaceMatchService {
    pub fn new(engine: EngineHandle, matcher: Arc<MatchingService>, max_image_bytes: usize) -> Self {
        Self {
            engine,
            matcher,
            max_image_bytes,
        }
    }

    async fn capture(&self, image: Vec<u8>) -> Result<facematch_core::Embedding, RequestError> {
        if image.is_empty() {
            return Err(RequestError::EmptyImage);
        }
        if image.len() > self.max_image_bytes {
            return Err(RequestError::ImageTooLarge {
                size: image.len(),
                limit: self.max_image_bytes,
            });
        }
        Ok(self.engine.embed(image).await?)
    }

    async fn recognize_image(&self, image: Vec<u8>) -> Result<Recognition, RequestError> {
        let probe = self.capture(image).await?;
        Ok(self.matcher.recognize(&probe)?)
    }

    async fn verify_images(&self, first: Vec<u8>, second: Vec<u8>) -> Result<Comparison, RequestError> {
        let a = self.capture(first).await?;
        let b = self.capture(second).await?;
        Ok(self.matcher.verify(&a, &b)?)
    }

    async fn register_image(
        &self,
        name: String,
        image: Vec<u8>,
        source: String,
    ) -> Result<Registration, RequestError> {
        if name.is_empty() {
            return Err(RequestError::EmptyName);
        }
        let raw = self.capture(image).await?;
        let embedding = similarity::normalize(&raw).map_err(ServiceError::from)?;

        // Register blocks on the writer lock and the snapshot write.
        let matcher = Arc::clone(&self.matcher);
        let registration =
            tokio::task::spawn_blocking(move || matcher.register(&name, embedding, &source)).await??;
        Ok(registration)
    }

    async fn reload_registry(&self) -> Result<usize, RequestError> {
        let matcher = Arc::clone(&self.matcher);
        Ok(tokio::task::spawn_blocking(move || matcher.reload()).await??)
    }
}

#[interface(name = "io.facematch.FaceMatch1")]
impl FaceMatchService {
    /// Identify the face in an encoded image against the registry.
    async fn recognize(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let result = self.recognize_image(image).await.map_err(log_failure)?;
        Ok(recognition_json(&result, self.matcher.threshold()).to_string())
    }

    /// Decide whether two encoded images show the same person.
    async fn verify(&self, first: Vec<u8>, second: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(first = first.len(), second = second.len(), "verify requested");
        let cmp = self.verify_images(first, second).await.map_err(log_failure)?;
        Ok(comparison_json(&cmp, self.matcher.threshold()).to_string())
    }

    /// Register the face in `image` under `name` and persist the registry.
    async fn register(&self, name: &str, image: Vec<u8>, source: &str) -> fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "register requested");
        let source = if source.is_empty() { DEFAULT_SOURCE } else { source };
        let registration = self
            .register_image(name.to_string(), image, source.to_string())
            .await
            .map_err(log_failure)?;
        Ok(registration_json(&registration).to_string())
    }

    /// Rebuild the registry from the snapshot on disk. Returns the new size.
    async fn reload(&self) -> fdo::Result<u32> {
        tracing::info!("reload requested");
        let count = self.reload_registry().await.map_err(log_failure)?;
        Ok(count as u32)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let registry = self.matcher.registry();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "status": "healthy",
            "database_size": registry.len(),
            "threshold": self.matcher.threshold(),
            "dimension": registry.dimension(),
            "model": self.matcher.config().model,
            "snapshot": self.matcher.snapshot_location(),
            "registered_faces": registry.names(),
        })
        .to_string())
    }

    /// Names currently in the registry, in lexicographic order.
    async fn list_identities(&self) -> fdo::Result<Vec<String>> {
        Ok(self.matcher.registry().names())
    }
}

fn log_failure(e: RequestError) -> fdo::Error {
    match &e {
        RequestError::Service(ServiceError::PersistenceFailure(_) | ServiceError::SnapshotUnreadable(_))
        | RequestError::Engine(EngineError::ChannelClosed)
        | RequestError::Join(_) => tracing::error!(error = %e, "request failed"),
        _ => tracing::info!(error = %e, "request rejected"),
    }
    e.into()
}

fn recognition_json(result: &Recognition, threshold: f32) -> serde_json::Value {
    match result {
        Recognition::NoIdentities => serde_json::json!({
            "status": "no_identities",
            "name": UNKNOWN_NAME,
            "message": "no identities registered",
        }),
        Recognition::Unknown => serde_json::json!({
            "status": "unknown",
            "name": UNKNOWN_NAME,
            "threshold": threshold,
        }),
        Recognition::Match { name, distance } => serde_json::json!({
            "status": "match",
            "name": name,
            "distance": distance,
            "similarity": similarity_percent(*distance, threshold),
            "threshold": threshold,
        }),
    }
}

fn comparison_json(cmp: &Comparison, threshold: f32) -> serde_json::Value {
    serde_json::json!({
        "match": cmp.matched,
        "distance": cmp.distance,
        "similarity": similarity_percent(cmp.distance, threshold),
        "threshold": threshold,
    })
}

fn registration_json(r: &Registration) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "name": r.name,
        "replaced": r.replaced,
        "total_ids": r.total,
    })
}
