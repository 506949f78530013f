use facematch_core::{CaptureError, CapturePipeline, Embedding};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("face capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Embed {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Embedding, CaptureError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Detect the face in `image` and embed it.
    ///
    /// Bounded by the configured timeout. A request that times out still runs
    /// to completion on the engine thread; its result is discarded.
    pub async fn embed(&self, image: Vec<u8>) -> Result<Embedding, EngineError> {
        let request = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(EngineRequest::Embed {
                    image,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            let embedding = reply_rx.await.map_err(|_| EngineError::ChannelClosed)??;
            Ok(embedding)
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Run `pipeline` on a dedicated OS thread.
///
/// Model inference is slow and the pipeline is not shareable, so every
/// capture request is queued to this one thread.
pub fn spawn_engine<P>(mut pipeline: P, timeout: Duration) -> EngineHandle
where
    P: CapturePipeline + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let result = pipeline.embedding_for(&image);
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, bytes = image.len(), "capture failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx, timeout }
}
