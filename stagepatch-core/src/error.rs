use std::path::PathBuf;

use stagepatch_types::{EngineHandle, LayerId, PatchId};

/// Result type for sound engine operations.
pub type BackendResult<T = ()> = Result<T, BackendError>;

/// Result type for routing surface operations.
pub type RoutingResult<T = ()> = Result<T, RoutingError>;

/// Result type for patch engine operations.
pub type EngineResult<T = ()> = Result<T, EngineError>;

/// Error from a sound engine backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The backend is still settling; the same request will succeed later.
    #[error("engine not ready yet")]
    NotReady,
    #[error("no instrument with engine handle {0}")]
    UnknownHandle(EngineHandle),
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("unsupported instrument: {0}")]
    Unsupported(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError::Other(s)
    }
}

/// Error from the realtime routing surface.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("routing: {0}")]
pub struct RoutingError(pub String);

/// Error from a patch engine operation.
///
/// Per-layer materialization failures are not reported here; they are
/// recorded on the layer and in the [`LoadReport`](crate::engine::LoadReport).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("no patch is loaded")]
    NoCurrentPatch,
    #[error("patch {0} does not exist")]
    UnknownPatch(PatchId),
    #[error("layer {layer} is not in patch {patch}")]
    UnknownLayer { patch: PatchId, layer: LayerId },
    #[error("layer index {index} out of range ({len} layers)")]
    LayerIndexOutOfRange { index: usize, len: usize },
    #[error("project has no buses")]
    NoBuses,
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
