//! Frame acquisition backends.
//!
//! This module provides the two interchangeable sources a capture session can
//! drive:
//! - `LiveFeedEngine`: RTSP network stream with a background freshness task
//! - `StillCameraSource`: single-shot industrial still camera
//!
//! Both implement the [`FrameSource`] contract; backend selection is a
//! configuration-time choice producing one boxed implementation.

mod live;
mod still;
mod stream;

pub use live::{EngineState, LiveFeedEngine};
pub use still::StillCameraSource;

use thiserror::Error;

use crate::config::{CaptureConfig, SourceKind};
use crate::frame::Frame;

/// The stream or device could not be opened. Fatal for the current attempt;
/// the caller may retry by calling `connect()` again.
#[derive(Debug, Error)]
#[error("failed to open {endpoint}")]
pub struct ConnectError {
    pub endpoint: String,
    #[source]
    pub source: anyhow::Error,
}

/// No usable frame could be obtained. Reported to the operator; the session
/// continues and another capture command may be issued.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The source has not been connected, or was disconnected.
    #[error("source is not connected; call connect() first")]
    NotConnected,
    /// The live feed could not be reopened; terminal until `connect()` is
    /// called again.
    #[error("live feed failed and could not be reopened")]
    Failed,
    /// Warm-up, flush, direct reads, and one reconnect cycle all came up
    /// empty.
    #[error("no usable frame after flush, direct reads, and one reconnect cycle")]
    Exhausted,
    /// The underlying device rejected the acquisition request.
    #[error("device error: {0}")]
    Device(String),
}

/// Capability contract every acquisition backend implements.
///
/// `acquire_frame` is bounded internally (it never blocks indefinitely) and is
/// driven from a single controlling context; it is not meant to be called
/// concurrently by multiple callers. `Ok(None)` means "no frame available
/// right now" and the caller may simply try again.
pub trait FrameSource {
    /// Establish the underlying device or stream. Idempotent when already
    /// connected.
    fn connect(&mut self) -> Result<(), ConnectError>;

    /// Return the freshest available frame, `Ok(None)` when the capture came
    /// up empty, or a fatal error once the internal retry budget is spent.
    fn acquire_frame(&mut self) -> Result<Option<Frame>, AcquireError>;

    /// Release all underlying resources. Safe to call repeatedly and from any
    /// state.
    fn disconnect(&mut self);
}

/// Build the configured backend.
pub fn from_config(cfg: &CaptureConfig) -> Box<dyn FrameSource> {
    match cfg.source {
        SourceKind::Live => Box::new(LiveFeedEngine::new(&cfg.stream_url)),
        SourceKind::Still => Box::new(StillCameraSource::new(cfg.still.clone())),
    }
}
