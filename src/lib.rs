//! framegrab
//!
//! Operator-driven still capture: one session drives a single frame source
//! (an industrial still camera, or an RTSP live feed), and each capture
//! command encodes the freshest frame to lossless WebP, saves it locally,
//! and optionally uploads it as multipart form data.
//!
//! # Module structure
//!
//! - `source`: the `FrameSource` contract and both backends; `source::live`
//!   holds the RTSP engine with its freshness task and reconnection policy
//! - `frame`: decoded raster container and channel-order conversion
//! - `pipeline`: encode / persist / upload capture cycle
//! - `upload`: blocking multipart HTTP client
//! - `session`: the interactive command loop
//! - `config`: file + environment configuration surface

pub mod config;
pub mod frame;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod upload;

pub use config::{CaptureConfig, SourceKind, StillSettings, UploadSettings};
pub use frame::Frame;
pub use pipeline::{CycleError, CycleReport, Pipeline, UploadStatus};
pub use source::{
    AcquireError, ConnectError, EngineState, FrameSource, LiveFeedEngine, StillCameraSource,
};
pub use upload::{UploadError, UploadReceipt, Uploader};
