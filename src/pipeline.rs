//! Capture cycle: encode, persist, upload.
//!
//! One cycle takes the freshest frame from a source, encodes it to lossless
//! WebP, writes it under the configured directory, and hands the same bytes
//! to the uploader when an endpoint is configured. The local save always
//! happens first; an upload failure is an outcome the driver reports, not a
//! cycle error.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use image::codecs::webp::WebPEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::config::CaptureConfig;
use crate::frame::Frame;
use crate::source::{AcquireError, FrameSource};
use crate::upload::{UploadError, UploadReceipt, Uploader};

/// Per-cycle failure. Each variant aborts only the cycle it occurred in; the
/// session loop reports it and keeps accepting commands.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    /// The source produced an empty capture; the operator may simply try
    /// again.
    #[error("captured frame was empty")]
    NoFrame,
    #[error("failed to encode frame to webp")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {path}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to the upload half of a cycle.
#[derive(Debug)]
pub enum UploadStatus {
    Accepted(UploadReceipt),
    Failed(String),
}

/// Result of one successful capture cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub saved_path: PathBuf,
    /// `None` when no upload endpoint is configured.
    pub upload: Option<UploadStatus>,
}

/// Encode/persist/upload stage driven once per capture command.
pub struct Pipeline {
    save_dir: PathBuf,
    uploader: Option<Uploader>,
}

impl Pipeline {
    pub fn new(save_dir: PathBuf, uploader: Option<Uploader>) -> Self {
        Self { save_dir, uploader }
    }

    pub fn from_config(cfg: &CaptureConfig) -> Result<Self, UploadError> {
        let uploader = cfg.upload.clone().map(Uploader::new).transpose()?;
        Ok(Self::new(cfg.save_dir.clone(), uploader))
    }

    /// Run one end-to-end cycle against `source`.
    pub fn run_cycle(&self, source: &mut dyn FrameSource) -> Result<CycleReport, CycleError> {
        log::info!("capturing image...");
        let frame = source.acquire_frame()?.ok_or(CycleError::NoFrame)?;
        log::debug!("captured {:?}", frame);

        let encoded = encode_webp(&frame)?;
        let filename = capture_filename(Local::now());
        let saved_path = self.persist(&filename, &encoded)?;

        let upload = match &self.uploader {
            Some(uploader) => match uploader.send(&filename, &encoded) {
                Ok(receipt) => {
                    log::info!(
                        "upload accepted with status {}: {}",
                        receipt.status,
                        receipt.body
                    );
                    Some(UploadStatus::Accepted(receipt))
                }
                Err(e) => {
                    log::error!("upload failed: {}", e);
                    Some(UploadStatus::Failed(e.to_string()))
                }
            },
            None => {
                log::debug!("no upload endpoint configured; skipping upload");
                None
            }
        };

        Ok(CycleReport { saved_path, upload })
    }

    fn persist(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, CycleError> {
        std::fs::create_dir_all(&self.save_dir).map_err(|source| CycleError::Persist {
            path: self.save_dir.clone(),
            source,
        })?;
        let path = self.save_dir.join(filename);
        std::fs::write(&path, bytes).map_err(|source| CycleError::Persist {
            path: path.clone(),
            source,
        })?;
        log::info!("image saved locally: {}", path.display());
        Ok(path)
    }
}

/// Losslessly encode an RGB8 frame to WebP.
fn encode_webp(frame: &Frame) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = WebPEncoder::new_lossless(&mut buf);
    encoder.encode(
        frame.pixels(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

fn capture_filename(now: DateTime<Local>) -> String {
    format!("capture_{}.webp", now.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StillSettings;
    use crate::source::StillCameraSource;
    use chrono::TimeZone;

    #[test]
    fn filename_uses_local_timestamp_pattern() {
        let at = Local.with_ymd_and_hms(2026, 8, 23, 14, 5, 9).unwrap();
        assert_eq!(capture_filename(at), "capture_20260823-140509.webp");
    }

    #[test]
    fn encode_produces_webp_container() {
        let frame = Frame::from_rgb8(vec![128; 4 * 2 * 3], 4, 2);
        let bytes = encode_webp(&frame).expect("encode");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn cycle_saves_one_file_without_upload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = Pipeline::new(dir.path().join("nested").join("images"), None);
        let mut source = StillCameraSource::new(StillSettings {
            width: 8,
            height: 8,
            ..StillSettings::default()
        });
        crate::source::FrameSource::connect(&mut source).expect("connect");

        let report = pipeline.run_cycle(&mut source).expect("cycle");
        assert!(report.upload.is_none());
        assert!(report.saved_path.exists());
        let name = report
            .saved_path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("file name");
        assert!(name.starts_with("capture_"));
        assert!(name.ends_with(".webp"));
    }
}
