//! Industrial still camera source.
//!
//! Single-shot acquisition from a machine-vision camera: structured settings
//! (region of interest, exposure, gain) are applied once at connect time, and
//! each acquisition runs one start/grab/stop cycle.
//!
//! The vendor SDK binding is an external collaborator; this module carries
//! the settings model and the `FrameSource` lifecycle around it, backed by a
//! synthetic raster generator so sessions and tests run without hardware.

use std::time::Instant;

use super::{AcquireError, ConnectError, FrameSource};
use crate::config::StillSettings;
use crate::frame::Frame;

/// Still camera behind the `FrameSource` contract.
pub struct StillCameraSource {
    settings: StillSettings,
    device: Option<SyntheticDevice>,
}

impl StillCameraSource {
    pub fn new(settings: StillSettings) -> Self {
        Self {
            settings,
            device: None,
        }
    }
}

impl FrameSource for StillCameraSource {
    fn connect(&mut self) -> Result<(), ConnectError> {
        if self.device.is_some() {
            return Ok(());
        }
        let device = SyntheticDevice::open(&self.settings).map_err(|source| ConnectError {
            endpoint: "still camera".to_string(),
            source,
        })?;
        log::info!(
            "still camera connected: {}x{}+{}+{} exposure={:?}us gain={:?}",
            self.settings.width,
            self.settings.height,
            self.settings.x_offset,
            self.settings.y_offset,
            self.settings.exposure_us,
            self.settings.gain,
        );
        self.device = Some(device);
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<Option<Frame>, AcquireError> {
        let device = self.device.as_mut().ok_or(AcquireError::NotConnected)?;
        let started = Instant::now();
        let capture = device.capture_one()?;
        log::debug!("still acquisition took {:?}", started.elapsed());
        Ok(capture)
    }

    fn disconnect(&mut self) {
        if self.device.take().is_some() {
            log::info!("still camera disconnected");
        }
    }
}

/// Synthetic stand-in for the camera device: deterministic rasters at the
/// configured resolution, one per start/grab/stop cycle.
struct SyntheticDevice {
    width: u32,
    height: u32,
    shot_count: u64,
}

impl SyntheticDevice {
    fn open(settings: &StillSettings) -> anyhow::Result<Self> {
        anyhow::ensure!(
            settings.width > 0 && settings.height > 0,
            "still camera resolution must be non-zero"
        );
        Ok(Self {
            width: settings.width,
            height: settings.height,
            shot_count: 0,
        })
    }

    /// One start/grab/stop cycle. An empty grab maps to `Ok(None)`: the
    /// operator may simply trigger another capture.
    fn capture_one(&mut self) -> Result<Option<Frame>, AcquireError> {
        self.shot_count += 1;
        let pixel_count = self.width as usize * self.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i as u64 + self.shot_count * 7) % 256) as u8;
        }
        Ok(Some(Frame::from_rgb8(pixels, self.width, self.height)))
    }
}
