//! Network video stream backends.
//!
//! A `VideoStream` is the raw transport/decoder handle the live feed engine
//! owns: it can decode one frame, or cheaply discard one buffered frame.
//! Frames come out as interleaved BGR8; the engine converts channel order
//! before anything downstream sees them.
//!
//! Two backends exist, selected by URL scheme:
//! - `stub://` produces synthetic rasters, with fault-injection knobs in the
//!   query string for tests
//! - anything else opens a real stream through FFmpeg (feature: rtsp-ffmpeg)

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::ConnectError;

#[cfg(feature = "rtsp-ffmpeg")]
use ffmpeg_next as ffmpeg;

pub(crate) enum VideoStream {
    Synthetic(SyntheticStream),
    #[cfg(feature = "rtsp-ffmpeg")]
    Ffmpeg(FfmpegStream),
}

impl VideoStream {
    /// Open a stream handle for `url`.
    pub(crate) fn open(url: &str) -> Result<Self, ConnectError> {
        if url.starts_with("stub://") {
            return Ok(Self::Synthetic(SyntheticStream::open(url).map_err(
                |source| ConnectError {
                    endpoint: url.to_string(),
                    source,
                },
            )?));
        }
        #[cfg(feature = "rtsp-ffmpeg")]
        {
            Ok(Self::Ffmpeg(FfmpegStream::open(url).map_err(|source| {
                ConnectError {
                    endpoint: url.to_string(),
                    source,
                }
            })?))
        }
        #[cfg(not(feature = "rtsp-ffmpeg"))]
        {
            Err(ConnectError {
                endpoint: url.to_string(),
                source: anyhow!("network streams require the rtsp-ffmpeg feature"),
            })
        }
    }

    /// Decode the next frame as an interleaved BGR8 raster. `Ok(None)` means
    /// nothing was decodable right now; the caller may try again.
    pub(crate) fn read_frame(&mut self) -> Result<Option<(Vec<u8>, u32, u32)>> {
        match self {
            Self::Synthetic(stream) => stream.read_frame(),
            #[cfg(feature = "rtsp-ffmpeg")]
            Self::Ffmpeg(stream) => stream.read_frame(),
        }
    }

    /// Pull one frame off the decoder and throw it away. Used to drain stale
    /// transport buffers without paying for pixel copies.
    pub(crate) fn discard_frame(&mut self) -> Result<()> {
        match self {
            Self::Synthetic(stream) => stream.discard_frame(),
            #[cfg(feature = "rtsp-ffmpeg")]
            Self::Ffmpeg(stream) => stream.discard_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic stream (stub://) for tests
// ----------------------------------------------------------------------------

/// Synthetic raster generator behind a `stub://` URL.
///
/// Query parameters:
/// - `width`, `height`: raster size (default 64x48)
/// - `read_budget=N`: reads (including discards) succeed N times per open,
///   then fail
/// - `first_open_read_budget=N`: like `read_budget`, but only for the first
///   open of this exact URL; later opens read freely
/// - `open_budget=N`: the first N opens of this exact URL succeed, later ones
///   fail (tracked process-wide)
/// - `fail_connect`: every open fails
pub(crate) struct SyntheticStream {
    width: u32,
    height: u32,
    frame_count: u64,
    reads_left: Option<u64>,
}

impl SyntheticStream {
    fn open(raw_url: &str) -> Result<Self> {
        let url = Url::parse(raw_url).context("parse stub url")?;
        let mut width = 64u32;
        let mut height = 48u32;
        let mut read_budget = None;
        let mut first_open_read_budget = None;
        let mut open_budget = None;
        let mut fail_connect = false;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => width = value.parse().context("stub width")?,
                "height" => height = value.parse().context("stub height")?,
                "read_budget" => read_budget = Some(value.parse().context("stub read_budget")?),
                "first_open_read_budget" => {
                    first_open_read_budget =
                        Some(value.parse().context("stub first_open_read_budget")?)
                }
                "open_budget" => open_budget = Some(value.parse().context("stub open_budget")?),
                "fail_connect" => fail_connect = true,
                _ => {}
            }
        }
        if fail_connect {
            return Err(anyhow!("stub stream refused connection"));
        }
        if open_budget.is_some() || first_open_read_budget.is_some() {
            let opens = record_open(raw_url);
            if let Some(budget) = open_budget {
                if opens > budget {
                    return Err(anyhow!("stub stream open budget spent ({} opens)", opens));
                }
            }
            if opens == 1 {
                if let Some(budget) = first_open_read_budget {
                    read_budget = Some(budget);
                }
            }
        }
        log::debug!("stub stream open: {}x{} ({})", width, height, raw_url);
        Ok(Self {
            width,
            height,
            frame_count: 0,
            reads_left: read_budget,
        })
    }

    fn take_read(&mut self) -> Result<()> {
        if let Some(left) = &mut self.reads_left {
            if *left == 0 {
                return Err(anyhow!("stub stream stalled"));
            }
            *left -= 1;
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<(Vec<u8>, u32, u32)>> {
        self.take_read()?;
        self.frame_count += 1;
        let pixel_count = self.width as usize * self.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i as u64 + self.frame_count) % 256) as u8;
        }
        Ok(Some((pixels, self.width, self.height)))
    }

    fn discard_frame(&mut self) -> Result<()> {
        self.take_read()?;
        self.frame_count += 1;
        Ok(())
    }
}

/// Bump and return the process-wide open count for a stub URL.
fn record_open(url: &str) -> u64 {
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    static OPENS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();
    let opens = OPENS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut opens = opens.lock().unwrap_or_else(|e| e.into_inner());
    let count = opens.entry(url.to_string()).or_insert(0);
    *count += 1;
    *count
}

// ----------------------------------------------------------------------------
// FFmpeg stream for real RTSP endpoints
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-ffmpeg")]
pub(crate) struct FfmpegStream {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

#[cfg(feature = "rtsp-ffmpeg")]
impl FfmpegStream {
    fn open(url: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        // Keep transport buffering as shallow as the demuxer allows; the
        // freshness policy upstream assumes frames go stale, not queue up.
        let mut options = ffmpeg::Dictionary::new();
        options.set("rtsp_transport", "tcp");
        options.set("fflags", "nobuffer");
        options.set("max_delay", "500000");

        let input = ffmpeg::format::input_with_dictionary(&url, options)
            .with_context(|| format!("failed to open stream '{}' with ffmpeg", url))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("stream has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
        })
    }

    /// Decode exactly one frame off the wire. When `scale` is false the
    /// decoded frame is dropped without conversion; that is the cheap discard
    /// path.
    fn next_decoded(&mut self, scale: bool) -> Result<Option<(Vec<u8>, u32, u32)>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                if !scale {
                    return Ok(None);
                }
                let mut bgr_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut bgr_frame)
                    .context("scale frame to BGR")?;
                return frame_to_pixels(&bgr_frame).map(Some);
            }
        }

        Err(anyhow!("stream ended without frames"))
    }

    fn read_frame(&mut self) -> Result<Option<(Vec<u8>, u32, u32)>> {
        self.next_decoded(true)
    }

    fn discard_frame(&mut self) -> Result<()> {
        self.next_decoded(false).map(|_| ())
    }
}

#[cfg(feature = "rtsp-ffmpeg")]
fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_stream_produces_frames() {
        let mut stream = VideoStream::open("stub://camera?width=8&height=4").expect("open stub");
        let (pixels, width, height) = stream
            .read_frame()
            .expect("read frame")
            .expect("frame present");
        assert_eq!(width, 8);
        assert_eq!(height, 4);
        assert_eq!(pixels.len(), 8 * 4 * 3);
    }

    #[test]
    fn stub_stream_honors_read_budget() {
        let mut stream =
            VideoStream::open("stub://camera?read_budget=2").expect("open stub");
        assert!(stream.discard_frame().is_ok());
        assert!(stream.read_frame().is_ok());
        assert!(stream.read_frame().is_err());
    }

    #[test]
    fn stub_stream_can_refuse_connection() {
        assert!(VideoStream::open("stub://camera?fail_connect").is_err());
    }

    #[test]
    fn stub_stream_open_budget_is_tracked_across_opens() {
        let url = "stub://open-budget-test?open_budget=1";
        assert!(VideoStream::open(url).is_ok());
        assert!(VideoStream::open(url).is_err());
    }
}
