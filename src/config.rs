use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_SAVE_DIR: &str = "./images";
const DEFAULT_IMAGE_FIELD: &str = "image_file";
const DEFAULT_STILL_WIDTH: u32 = 1920;
const DEFAULT_STILL_HEIGHT: u32 = 1080;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    save_dir: Option<PathBuf>,
    stream: Option<StreamConfigFile>,
    still: Option<StillConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StillConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    x_offset: Option<u32>,
    y_offset: Option<u32>,
    exposure_us: Option<u32>,
    gain: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    url: Option<String>,
    image_field: Option<String>,
    metadata: Option<BTreeMap<String, String>>,
    headers: Option<BTreeMap<String, String>>,
}

/// Which acquisition backend a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// RTSP live feed engine.
    Live,
    /// Industrial still camera.
    Still,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "live" | "rtsp" => Ok(SourceKind::Live),
            "still" | "camera" => Ok(SourceKind::Still),
            other => Err(anyhow!(
                "unknown source type '{}'; expected 'live' or 'still'",
                other
            )),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Live => write!(f, "live"),
            SourceKind::Still => write!(f, "still"),
        }
    }
}

/// Resolved capture session configuration.
///
/// Loaded from an optional JSON file named by `FRAMEGRAB_CONFIG`, then
/// overridden by `FRAMEGRAB_*` environment variables, then validated.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub save_dir: PathBuf,
    pub stream_url: String,
    pub still: StillSettings,
    pub upload: Option<UploadSettings>,
}

/// Structured settings applied to a still camera at connect time.
#[derive(Debug, Clone)]
pub struct StillSettings {
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    /// Exposure time in microseconds; `None` leaves the device default.
    pub exposure_us: Option<u32>,
    /// Analog gain; `None` leaves the device default.
    pub gain: Option<f64>,
}

impl Default for StillSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_STILL_WIDTH,
            height: DEFAULT_STILL_HEIGHT,
            x_offset: 0,
            y_offset: 0,
            exposure_us: None,
            gain: None,
        }
    }
}

/// Upload endpoint settings. Absent entirely when no endpoint is configured;
/// a missing endpoint is not an error, upload is simply skipped.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub url: String,
    /// Multipart form field name carrying the image bytes.
    pub image_field: String,
    /// Static text fields sent alongside the image.
    pub metadata: BTreeMap<String, String>,
    /// Opaque headers (API keys, workspace ids) passed through verbatim.
    pub headers: BTreeMap<String, String>,
}

impl CaptureConfig {
    /// Load configuration: optional JSON file, then env overrides, then
    /// validation. `config_path` (from the CLI) takes precedence over the
    /// `FRAMEGRAB_CONFIG` variable.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("FRAMEGRAB_CONFIG").ok().map(PathBuf::from);
        let path = config_path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => CaptureConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Result<Self> {
        let source = match file.source.as_deref() {
            Some(value) => value.parse()?,
            None => SourceKind::Still,
        };
        let save_dir = file
            .save_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_DIR));
        let stream_url = file
            .stream
            .and_then(|stream| stream.url)
            .unwrap_or_default();
        let still = match file.still {
            Some(still) => StillSettings {
                width: still.width.unwrap_or(DEFAULT_STILL_WIDTH),
                height: still.height.unwrap_or(DEFAULT_STILL_HEIGHT),
                x_offset: still.x_offset.unwrap_or(0),
                y_offset: still.y_offset.unwrap_or(0),
                exposure_us: still.exposure_us,
                gain: still.gain,
            },
            None => StillSettings::default(),
        };
        let upload = file.upload.and_then(|upload| {
            let url = upload.url?;
            Some(UploadSettings {
                url,
                image_field: upload
                    .image_field
                    .unwrap_or_else(|| DEFAULT_IMAGE_FIELD.to_string()),
                metadata: upload.metadata.unwrap_or_default(),
                headers: upload.headers.unwrap_or_default(),
            })
        });
        Ok(Self {
            source,
            save_dir,
            stream_url,
            still,
            upload,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("FRAMEGRAB_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source.parse()?;
            }
        }
        if let Ok(dir) = std::env::var("FRAMEGRAB_SAVE_DIR") {
            if !dir.trim().is_empty() {
                self.save_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("FRAMEGRAB_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream_url = url;
            }
        }
        if let Ok(url) = std::env::var("FRAMEGRAB_UPLOAD_URL") {
            if !url.trim().is_empty() {
                match &mut self.upload {
                    Some(upload) => upload.url = url,
                    None => {
                        self.upload = Some(UploadSettings {
                            url,
                            image_field: DEFAULT_IMAGE_FIELD.to_string(),
                            metadata: BTreeMap::new(),
                            headers: BTreeMap::new(),
                        })
                    }
                }
            }
        }
        if let Ok(field) = std::env::var("FRAMEGRAB_IMAGE_FIELD") {
            if !field.trim().is_empty() {
                if let Some(upload) = &mut self.upload {
                    upload.image_field = field;
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source == SourceKind::Live && self.stream_url.trim().is_empty() {
            return Err(anyhow!(
                "stream url must be set when source type is 'live' \
                 (stream.url in the config file or FRAMEGRAB_STREAM_URL)"
            ));
        }
        if !self.stream_url.is_empty() {
            url::Url::parse(&self.stream_url)
                .map_err(|e| anyhow!("invalid stream url '{}': {}", self.stream_url, e))?;
        }
        if let Some(upload) = &self.upload {
            url::Url::parse(&upload.url)
                .map_err(|e| anyhow!("invalid upload url '{}': {}", upload.url, e))?;
            if upload.image_field.trim().is_empty() {
                return Err(anyhow!("upload image field name must not be empty"));
            }
        }
        if self.still.width == 0 || self.still.height == 0 {
            return Err(anyhow!("still camera resolution must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
