use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

/// Settings for the video normalization pipeline. Every field has a
/// default, so the library is usable without a config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub encoder: EncoderSection,
    pub thumbnail: ThumbnailSection,
    pub cleanup: CleanupSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub binary: String,
    pub quality: String,
    pub cpu_used: u32,
    pub video_bitrate: String,
    pub qmin: u32,
    pub qmax: u32,
    pub maxrate: String,
    pub bufsize: String,
    pub threads: u32,
    pub scale_width: u32,
    pub audio_sample_rate: u32,
    pub audio_bitrate: String,
    pub max_muxing_queue_size: u32,
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".into(),
            quality: "best".into(),
            cpu_used: 0,
            video_bitrate: "300k".into(),
            qmin: 30,
            qmax: 42,
            maxrate: "300k".into(),
            bufsize: "1000k".into(),
            threads: 8,
            scale_width: 480,
            audio_sample_rate: 44_100,
            audio_bitrate: "128k".into(),
            max_muxing_queue_size: 9999,
        }
    }
}

/// Poster geometry required by the detail view. Listing pages derive a
/// smaller image from this one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailSection {
    pub width: u32,
    pub height: u32,
}

impl Default for ThumbnailSection {
    fn default() -> Self {
        Self {
            width: 480,
            height: 270,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    /// Remove `video.tmp.*` residue from earlier failed runs once a later
    /// run of the same directory succeeds. Off by default: failed temps are
    /// kept for postmortem inspection.
    pub remove_stale_temp: bool,
}

pub fn load_normalizer_config<P: AsRef<Path>>(path: P) -> ConfigResult<NormalizerConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
