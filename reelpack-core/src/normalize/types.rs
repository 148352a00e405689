use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of container/codec pairs the offline archive can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    Mp4,
    Webm,
}

impl TargetFormat {
    /// File extension of the final artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Mp4 => "mp4",
            TargetFormat::Webm => "webm",
        }
    }

    /// Codec and container-flag selection for this format. The mapping is a
    /// fixed product decision, kept as data rather than inline conditionals.
    pub fn profile(&self) -> EncodeProfile {
        match self {
            TargetFormat::Mp4 => EncodeProfile {
                video_codec: "h264",
                audio_codec: "aac",
                // moov atom up front so playback starts before the file is
                // fully read
                container_flags: &["-movflags", "+faststart"],
            },
            TargetFormat::Webm => EncodeProfile {
                video_codec: "libvpx",
                audio_codec: "libvorbis",
                container_flags: &[],
            },
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Encoder parameters specific to one target container.
#[derive(Debug, Clone, Copy)]
pub struct EncodeProfile {
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub container_flags: &'static [&'static str],
}

/// Paths for one in-flight re-encode. The temp path is distinct from both
/// source and destination, so a crash mid-run leaves no ambiguity about
/// which file is authoritative.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub temp: PathBuf,
}

impl TranscodeJob {
    pub fn new(dir: &Path, source: PathBuf, stem: &str, format: TargetFormat) -> Self {
        let destination = dir.join(format!("{stem}.{}", format.extension()));
        let temp = dir.join(format!("{stem}.tmp.{}", format.extension()));
        Self {
            source,
            destination,
            temp,
        }
    }
}

/// Terminal success state of one directory's normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeAction {
    /// The source already satisfied the requested container; no re-encode.
    Skipped,
    /// The source was re-encoded and the temp output swapped into place.
    Swapped,
}

/// Outcome record handed back to the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizeReport {
    pub video_id: String,
    pub action: NormalizeAction,
    pub video_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub completed_at: DateTime<Utc>,
}

impl NormalizeReport {
    pub fn new(
        video_id: impl Into<String>,
        action: NormalizeAction,
        video_path: PathBuf,
        thumbnail_path: PathBuf,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            action,
            video_path,
            thumbnail_path,
            completed_at: Utc::now(),
        }
    }
}
