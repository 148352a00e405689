use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result alias for normalization operations.
pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// Errors produced while normalizing one video directory. Each is fatal to
/// that directory only; whether the batch continues is the caller's call.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// No directory entry matched the expected video stem. Carries a
    /// snapshot of the directory listing taken at the time of the failure.
    #[error("no video file with stem {stem:?} in {dir}")]
    MissingAsset {
        dir: PathBuf,
        stem: String,
        listing: Vec<PathBuf>,
    },
    #[error("thumbnail processing failed for {path}: {source}")]
    Thumbnail {
        source: image::ImageError,
        path: PathBuf,
    },
    #[error("failed to launch encoder {binary}: {source}")]
    Spawn {
        source: std::io::Error,
        binary: String,
    },
    /// The encoder exited non-zero. The source file is untouched and the
    /// temp output is left in place; `args` is the full invocation.
    #[error("encoder {binary} exited with {status}")]
    Transcode {
        binary: String,
        status: ExitStatus,
        args: Vec<String>,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}
