mod error;
mod types;

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::NormalizerConfig;

pub use error::{NormalizeError, NormalizeResult};
pub use types::{EncodeProfile, NormalizeAction, NormalizeReport, TargetFormat, TranscodeJob};

/// Stem the upstream download step uses for the video artifact, whatever
/// container extension it ended up with.
pub const VIDEO_STEM: &str = "video";

/// Companion poster image written next to the video.
pub const THUMBNAIL_NAME: &str = "thumbnail.jpg";

/// Normalizes downloaded video directories one at a time: locate the
/// artifact, cover-fit the poster, re-encode into the target container when
/// the source does not already satisfy it, and swap the result into place.
///
/// The pipeline is sequential per directory and keeps no state between
/// directories; callers may run many directories concurrently as long as no
/// two invocations share a directory.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline for `video_dir`. `video_id` is carried for log
    /// and error context only. On success the directory holds exactly one
    /// video file, at the extension implied by `target`, plus the resized
    /// poster; no temp file survives.
    pub async fn normalize(
        &self,
        video_dir: &Path,
        video_id: &str,
        target: TargetFormat,
        low_quality: bool,
        skip_recompress: bool,
    ) -> NormalizeResult<NormalizeReport> {
        let source = match locate_video(video_dir, VIDEO_STEM, THUMBNAIL_NAME) {
            Ok(path) => path,
            Err(err) => {
                if let NormalizeError::MissingAsset { listing, .. } = &err {
                    error!(
                        video = video_id,
                        dir = %video_dir.display(),
                        "video file missing"
                    );
                    debug!(video = video_id, listing = ?listing, "directory snapshot");
                }
                return Err(err);
            }
        };

        let thumbnail_path = video_dir.join(THUMBNAIL_NAME);
        self.resize_thumbnail(&thumbnail_path)?;

        if !needs_recompress(&source, target, low_quality, skip_recompress) {
            debug!(
                video = video_id,
                src = %source.display(),
                "source already acceptable, skipping recompression"
            );
            self.sweep_stale_temps(video_dir).await;
            return Ok(NormalizeReport::new(
                video_id,
                NormalizeAction::Skipped,
                source,
                thumbnail_path,
            ));
        }

        let job = TranscodeJob::new(video_dir, source, VIDEO_STEM, target);
        self.transcode_and_swap(video_id, &job, target).await?;
        self.sweep_stale_temps(video_dir).await;
        Ok(NormalizeReport::new(
            video_id,
            NormalizeAction::Swapped,
            job.destination,
            thumbnail_path,
        ))
    }

    /// Resize the poster in place to the configured cover geometry, cropping
    /// overflow rather than letterboxing. This runs even when the video
    /// itself is skipped: the detail view needs the full-size poster
    /// regardless of what the download produced.
    fn resize_thumbnail(&self, path: &Path) -> NormalizeResult<()> {
        let geometry = &self.config.thumbnail;
        let poster = image::open(path).map_err(|source| NormalizeError::Thumbnail {
            source,
            path: path.to_path_buf(),
        })?;
        let resized = poster.resize_to_fill(geometry.width, geometry.height, FilterType::Lanczos3);
        resized
            .save(path)
            .map_err(|source| NormalizeError::Thumbnail {
                source,
                path: path.to_path_buf(),
            })?;
        Ok(())
    }

    /// Re-encode `job.source` into `job.temp`, then replace the original.
    /// The temp file is a complete, validated artifact before the original
    /// is destroyed; the window without a final video is bounded to the
    /// single rename at the end.
    async fn transcode_and_swap(
        &self,
        video_id: &str,
        job: &TranscodeJob,
        target: TargetFormat,
    ) -> NormalizeResult<()> {
        let binary = &self.config.encoder.binary;
        let args = self.encode_args(job, target);
        info!(
            video = video_id,
            src = %job.source.display(),
            dst = %job.destination.display(),
            format = %target,
            "recompressing video"
        );
        debug!(command = %format!("{} {}", binary, args.join(" ")));

        let status = Command::new(binary)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| NormalizeError::Spawn {
                source,
                binary: binary.clone(),
            })?;
        if !status.success() {
            // temp output stays behind for postmortem; the source is intact
            return Err(NormalizeError::Transcode {
                binary: binary.clone(),
                status,
                args,
            });
        }

        fs::remove_file(&job.source)
            .await
            .map_err(|source| NormalizeError::Io {
                source,
                path: job.source.clone(),
            })?;
        fs::rename(&job.temp, &job.destination)
            .await
            .map_err(|source| NormalizeError::Io {
                source,
                path: job.temp.clone(),
            })?;
        Ok(())
    }

    /// Full encoder argument list for one job. Codec selection and
    /// container flags come from the target's profile; the shared
    /// bounded-bitrate parameters come from configuration.
    fn encode_args(&self, job: &TranscodeJob, target: TargetFormat) -> Vec<String> {
        let enc = &self.config.encoder;
        let profile = target.profile();
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            format!("file:{}", job.source.display()),
            "-codec:v".to_string(),
            profile.video_codec.to_string(),
            "-quality".to_string(),
            enc.quality.clone(),
            // 0 keeps the encoder at full quality, no speed-for-quality trade
            "-cpu-used".to_string(),
            enc.cpu_used.to_string(),
            "-b:v".to_string(),
            enc.video_bitrate.clone(),
            // narrow quantizer range, consistency over extremes
            "-qmin".to_string(),
            enc.qmin.to_string(),
            "-qmax".to_string(),
            enc.qmax.to_string(),
            "-maxrate".to_string(),
            enc.maxrate.clone(),
            "-bufsize".to_string(),
            enc.bufsize.clone(),
            "-threads".to_string(),
            enc.threads.to_string(),
            // fixed output width, height follows aspect rounded to even
            "-vf".to_string(),
            format!("scale='{}:trunc(ow/a/2)*2'", enc.scale_width),
            "-codec:a".to_string(),
            profile.audio_codec.to_string(),
            "-ar".to_string(),
            enc.audio_sample_rate.to_string(),
            "-b:a".to_string(),
            enc.audio_bitrate.clone(),
            // oversized queue keeps muxing alive on hosts without swap
            "-max_muxing_queue_size".to_string(),
            enc.max_muxing_queue_size.to_string(),
        ];
        args.extend(profile.container_flags.iter().map(|flag| flag.to_string()));
        args.push(format!("file:{}", job.temp.display()));
        args
    }

    /// Remove `video.tmp.*` residue left by previously failed runs. Only
    /// invoked after a successful normalization and only when enabled, so a
    /// failed run always keeps its temp output for inspection.
    async fn sweep_stale_temps(&self, video_dir: &Path) {
        if !self.config.cleanup.remove_stale_temp {
            return;
        }
        let prefix = format!("{VIDEO_STEM}.tmp.");
        let entries = match std::fs::read_dir(video_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    dir = %video_dir.display(),
                    error = %err,
                    "failed to scan directory for stale temp files"
                );
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if name.starts_with(&prefix) {
                    let path = entry.path();
                    if let Err(err) = fs::remove_file(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "failed to remove stale temp file"
                        );
                    }
                }
            }
        }
    }
}

/// Find the downloaded video artifact in `dir`: the entry whose stem equals
/// `stem` and whose extension differs from the thumbnail's. More than one
/// match is resolved by taking the first in directory-listing order; the
/// anomaly is logged with every candidate so upstream regressions stay
/// auditable.
pub fn locate_video(dir: &Path, stem: &str, thumbnail: &str) -> NormalizeResult<PathBuf> {
    let thumbnail_ext = Path::new(thumbnail)
        .extension()
        .and_then(|ext| ext.to_str());
    let entries = std::fs::read_dir(dir).map_err(|source| NormalizeError::Io {
        source,
        path: dir.to_path_buf(),
    })?;

    let mut listing = Vec::new();
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| NormalizeError::Io {
            source,
            path: dir.to_path_buf(),
        })?;
        let path = entry.path();
        let matches_stem = path.file_stem().and_then(|s| s.to_str()) == Some(stem);
        let has_thumbnail_ext = path.extension().and_then(|ext| ext.to_str()) == thumbnail_ext;
        if matches_stem && !has_thumbnail_ext {
            candidates.push(path.clone());
        }
        listing.push(path);
    }

    if candidates.is_empty() {
        return Err(NormalizeError::MissingAsset {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            listing,
        });
    }
    if candidates.len() > 1 {
        warn!(
            dir = %dir.display(),
            candidates = ?candidates,
            chosen = %candidates[0].display(),
            "multiple video file candidates, picking first in listing order"
        );
    }
    Ok(candidates.remove(0))
}

/// Decide whether a re-encode is required, before any subprocess is spawned.
/// Standard quality with the container already matching means the download
/// is acceptable as-is; low quality always forces the bounded-bitrate pass.
pub fn needs_recompress(
    source: &Path,
    target: TargetFormat,
    low_quality: bool,
    skip_recompress: bool,
) -> bool {
    if skip_recompress {
        return false;
    }
    if !low_quality && source.extension().and_then(|ext| ext.to_str()) == Some(target.extension()) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb};
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[test]
    fn decision_skips_matching_container_at_standard_quality() {
        let source = Path::new("/talks/1/video.mp4");
        assert!(!needs_recompress(source, TargetFormat::Mp4, false, false));
    }

    #[test]
    fn decision_recompresses_container_mismatch() {
        let source = Path::new("/talks/1/video.mp4");
        assert!(needs_recompress(source, TargetFormat::Webm, false, false));
    }

    #[test]
    fn decision_forces_recompress_for_low_quality() {
        let source = Path::new("/talks/1/video.mp4");
        assert!(needs_recompress(source, TargetFormat::Mp4, true, false));
    }

    #[test]
    fn decision_honors_explicit_skip() {
        let source = Path::new("/talks/1/video.mp4");
        assert!(!needs_recompress(source, TargetFormat::Webm, true, true));
    }

    #[test]
    fn locator_returns_single_candidate() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "thumbnail.jpg");
        let video = touch(dir.path(), "video.mp4");
        let found = locate_video(dir.path(), VIDEO_STEM, THUMBNAIL_NAME).unwrap();
        assert_eq!(found, video);
    }

    #[test]
    fn locator_excludes_thumbnail_extension_artifacts() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "thumbnail.jpg");
        touch(dir.path(), "video.jpg");
        let video = touch(dir.path(), "video.webm");
        let found = locate_video(dir.path(), VIDEO_STEM, THUMBNAIL_NAME).unwrap();
        assert_eq!(found, video);
    }

    #[test]
    fn locator_ignores_stale_temp_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "thumbnail.jpg");
        touch(dir.path(), "video.tmp.webm");
        let video = touch(dir.path(), "video.mp4");
        let found = locate_video(dir.path(), VIDEO_STEM, THUMBNAIL_NAME).unwrap();
        assert_eq!(found, video);
    }

    #[test]
    fn locator_fails_with_listing_snapshot() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "thumbnail.jpg");
        let err = locate_video(dir.path(), VIDEO_STEM, THUMBNAIL_NAME).unwrap_err();
        match err {
            NormalizeError::MissingAsset { stem, listing, .. } => {
                assert_eq!(stem, VIDEO_STEM);
                assert_eq!(listing.len(), 1);
            }
            other => panic!("expected MissingAsset, got {other:?}"),
        }
    }

    #[test]
    fn locator_picks_first_candidate_in_listing_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "thumbnail.jpg");
        touch(dir.path(), "video.mp4");
        touch(dir.path(), "video.webm");
        let expected = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.file_stem().and_then(|s| s.to_str()) == Some(VIDEO_STEM)
                    && path.extension().and_then(|e| e.to_str()) != Some("jpg")
            })
            .unwrap();
        let found = locate_video(dir.path(), VIDEO_STEM, THUMBNAIL_NAME).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn transcode_job_derives_destination_and_temp() {
        let dir = Path::new("/talks/2107");
        let job = TranscodeJob::new(
            dir,
            dir.join("video.mp4"),
            VIDEO_STEM,
            TargetFormat::Webm,
        );
        assert_eq!(job.destination, dir.join("video.webm"));
        assert_eq!(job.temp, dir.join("video.tmp.webm"));
    }

    #[test]
    fn mp4_arguments_select_h264_with_faststart() {
        let normalizer = Normalizer::new(NormalizerConfig::default());
        let dir = Path::new("/talks/1");
        let job = TranscodeJob::new(dir, dir.join("video.webm"), VIDEO_STEM, TargetFormat::Mp4);
        let args = normalizer.encode_args(&job, TargetFormat::Mp4);
        assert!(contains_pair(&args, "-codec:v", "h264"));
        assert!(contains_pair(&args, "-codec:a", "aac"));
        assert!(contains_pair(&args, "-movflags", "+faststart"));
        assert_eq!(args.last().unwrap(), &format!("file:{}", job.temp.display()));
    }

    #[test]
    fn webm_arguments_select_vpx_without_container_flags() {
        let normalizer = Normalizer::new(NormalizerConfig::default());
        let dir = Path::new("/talks/1");
        let job = TranscodeJob::new(dir, dir.join("video.mp4"), VIDEO_STEM, TargetFormat::Webm);
        let args = normalizer.encode_args(&job, TargetFormat::Webm);
        assert!(contains_pair(&args, "-codec:v", "libvpx"));
        assert!(contains_pair(&args, "-codec:a", "libvorbis"));
        assert!(!args.iter().any(|arg| arg == "-movflags"));
    }

    #[test]
    fn shared_arguments_follow_bitrate_bounds() {
        let normalizer = Normalizer::new(NormalizerConfig::default());
        let dir = Path::new("/talks/1");
        let job = TranscodeJob::new(dir, dir.join("video.mp4"), VIDEO_STEM, TargetFormat::Webm);
        let args = normalizer.encode_args(&job, TargetFormat::Webm);
        assert_eq!(args[0], "-y");
        assert!(contains_pair(&args, "-i", &format!("file:{}", job.source.display())));
        assert!(contains_pair(&args, "-quality", "best"));
        assert!(contains_pair(&args, "-cpu-used", "0"));
        assert!(contains_pair(&args, "-b:v", "300k"));
        assert!(contains_pair(&args, "-qmin", "30"));
        assert!(contains_pair(&args, "-qmax", "42"));
        assert!(contains_pair(&args, "-maxrate", "300k"));
        assert!(contains_pair(&args, "-bufsize", "1000k"));
        assert!(contains_pair(&args, "-threads", "8"));
        assert!(contains_pair(&args, "-vf", "scale='480:trunc(ow/a/2)*2'"));
        assert!(contains_pair(&args, "-ar", "44100"));
        assert!(contains_pair(&args, "-b:a", "128k"));
        assert!(contains_pair(&args, "-max_muxing_queue_size", "9999"));
    }

    #[test]
    fn thumbnail_resize_covers_target_geometry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(THUMBNAIL_NAME);
        let mut img = ImageBuffer::<Rgb<u8>, Vec<u8>>::new(150, 100);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x % 255) as u8, 64, 128]);
        }
        img.save(&path).unwrap();

        let normalizer = Normalizer::new(NormalizerConfig::default());
        normalizer.resize_thumbnail(&path).unwrap();

        let resized = image::open(&path).unwrap();
        assert_eq!(resized.width(), 480);
        assert_eq!(resized.height(), 270);
    }

    #[test]
    fn thumbnail_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(THUMBNAIL_NAME);
        std::fs::write(&path, b"not an image").unwrap();
        let normalizer = Normalizer::new(NormalizerConfig::default());
        let err = normalizer.resize_thumbnail(&path).unwrap_err();
        assert!(matches!(err, NormalizeError::Thumbnail { .. }));
    }

    fn contains_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }
}
