pub mod config;
pub mod normalize;

pub use config::{
    load_normalizer_config, CleanupSection, ConfigError, ConfigResult, EncoderSection,
    NormalizerConfig, ThumbnailSection,
};
pub use normalize::{
    locate_video, needs_recompress, EncodeProfile, NormalizeAction, NormalizeError,
    NormalizeReport, NormalizeResult, Normalizer, TargetFormat, TranscodeJob, THUMBNAIL_NAME,
    VIDEO_STEM,
};
