//! Error types for the `scrubcache` crate.
//!
//! This module defines [`CacheError`], the unified error type returned by all
//! fallible operations in the crate. Errors carry rich context to aid
//! debugging, including file paths, frame numbers, and upstream error
//! messages.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `scrubcache` operations.
///
/// Every public method that can fail returns `Result<T, CacheError>`.
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The media source could not be opened.
    #[error("Failed to open media source at {path}: {reason}")]
    SourceOpen {
        /// Path that was passed to the decoder factory.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The source does not contain a video stream.
    #[error("No video stream found in source")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    DecodeError(String),

    /// Seeking to a timestamp failed.
    #[error("Failed to seek to {timestamp:.3}s: {reason}")]
    SeekError {
        /// The timestamp that was requested, in seconds.
        timestamp: f64,
        /// Underlying reason the seek failed.
        reason: String,
    },

    /// The requested frame number exceeds the total frame count.
    #[error("Frame {frame_number} is out of range (video has {total_frames} frames)")]
    FrameOutOfRange {
        /// The frame number that was requested.
        frame_number: i64,
        /// The total number of frames in the video.
        total_frames: i64,
    },

    /// The software scaler could not be created or run.
    #[error("Scaler error: {0}")]
    ScalerError(String),

    /// Pixel-format conversion failed.
    #[error("Pixel conversion error: {0}")]
    ConversionError(String),

    /// The owning cache is shutting down and no longer accepts work.
    #[error("Cache is shutting down")]
    ShuttingDown,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading the media source.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),
}

impl From<FfmpegError> for CacheError {
    fn from(error: FfmpegError) -> Self {
        CacheError::FfmpegError(error.to_string())
    }
}
