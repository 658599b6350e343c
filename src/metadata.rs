//! Stream and color metadata types, plus timestamp conversion helpers.
//!
//! [`StreamInfo`] is probed once when a media source is opened and cached for
//! the lifetime of the cache. [`ColorMetadata`] is supplied by an external
//! metadata collaborator and may arrive after the cache has been created;
//! formats that need it for correct color-matrix handling are deferred until
//! it does.

/// Metadata for the selected video stream.
///
/// Probed once at open time; immutable thereafter.
#[derive(Debug, Clone)]
#[must_use]
pub struct StreamInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second (may be approximate for variable-frame-rate content).
    pub frames_per_second: f64,
    /// Estimated total number of frames, computed from duration and frame rate.
    pub frame_count: i64,
    /// Total duration in seconds.
    pub duration_seconds: f64,
    /// Codec name (e.g. `"h264"`, `"vp9"`, `"prores"`).
    pub codec: String,
    /// Source pixel format name (e.g. `"yuv420p"`, `"yuv444p10le"`).
    pub pixel_format_name: String,
}

impl StreamInfo {
    /// Nominal duration of one frame in seconds, or `0.0` when the frame
    /// rate is unknown.
    pub fn frame_duration(&self) -> f64 {
        if self.frames_per_second > 0.0 {
            1.0 / self.frames_per_second
        } else {
            0.0
        }
    }
}

/// Source colorspace as reported by the metadata collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceColorspace {
    /// ITU-R BT.709 (HD).
    Bt709,
    /// ITU-R BT.601 (SD).
    Bt601,
    /// ITU-R BT.2020 (UHD / HDR).
    Bt2020,
    /// Colorspace not signalled by the source.
    #[default]
    Unspecified,
}

/// Source sample range as reported by the metadata collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceRange {
    /// Limited / video range (16–235 for 8-bit luma).
    Limited,
    /// Full / PC range (0–255 for 8-bit).
    Full,
    /// Range not signalled by the source.
    #[default]
    Unspecified,
}

/// Color metadata supplied by the external metadata collaborator.
///
/// Used to derive a [`ConversionStrategy`](crate::ConversionStrategy) once
/// per media load. May arrive after the cache was created; until then,
/// extraction of metadata-dependent formats is deferred rather than decoded
/// with guessed colorimetry.
#[derive(Debug, Clone)]
#[must_use]
pub struct ColorMetadata {
    /// Pixel format name (e.g. `"yuv422p10le"`, `"gbrp12le"`).
    pub pixel_format_name: String,
    /// Signalled colorspace.
    pub colorspace: SourceColorspace,
    /// Signalled transfer characteristic name (informational).
    pub color_transfer: String,
    /// Signalled sample range.
    pub range: SourceRange,
    /// Bit depth per component.
    pub bit_depth: u8,
}

/// Convert a timestamp in seconds to the nearest frame number.
pub fn timestamp_to_frame_number(timestamp: f64, frames_per_second: f64) -> i64 {
    (timestamp * frames_per_second).round() as i64
}

/// Convert a frame number to its timestamp in seconds.
pub fn frame_number_to_timestamp(frame_number: i64, frames_per_second: f64) -> f64 {
    if frames_per_second > 0.0 {
        frame_number as f64 / frames_per_second
    } else {
        0.0
    }
}

/// Convert a timestamp in seconds to a container seek timestamp in
/// AV_TIME_BASE units (microseconds).
///
/// Container-level seeking (`avformat_seek_file` with `stream_index = -1`)
/// expects AV_TIME_BASE, bypassing the stream time base entirely.
pub(crate) fn seconds_to_seek_timestamp(seconds: f64) -> i64 {
    (seconds * 1_000_000.0) as i64
}

/// Rescale a PTS value from a stream time base to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: ffmpeg_next::Rational) -> f64 {
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}
