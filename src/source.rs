//! Media source access: the decoder/demuxer collaborator boundary.
//!
//! The cache talks to decoders through the [`FrameDecoder`] and
//! [`DecoderFactory`] traits so that the coordination logic (batching,
//! priorities, eviction) never couples to FFmpeg directly — any conforming
//! decoder is acceptable, and tests drive the machinery with a synthetic
//! one.
//!
//! [`MediaSource`] is the FFmpeg implementation: it opens the container,
//! selects the best video stream, walks the hardware fallback chain, and
//! serves "seek then decode forward to the nearest matching frame" requests,
//! converting each decoded frame to the configured output format. FFmpeg
//! contexts are not `Send`, so every worker opens its own source through the
//! factory instead of sharing one.

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Rational,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::Context as ScalingContext,
};

use crate::config::{CacheConfig, PipelineMode};
use crate::conversion::{self, ConversionStrategy};
use crate::error::CacheError;
use crate::hardware::{self, DecodePath};
use crate::metadata::{self, StreamInfo};

/// A decoded frame is accepted when its timestamp falls within this many
/// nominal frame durations of the request. Inherited from observed container
/// seek imprecision; treated as a tunable boundary, not an exact contract.
pub const MATCH_TOLERANCE_FRAMES: f64 = 1.0;

/// In a sequential batch, decoding forward is cheaper than seeking as long
/// as the target is at most this many frames ahead of the current position.
const SEQUENTIAL_SEEK_SKIP_FRAMES: i64 = 16;

/// Raw converted pixels produced by a decoder.
///
/// Byte buffers are tightly packed in the pipeline's scaler format; float
/// buffers are RGBA `f32` quadruplets (wide pipelines).
#[derive(Debug, Clone)]
pub enum PixelData {
    /// Packed integer pixels (RGBA8 or RGBA16).
    Bytes(Vec<u8>),
    /// Packed float pixels (RGBA `f32`).
    Floats(Vec<f32>),
}

impl PixelData {
    /// Size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            PixelData::Bytes(bytes) => bytes.len(),
            PixelData::Floats(floats) => floats.len() * std::mem::size_of::<f32>(),
        }
    }

    /// View the buffer as raw bytes for GPU upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelData::Bytes(bytes) => bytes.as_slice(),
            PixelData::Floats(floats) => unsafe {
                std::slice::from_raw_parts(
                    floats.as_ptr() as *const u8,
                    floats.len() * std::mem::size_of::<f32>(),
                )
            },
        }
    }

    /// Returns `true` when the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }
}

/// A decoded, format-converted frame.
#[derive(Debug, Clone)]
pub struct DecodedPixels {
    /// Frame number of the decoded frame (may differ slightly from the
    /// request when the container seeks imprecisely).
    pub frame_number: i64,
    /// Presentation timestamp of the decoded frame, in seconds.
    pub timestamp: f64,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Converted pixel buffer.
    pub data: PixelData,
}

/// An open decode context serving one worker thread.
///
/// Implementations are not required to be `Send`: each worker opens its own
/// decoder via [`DecoderFactory::open`] and keeps it on that thread.
pub trait FrameDecoder {
    /// Metadata for the selected video stream.
    fn stream_info(&self) -> &StreamInfo;

    /// Install (or clear) the conversion strategy. Implementations rebuild
    /// their conversion state lazily when it changes.
    fn set_conversion(&mut self, strategy: Option<ConversionStrategy>);

    /// Seek near `timestamp` and decode forward until a frame within the
    /// match tolerance is found, returning its converted pixels.
    ///
    /// `sequential_hint` signals that this request follows the previous one
    /// at roughly frame stride, allowing the implementation to skip the
    /// seek.
    fn decode_at(
        &mut self,
        timestamp: f64,
        sequential_hint: bool,
    ) -> Result<DecodedPixels, CacheError>;
}

/// Opens independent decode contexts for worker threads.
pub trait DecoderFactory: Send + Sync {
    /// Open a fresh decode context.
    fn open(&self) -> Result<Box<dyn FrameDecoder>, CacheError>;

    /// Stream metadata probed at factory construction.
    fn stream_info(&self) -> StreamInfo;

    /// Which decode path (hardware/software) the probe ended up on.
    fn decode_path(&self) -> DecodePath;

    /// Whether this source's pixel format needs color metadata before it can
    /// be converted correctly. Extraction is deferred until a strategy
    /// arrives when this is `true`.
    fn requires_color_metadata(&self) -> bool;
}

struct ScalerState {
    context: ScalingContext,
    source_format: Pixel,
    source_width: u32,
    source_height: u32,
}

/// FFmpeg-backed implementation of [`FrameDecoder`].
pub struct MediaSource {
    input: Input,
    stream_index: usize,
    time_base: Rational,
    decoder: VideoDecoder,
    decode_path: DecodePath,
    info: StreamInfo,
    pipeline_mode: PipelineMode,
    output_width: u32,
    output_height: u32,
    strategy: Option<ConversionStrategy>,
    scaler: Option<ScalerState>,
    /// Frame number the decoder will produce next, when known (used to skip
    /// redundant seeks inside sequential batches).
    position: Option<i64>,
}

impl MediaSource {
    /// Open a media file and set up its decode context.
    ///
    /// Attempts hardware decoders in the configured fallback order and logs
    /// the path that succeeded. Hardware failures are non-fatal.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::SourceOpen`] if the container cannot be opened
    /// and [`CacheError::NoVideoStream`] if it has no video stream.
    pub fn open<P: AsRef<Path>>(path: P, config: &CacheConfig) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let canonical_path = path.to_path_buf();

        // Initialise ffmpeg (safe to call multiple times).
        ffmpeg_next::init().map_err(|error| CacheError::SourceOpen {
            path: canonical_path.clone(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let input = ffmpeg_next::format::input(&path).map_err(|error| CacheError::SourceOpen {
            path: canonical_path.clone(),
            reason: error.to_string(),
        })?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(CacheError::NoVideoStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let parameters = stream.parameters();

        // Frame rate: prefer the average rate, fall back to the raw rate.
        let frame_rate = stream.avg_frame_rate();
        let frames_per_second = if frame_rate.denominator() != 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            let rate = stream.rate();
            if rate.denominator() != 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            }
        };

        let duration_microseconds = input.duration();
        let duration_seconds = if duration_microseconds > 0 {
            duration_microseconds as f64 / 1_000_000.0
        } else {
            0.0
        };

        let frame_count = if frames_per_second > 0.0 {
            (duration_seconds * frames_per_second) as i64
        } else {
            0
        };

        let (decoder, decode_path) =
            hardware::open_decoder_with_fallback(&parameters, config.hardware_preference)?;

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let pixel_format_name = decoder
            .format()
            .descriptor()
            .map(|descriptor| descriptor.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let source_width = decoder.width();
        let source_height = decoder.height();
        let (output_width, output_height) = config.resolve_dimensions(source_width, source_height);

        let info = StreamInfo {
            width: source_width,
            height: source_height,
            frames_per_second,
            frame_count,
            duration_seconds,
            codec,
            pixel_format_name,
        };

        log::debug!(
            "Opened {} ({}x{} @ {:.3} fps, {} frames, {})",
            canonical_path.display(),
            info.width,
            info.height,
            info.frames_per_second,
            info.frame_count,
            decode_path,
        );

        Ok(Self {
            input,
            stream_index,
            time_base,
            decoder,
            decode_path,
            info,
            pipeline_mode: config.pipeline_mode,
            output_width,
            output_height,
            strategy: None,
            scaler: None,
            position: None,
        })
    }

    /// Which decode path (hardware/software) setup ended up on.
    pub fn decode_path(&self) -> DecodePath {
        self.decode_path
    }

    fn seek_to(&mut self, timestamp: f64) -> Result<(), CacheError> {
        let seek_timestamp = metadata::seconds_to_seek_timestamp(timestamp.max(0.0));
        self.input
            .seek(seek_timestamp, ..seek_timestamp)
            .map_err(|error| CacheError::SeekError {
                timestamp,
                reason: error.to_string(),
            })?;
        self.decoder.flush();
        self.position = None;
        Ok(())
    }
}

impl FrameDecoder for MediaSource {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn set_conversion(&mut self, strategy: Option<ConversionStrategy>) {
        if self.strategy != strategy {
            self.strategy = strategy;
            // Rebuilt lazily with the new colorspace details.
            self.scaler = None;
        }
    }

    fn decode_at(
        &mut self,
        timestamp: f64,
        sequential_hint: bool,
    ) -> Result<DecodedPixels, CacheError> {
        let fps = self.info.frames_per_second;
        if fps <= 0.0 {
            return Err(CacheError::DecodeError(
                "Source has no usable frame rate".to_string(),
            ));
        }

        let target_frame = metadata::timestamp_to_frame_number(timestamp, fps);
        if self.info.frame_count > 0 && target_frame >= self.info.frame_count {
            return Err(CacheError::FrameOutOfRange {
                frame_number: target_frame,
                total_frames: self.info.frame_count,
            });
        }

        let tolerance = MATCH_TOLERANCE_FRAMES / fps;

        // Inside a sequential batch the decoder is usually sitting just
        // before the next target; decoding forward beats a container seek.
        let can_continue = sequential_hint
            && self.position.is_some_and(|next| {
                target_frame >= next && target_frame - next <= SEQUENTIAL_SEEK_SKIP_FRAMES
            });
        if !can_continue {
            self.seek_to(timestamp)?;
        }

        let strategy = self
            .strategy
            .unwrap_or_else(ConversionStrategy::passthrough);
        let output = OutputSpec {
            pixel: self.pipeline_mode.scaler_pixel(),
            width: self.output_width,
            height: self.output_height,
            pipeline_mode: self.pipeline_mode,
        };

        let mut decoded_frame = VideoFrame::empty();
        let hardware = matches!(self.decode_path, DecodePath::Hardware(_));

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }

            self.decoder.send_packet(&packet)?;

            while self.decoder.receive_frame(&mut decoded_frame).is_ok() {
                let pts = decoded_frame.pts().unwrap_or(0);
                let frame_seconds = metadata::pts_to_seconds(pts, self.time_base);
                let frame_number = metadata::timestamp_to_frame_number(frame_seconds, fps);
                self.position = Some(frame_number + 1);

                // Still before the target; keep decoding forward. Anything
                // at or after `timestamp - tolerance` counts as a match,
                // which tolerates imprecise container seeking.
                if frame_seconds + tolerance < timestamp {
                    continue;
                }

                let pixels =
                    convert_frame(&mut self.scaler, &decoded_frame, hardware, &strategy, &output)?;
                return Ok(DecodedPixels {
                    frame_number,
                    timestamp: frame_seconds,
                    width: output.width,
                    height: output.height,
                    data: pixels,
                });
            }
        }

        // Flush the decoder for frames buffered near EOF.
        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded_frame).is_ok() {
            let pts = decoded_frame.pts().unwrap_or(0);
            let frame_seconds = metadata::pts_to_seconds(pts, self.time_base);
            let frame_number = metadata::timestamp_to_frame_number(frame_seconds, fps);
            self.position = Some(frame_number + 1);

            if frame_seconds + tolerance < timestamp {
                continue;
            }

            let pixels =
                convert_frame(&mut self.scaler, &decoded_frame, hardware, &strategy, &output)?;
            return Ok(DecodedPixels {
                frame_number,
                timestamp: frame_seconds,
                width: output.width,
                height: output.height,
                data: pixels,
            });
        }

        self.position = None;
        Err(CacheError::DecodeError(format!(
            "No frame found within tolerance of {timestamp:.3}s"
        )))
    }
}

#[derive(Clone, Copy)]
struct OutputSpec {
    pixel: Pixel,
    width: u32,
    height: u32,
    pipeline_mode: PipelineMode,
}

/// Scale a decoded frame into the output format and pack it tightly.
///
/// Hardware frames are transferred to system memory first; when the
/// transfer fails the frame is assumed to already be a software frame.
fn convert_frame(
    scaler_slot: &mut Option<ScalerState>,
    decoded_frame: &VideoFrame,
    hardware: bool,
    strategy: &ConversionStrategy,
    output: &OutputSpec,
) -> Result<PixelData, CacheError> {
    let transferred;
    let source_frame: &VideoFrame = if hardware {
        match hardware::transfer_hardware_frame(decoded_frame) {
            Ok(frame) => {
                transferred = frame;
                &transferred
            }
            Err(_) => decoded_frame,
        }
    } else {
        decoded_frame
    };

    let source_format = source_frame.format();
    let source_width = source_frame.width();
    let source_height = source_frame.height();

    let rebuild = !scaler_slot.as_ref().is_some_and(|state| {
        state.source_format == source_format
            && state.source_width == source_width
            && state.source_height == source_height
    });
    if rebuild {
        let mut context = ScalingContext::get(
            source_format,
            source_width,
            source_height,
            output.pixel,
            output.width,
            output.height,
            strategy.algorithm.to_scaling_flags(),
        )
        .map_err(|error| CacheError::ScalerError(error.to_string()))?;
        conversion::apply_colorspace_details(&mut context, strategy);
        *scaler_slot = Some(ScalerState {
            context,
            source_format,
            source_width,
            source_height,
        });
    }

    let state = scaler_slot
        .as_mut()
        .ok_or_else(|| CacheError::ScalerError("Scaler unavailable".to_string()))?;

    let mut converted = VideoFrame::empty();
    state
        .context
        .run(source_frame, &mut converted)
        .map_err(|error| CacheError::ScalerError(error.to_string()))?;

    let bytes_per_pixel = match output.pixel {
        Pixel::RGBA => 4,
        _ => 8,
    };
    let packed = pack_frame(&converted, output.width, output.height, bytes_per_pixel);

    if output.pipeline_mode.widens_to_float() {
        Ok(PixelData::Floats(widen_to_f32(&packed)))
    } else {
        Ok(PixelData::Bytes(packed))
    }
}

/// Copy pixel data from a converted frame into a tightly-packed buffer,
/// dropping any per-row padding the scaler added.
fn pack_frame(frame: &VideoFrame, width: u32, height: u32, bytes_per_pixel: usize) -> Vec<u8> {
    let stride = frame.stride(0);
    let expected_stride = (width as usize) * bytes_per_pixel;
    let data = frame.data(0);

    if stride == expected_stride {
        data[..expected_stride * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(expected_stride * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + expected_stride]);
        }
        buffer
    }
}

/// Widen packed little-endian RGBA16 samples to normalised `f32`.
fn widen_to_f32(packed: &[u8]) -> Vec<f32> {
    let mut floats = Vec::with_capacity(packed.len() / 2);
    for sample in packed.chunks_exact(2) {
        let value = u16::from_le_bytes([sample[0], sample[1]]);
        floats.push(value as f32 / u16::MAX as f32);
    }
    floats
}

/// Opens [`MediaSource`] contexts for worker threads.
///
/// The factory probes the source once at construction (stream metadata and
/// the hardware decode path); each [`open`](DecoderFactory::open) call then
/// yields an independent decode context, so workers share no mutable state.
pub struct MediaSourceFactory {
    path: PathBuf,
    config: CacheConfig,
    info: StreamInfo,
    decode_path: DecodePath,
    requires_metadata: bool,
}

impl MediaSourceFactory {
    /// Probe a media file and build a factory for it.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or has no video stream; hardware
    /// setup failures are recovered internally and never surface here.
    pub fn new<P: AsRef<Path>>(path: P, config: CacheConfig) -> Result<Self, CacheError> {
        let probe = MediaSource::open(&path, &config)?;
        let info = probe.info.clone();
        let decode_path = probe.decode_path;
        let requires_metadata = conversion::requires_color_metadata(&info.pixel_format_name);

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            config,
            info,
            decode_path,
            requires_metadata,
        })
    }

    /// The media path this factory opens.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DecoderFactory for MediaSourceFactory {
    fn open(&self) -> Result<Box<dyn FrameDecoder>, CacheError> {
        Ok(Box::new(MediaSource::open(&self.path, &self.config)?))
    }

    fn stream_info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn decode_path(&self) -> DecodePath {
        self.decode_path
    }

    fn requires_color_metadata(&self) -> bool {
        self.requires_metadata
    }
}
