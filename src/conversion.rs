//! Format-aware color conversion strategy.
//!
//! [`ConversionStrategy`] is a pure decision derived once per media load from
//! the source's [`ColorMetadata`]: whether and how deeply to correct the
//! color matrix during pixel-format conversion, and which resampling
//! algorithm the scaler should use. It is immutable after derivation.
//!
//! The correction depth is deliberately asymmetric across pixel-format
//! families. Chroma-subsampled sources get range expansion only — their
//! colorimetry is already handled upstream, and forcing full coefficients
//! onto them shifts colors visibly. Full-resolution RGB/4:4:4 sources carry
//! colorimetric data that default scaler setup gets wrong, so they get the
//! full matrix. Unknown formats are passed through untouched rather than
//! corrected with a guess.

use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_sys_next::{
    SWS_CS_BT2020, SWS_CS_DEFAULT, SWS_CS_ITU601, SWS_CS_ITU709, sws_getCoefficients,
    sws_setColorspaceDetails,
};

use crate::config::PipelineMode;
use crate::metadata::{ColorMetadata, SourceColorspace, SourceRange};

/// How much color-matrix correction to apply during conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixMode {
    /// Pass through without matrix correction.
    None,
    /// Apply limited→full range expansion with identity coefficients.
    RangeOnly,
    /// Apply colorspace coefficients and range conversion.
    FullMatrix,
}

/// Pixel-format family, classified from the format name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFamily {
    /// 4:4:4 and RGB/RGBA-class formats (full chroma resolution).
    Rgb444,
    /// 4:2:2 / 4:2:0 chroma-subsampled formats.
    ChromaSubsampled,
    /// Anything not recognised.
    Unknown,
}

impl PixelFamily {
    /// Classify a pixel format by its FFmpeg name.
    pub fn classify(pixel_format_name: &str) -> Self {
        let name = pixel_format_name.to_ascii_lowercase();
        if name.starts_with("yuv444")
            || name.starts_with("yuva444")
            || name.starts_with("rgb")
            || name.starts_with("rgba")
            || name.starts_with("bgr")
            || name.starts_with("bgra")
            || name.starts_with("gbrp")
            || name.starts_with("gbrap")
        {
            PixelFamily::Rgb444
        } else if name.starts_with("yuv420")
            || name.starts_with("yuva420")
            || name.starts_with("yuv422")
            || name.starts_with("yuva422")
            || name.starts_with("yuvj420")
            || name.starts_with("yuvj422")
            || name.starts_with("nv12")
            || name.starts_with("nv21")
            || name.starts_with("p010")
            || name.starts_with("p016")
            || name.starts_with("yuyv")
            || name.starts_with("uyvy")
        {
            PixelFamily::ChromaSubsampled
        } else {
            PixelFamily::Unknown
        }
    }
}

/// Returns `true` when a pixel format cannot be converted correctly without
/// color metadata.
///
/// The 4:4:4/RGB family carries colorimetric data that the scaler gets wrong
/// by default; decoding such sources before metadata arrives would produce a
/// visibly wrong frame, so extraction is deferred instead.
pub fn requires_color_metadata(pixel_format_name: &str) -> bool {
    PixelFamily::classify(pixel_format_name) == PixelFamily::Rgb444
}

/// Resampling algorithm used by the software scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAlgorithm {
    /// Fast bilinear resampling, used for 8-bit pipelines.
    Bilinear,
    /// Bicubic resampling, used for wide pipelines where quality matters.
    Bicubic,
    /// Lanczos resampling, for offline-quality conversion.
    Lanczos,
}

impl ScaleAlgorithm {
    pub(crate) fn to_scaling_flags(self) -> ScalingFlags {
        match self {
            ScaleAlgorithm::Bilinear => ScalingFlags::BILINEAR,
            ScaleAlgorithm::Bicubic => ScalingFlags::BICUBIC,
            ScaleAlgorithm::Lanczos => ScalingFlags::LANCZOS,
        }
    }
}

/// The per-media color conversion decision.
///
/// Derived once from [`ColorMetadata`] via [`ConversionStrategy::from_metadata`];
/// immutable thereafter. Workers rebuild their scaler when the strategy
/// changes (which happens at most once per media load, when metadata
/// arrives).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionStrategy {
    /// Source colorspace.
    pub colorspace: SourceColorspace,
    /// Source sample range.
    pub range: SourceRange,
    /// Source bit depth per component.
    pub bit_depth: u8,
    /// Resampling algorithm for the scaler.
    pub algorithm: ScaleAlgorithm,
    /// Correction depth.
    pub matrix_mode: MatrixMode,
}

impl ConversionStrategy {
    /// Derive the strategy from source color metadata and the configured
    /// pipeline mode.
    pub fn from_metadata(metadata: &ColorMetadata, pipeline_mode: PipelineMode) -> Self {
        let family = PixelFamily::classify(&metadata.pixel_format_name);
        let matrix_mode = match family {
            PixelFamily::Unknown => MatrixMode::None,
            PixelFamily::ChromaSubsampled => MatrixMode::RangeOnly,
            PixelFamily::Rgb444 => MatrixMode::FullMatrix,
        };

        let algorithm = match pipeline_mode {
            PipelineMode::EightBit => ScaleAlgorithm::Bilinear,
            PipelineMode::SixteenBit | PipelineMode::SixteenBitFloat | PipelineMode::HdrFloat => {
                ScaleAlgorithm::Bicubic
            }
        };

        Self {
            colorspace: metadata.colorspace,
            range: metadata.range,
            bit_depth: metadata.bit_depth,
            algorithm,
            matrix_mode,
        }
    }

    /// A neutral strategy used before metadata arrives: no matrix
    /// correction, bilinear resampling.
    pub fn passthrough() -> Self {
        Self {
            colorspace: SourceColorspace::Unspecified,
            range: SourceRange::Unspecified,
            bit_depth: 8,
            algorithm: ScaleAlgorithm::Bilinear,
            matrix_mode: MatrixMode::None,
        }
    }
}

/// Map a source colorspace to the matching swscale coefficient table id.
fn sws_colorspace_constant(colorspace: SourceColorspace) -> i32 {
    match colorspace {
        SourceColorspace::Bt709 => SWS_CS_ITU709 as i32,
        SourceColorspace::Bt601 => SWS_CS_ITU601 as i32,
        SourceColorspace::Bt2020 => SWS_CS_BT2020 as i32,
        SourceColorspace::Unspecified => SWS_CS_DEFAULT as i32,
    }
}

/// Apply the strategy's colorspace/range details to a freshly-built scaler.
///
/// `MatrixMode::None` is a no-op. `RangeOnly` installs identity coefficient
/// tables with range expansion; `FullMatrix` installs the colorspace's
/// tables. swscale rejects colorspace details for some format pairs; that is
/// treated as pass-through, not an error.
pub(crate) fn apply_colorspace_details(scaler: &mut ScalingContext, strategy: &ConversionStrategy) {
    if strategy.matrix_mode == MatrixMode::None {
        return;
    }

    let source_table_id = match strategy.matrix_mode {
        MatrixMode::FullMatrix => sws_colorspace_constant(strategy.colorspace),
        _ => SWS_CS_DEFAULT as i32,
    };
    let source_full_range = match strategy.range {
        SourceRange::Full => 1,
        SourceRange::Limited | SourceRange::Unspecified => 0,
    };

    let result = unsafe {
        let source_coefficients = sws_getCoefficients(source_table_id);
        let destination_coefficients = sws_getCoefficients(SWS_CS_DEFAULT as i32);
        sws_setColorspaceDetails(
            scaler.as_mut_ptr(),
            source_coefficients,
            source_full_range,
            destination_coefficients,
            1,
            0,
            1 << 16,
            1 << 16,
        )
    };

    if result < 0 {
        log::debug!(
            "swscale rejected colorspace details for {:?}; converting without correction",
            strategy.matrix_mode
        );
    }
}
