//! Hardware-accelerated decoding with ordered fallback.
//!
//! Decoder setup walks a fixed fallback chain: the preferred accelerator,
//! then the platform's remaining accelerators, then software. Every failure
//! along the chain is logged and swallowed — hardware problems are never
//! surfaced to the caller, and cache initialization cannot fail because of
//! them. The path that finally succeeded is reported as a [`DecodePath`] so
//! callers can log or display it.

use std::fmt;

use ffmpeg_next::{
    codec::{Parameters, context::Context as CodecContext},
    decoder::Video as VideoDecoder,
    frame::Video as VideoFrame,
};
use ffmpeg_sys_next::{
    AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX, AVBufferRef, AVCodecContext, AVCodecHWConfig,
    AVHWDeviceType,
};

use crate::config::HardwarePreference;
use crate::error::CacheError;

/// Supported hardware device types for accelerated decoding.
///
/// Not all types are available on all platforms. Use
/// [`HardwarePreference::Auto`](crate::HardwarePreference) to walk the
/// platform's chain in its default order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareDeviceType {
    /// NVIDIA CUDA (Linux, Windows).
    Cuda,
    /// Video Acceleration API (Linux).
    Vaapi,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Apple VideoToolbox (macOS, iOS).
    VideoToolbox,
    /// Intel Quick Sync Video (cross-platform).
    Qsv,
}

impl HardwareDeviceType {
    /// Convert to the FFmpeg `AVHWDeviceType` constant.
    fn to_av_hw_device_type(self) -> AVHWDeviceType {
        match self {
            HardwareDeviceType::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HardwareDeviceType::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HardwareDeviceType::Dxva2 => AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HardwareDeviceType::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HardwareDeviceType::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            HardwareDeviceType::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
        }
    }

    /// Short lowercase name for logging.
    pub fn name(self) -> &'static str {
        match self {
            HardwareDeviceType::Cuda => "cuda",
            HardwareDeviceType::Vaapi => "vaapi",
            HardwareDeviceType::Dxva2 => "dxva2",
            HardwareDeviceType::D3d11va => "d3d11va",
            HardwareDeviceType::VideoToolbox => "videotoolbox",
            HardwareDeviceType::Qsv => "qsv",
        }
    }
}

/// Which decode path initialization ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    /// A hardware accelerator was set up successfully.
    Hardware(HardwareDeviceType),
    /// Software decoding (no accelerator available or all failed).
    Software,
}

impl fmt::Display for DecodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodePath::Hardware(device) => write!(f, "{} hardware decoder", device.name()),
            DecodePath::Software => write!(f, "software decoder"),
        }
    }
}

/// List all hardware device types supported by the FFmpeg build.
pub fn available_hardware_devices() -> Vec<HardwareDeviceType> {
    let mut devices = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;

    loop {
        device_type = unsafe { ffmpeg_sys_next::av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }

        let mapped = match device_type {
            AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA => Some(HardwareDeviceType::Cuda),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI => Some(HardwareDeviceType::Vaapi),
            AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2 => Some(HardwareDeviceType::Dxva2),
            AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA => Some(HardwareDeviceType::D3d11va),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX => Some(HardwareDeviceType::VideoToolbox),
            AVHWDeviceType::AV_HWDEVICE_TYPE_QSV => Some(HardwareDeviceType::Qsv),
            _ => None,
        };

        if let Some(device) = mapped {
            devices.push(device);
        }
    }

    devices
}

/// The platform's default accelerator order.
fn platform_chain() -> Vec<HardwareDeviceType> {
    if cfg!(target_os = "macos") {
        vec![HardwareDeviceType::VideoToolbox]
    } else if cfg!(target_os = "windows") {
        vec![
            HardwareDeviceType::Cuda,
            HardwareDeviceType::D3d11va,
            HardwareDeviceType::Dxva2,
            HardwareDeviceType::Qsv,
        ]
    } else {
        vec![
            HardwareDeviceType::Cuda,
            HardwareDeviceType::Vaapi,
            HardwareDeviceType::Qsv,
        ]
    }
}

/// Build the ordered fallback chain for a preference.
///
/// `Software` yields an empty chain (software only). `Prefer(device)` puts
/// the requested accelerator first, followed by the platform defaults.
pub fn fallback_chain(preference: HardwarePreference) -> Vec<HardwareDeviceType> {
    match preference {
        HardwarePreference::Software => Vec::new(),
        HardwarePreference::Auto => platform_chain(),
        HardwarePreference::Prefer(device) => {
            let mut chain = vec![device];
            for candidate in platform_chain() {
                if candidate != device {
                    chain.push(candidate);
                }
            }
            chain
        }
    }
}

/// Create a video decoder, walking the hardware fallback chain.
///
/// Each accelerator in the chain is tried in order; setup failures are
/// logged at debug level and the next candidate is attempted. Software
/// decoding is the unconditional last resort, so this only fails when the
/// codec parameters themselves are unusable.
pub(crate) fn open_decoder_with_fallback(
    parameters: &Parameters,
    preference: HardwarePreference,
) -> Result<(VideoDecoder, DecodePath), CacheError> {
    for device in fallback_chain(preference) {
        match try_hardware_decoder(parameters.clone(), device) {
            Ok(decoder) => {
                log::info!("Decoding on {} hardware path", device.name());
                return Ok((decoder, DecodePath::Hardware(device)));
            }
            Err(error) => {
                log::debug!("{} setup failed, trying next: {error}", device.name());
            }
        }
    }

    let decoder = CodecContext::from_parameters(parameters.clone())?
        .decoder()
        .video()?;
    log::info!("Decoding on software path");
    Ok((decoder, DecodePath::Software))
}

/// Attempt to set up one specific hardware decoder.
fn try_hardware_decoder(
    parameters: Parameters,
    device: HardwareDeviceType,
) -> Result<VideoDecoder, CacheError> {
    let codec_context = CodecContext::from_parameters(parameters)?;
    let av_device_type = device.to_av_hw_device_type();

    if !codec_supports_hardware_type(&codec_context, av_device_type) {
        return Err(CacheError::DecodeError(format!(
            "codec has no {} hw config",
            device.name()
        )));
    }

    let hardware_device_context = create_hardware_device_context(av_device_type)?;

    // Attach the device context, then drop our reference (the decoder holds
    // its own after creation).
    unsafe {
        let context_pointer = codec_context.as_ptr() as *mut AVCodecContext;
        (*context_pointer).hw_device_ctx = ffmpeg_sys_next::av_buffer_ref(hardware_device_context);
    }
    let decoder = codec_context.decoder().video();
    unsafe {
        let mut hardware_reference = hardware_device_context;
        ffmpeg_sys_next::av_buffer_unref(&mut hardware_reference);
    }

    decoder.map_err(CacheError::from)
}

/// Transfer a hardware frame to system memory.
///
/// Fails when the frame is not an HW surface; the caller then uses the
/// original frame directly.
pub(crate) fn transfer_hardware_frame(
    hardware_frame: &VideoFrame,
) -> Result<VideoFrame, CacheError> {
    let mut software_frame = VideoFrame::empty();

    let result = unsafe {
        ffmpeg_sys_next::av_hwframe_transfer_data(
            software_frame.as_mut_ptr(),
            hardware_frame.as_ptr(),
            0,
        )
    };

    if result < 0 {
        Err(CacheError::DecodeError(format!(
            "Hardware frame transfer failed (result={result})"
        )))
    } else {
        unsafe {
            (*software_frame.as_mut_ptr()).pts = (*hardware_frame.as_ptr()).pts;
            (*software_frame.as_mut_ptr()).pkt_dts = (*hardware_frame.as_ptr()).pkt_dts;
        }
        Ok(software_frame)
    }
}

/// Check whether a codec supports a specific hardware device type.
fn codec_supports_hardware_type(codec_context: &CodecContext, device_type: AVHWDeviceType) -> bool {
    let codec_ptr = unsafe { (*codec_context.as_ptr()).codec };
    if codec_ptr.is_null() {
        return false;
    }

    let mut index: i32 = 0;

    loop {
        let config: *const AVCodecHWConfig =
            unsafe { ffmpeg_sys_next::avcodec_get_hw_config(codec_ptr, index) };
        if config.is_null() {
            break;
        }

        let methods = unsafe { (*config).methods };
        let queried_device_type = unsafe { (*config).device_type };
        if methods & (AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32) != 0
            && queried_device_type == device_type
        {
            return true;
        }

        index += 1;
    }

    false
}

/// Create an FFmpeg hardware device context.
///
/// Returns a raw `AVBufferRef*` that must be freed with `av_buffer_unref`.
fn create_hardware_device_context(
    device_type: AVHWDeviceType,
) -> Result<*mut AVBufferRef, CacheError> {
    let mut hardware_device_context: *mut AVBufferRef = std::ptr::null_mut();

    let result = unsafe {
        ffmpeg_sys_next::av_hwdevice_ctx_create(
            &mut hardware_device_context,
            device_type,
            std::ptr::null(),
            std::ptr::null_mut(),
            0,
        )
    };

    if result < 0 {
        Err(CacheError::DecodeError(format!(
            "Failed to create hardware device context (result={result})"
        )))
    } else {
        Ok(hardware_device_context)
    }
}
