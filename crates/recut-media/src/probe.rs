// crates/recut-media/src/probe.rs
//
// In-process FFmpeg probing: source dimensions and duration.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type;

use recut_core::{ExportError, SourceInfo};

use crate::helpers::frame::ensure_ffmpeg;

/// Probe the facts the pipeline needs before it can size anything:
/// display dimensions and duration in microseconds.
///
/// Duration prefers the container value (already in `AV_TIME_BASE` = µs)
/// and falls back to the video stream's own duration scaled by its time
/// base. A source with no usable duration cannot be exported.
pub fn probe_source(path: &Path) -> Result<SourceInfo, ExportError> {
    ensure_ffmpeg();

    let ictx = ffmpeg::format::input(&path)
        .map_err(|e| ExportError::SourceUnavailable(format!("{}: {e}", path.display())))?;

    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| {
            ExportError::UnsupportedFormat(format!("no video stream in {}", path.display()))
        })?;

    // AVCodecParameters width/height are the *display* dimensions. The
    // decoder context reports *coded* dimensions, which H.264 pads to the
    // macroblock grid (1920×1088 for a 1080p clip) — wrong for layout.
    let (width, height) = unsafe {
        let p = stream.parameters().as_ptr();
        ((*p).width as u32, (*p).height as u32)
    };
    if width == 0 || height == 0 {
        return Err(ExportError::UnsupportedFormat(format!(
            "video stream in {} has no dimensions",
            path.display()
        )));
    }

    // Confirm a decoder exists before the pipeline commits to the export.
    ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| {
            ExportError::UnsupportedFormat(format!("no decoder for {}: {e}", path.display()))
        })?;

    let duration_us = container_duration_us(&ictx)
        .or_else(|| stream_duration_us(&stream))
        .ok_or_else(|| {
            ExportError::UnsupportedFormat(format!("duration unknown for {}", path.display()))
        })?;

    eprintln!(
        "[probe] {}x{} {:.2}s ← {}",
        width,
        height,
        duration_us as f64 / 1e6,
        path.display()
    );

    Ok(SourceInfo { width, height, duration_us })
}

fn container_duration_us(ictx: &ffmpeg::format::context::Input) -> Option<u64> {
    let d = ictx.duration();
    (d > 0).then_some(d as u64)
}

fn stream_duration_us(stream: &ffmpeg::format::stream::Stream) -> Option<u64> {
    let tb = stream.time_base();
    let d  = stream.duration();
    if d <= 0 || tb.denominator() <= 0 {
        return None;
    }
    let us = d as i128 * tb.numerator() as i128 * 1_000_000 / tb.denominator() as i128;
    (us > 0).then_some(us as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_source_unavailable() {
        let err = probe_source(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(matches!(err, ExportError::SourceUnavailable(_)));
    }
}
