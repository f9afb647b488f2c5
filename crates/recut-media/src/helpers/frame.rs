// crates/recut-media/src/helpers/frame.rs
//
// Shared frame plumbing for the FFmpeg-backed modules.

use std::sync::Once;

use ffmpeg_the_third as ffmpeg;

/// Initialize libav exactly once per process. Safe to call from every
/// entry point that touches FFmpeg.
pub fn ensure_ffmpeg() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            eprintln!("[media] ffmpeg init failed: {e}");
        }
    });
}

/// Copy the visible pixels of a packed frame plane into a tight buffer,
/// dropping the per-row stride padding libav allocates for alignment.
/// `bytes_per_px` is 4 for RGBA, 3 for RGB24.
pub fn destripe(
    frame:        &ffmpeg::util::frame::video::Video,
    width:        u32,
    height:       u32,
    bytes_per_px: usize,
) -> Vec<u8> {
    let stride = frame.stride(0);
    let raw    = frame.data(0);
    let row_bytes = width as usize * bytes_per_px;
    (0..height as usize)
        .flat_map(|row| {
            let s = row * stride;
            &raw[s..s + row_bytes]
        })
        .copied()
        .collect()
}
