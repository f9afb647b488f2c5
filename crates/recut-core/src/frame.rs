// crates/recut-core/src/frame.rs
//
// Types that flow between pipeline stages. No ffmpeg — just plain data, so
// the compositor and the stub collaborators in tests share one vocabulary
// with the real decoder/encoder/muxer.

use serde::{Deserialize, Serialize};

// ── Color space ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primaries {
    Bt709,
    Bt601,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transfer {
    /// sRGB (IEC 61966-2-1).
    Srgb,
    Bt709,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Matrix {
    Rgb,
    Bt709,
}

/// Color-space descriptor attached to every composited frame and to the codec
/// description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSpace {
    pub primaries:  Primaries,
    pub transfer:   Transfer,
    pub matrix:     Matrix,
    pub full_range: bool,
}

impl ColorSpace {
    /// The pipeline's fixed output convention: bt709 primaries, sRGB
    /// transfer, RGB matrix, full range. Not derived from the source clip.
    pub const fn output() -> Self {
        Self {
            primaries:  Primaries::Bt709,
            transfer:   Transfer::Srgb,
            matrix:     Matrix::Rgb,
            full_range: true,
        }
    }
}

// ── Source side ───────────────────────────────────────────────────────────────

/// Probed facts about the source clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub width:       u32,
    pub height:      u32,
    pub duration_us: u64,
}

/// One decoded source frame: packed RGBA at display resolution, bound to the
/// source timestamp it was captured for. Owns its pixels exclusively; the
/// stage that takes it releases it on its exit path.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub width:     u32,
    pub height:    u32,
    /// Packed RGBA, stride == width * 4.
    pub data:      Vec<u8>,
    pub src_ts_us: u64,
}

// ── Output side ───────────────────────────────────────────────────────────────

/// One composited output frame bound to its effective timestamp.
#[derive(Clone, Debug)]
pub struct CompositedFrame {
    pub width:       u32,
    pub height:      u32,
    /// Packed RGBA, stride == width * 4.
    pub data:        Vec<u8>,
    pub eff_ts_us:   u64,
    /// One frame period.
    pub duration_us: u64,
    pub color_space: ColorSpace,
}

/// Per-stream metadata the container needs to decode the bitstream. Captured
/// from the first coded chunk and shared by reference thereafter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecDescription {
    pub codec_id:         String,
    pub coded_w:          u32,
    pub coded_h:          u32,
    /// Opaque codec-private data (avcC for AVC-family streams).
    pub description_blob: Vec<u8>,
    pub color_space:      ColorSpace,
}

/// One coded sample leaving the encoder in presentation order.
#[derive(Clone, Debug)]
pub struct CodedChunk {
    pub data:        Vec<u8>,
    pub pts_us:      i64,
    pub duration_us: i64,
    pub is_key:      bool,
}
