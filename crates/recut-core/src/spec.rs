// crates/recut-core/src/spec.rs
//
// ExportSpec: the complete, immutable description of one export job.
// Pure serde data — no ffmpeg, no I/O — so an edit description round-trips
// through JSON unchanged.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::layers::EditLayers;
use crate::time::TrimSet;

// ── Frame rate ────────────────────────────────────────────────────────────────

/// Output frame rate as an exact rational (`num/den` frames per second).
///
/// The pipeline stamps timestamps with the single rounded integer period
/// (`period_us`), while frame-count math stays on the rational so common
/// rates like 30 fps don't grow a phantom final frame from rounding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Integer rate shorthand: `FrameRate::fps(30)` = 30/1.
    pub fn fps(fps: u32) -> Self {
        Self { num: fps, den: 1 }
    }

    /// One frame period in integer microseconds, rounded to nearest.
    /// 30 fps → 33_333, 25 fps → 40_000, 30000/1001 → 33_367.
    pub fn period_us(&self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        let num = self.num as u64;
        (1_000_000 * self.den as u64 + num / 2) / num
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

// ── Export spec ───────────────────────────────────────────────────────────────

fn default_codec_id() -> String {
    "avc1.640033".into()
}

fn default_bitrate() -> u64 {
    8_000_000
}

/// Everything needed to run one export. Immutable once the export begins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportSpec {
    /// Output dimensions. Must be even — the encoder's 4:2:0 subsampling
    /// halves both axes.
    pub width:  u32,
    pub height: u32,

    pub frame_rate: FrameRate,

    /// Target bitrate, variable-bitrate mode.
    #[serde(default = "default_bitrate")]
    pub bitrate_bps: u64,

    /// Opaque codec identifier. The encoder resolves the family; the muxer
    /// picks the container from it.
    #[serde(default = "default_codec_id")]
    pub codec_id: String,

    pub source_uri: PathBuf,

    #[serde(default)]
    pub trims: TrimSet,

    /// Editorial payload handed verbatim to the compositor.
    #[serde(default)]
    pub layers: EditLayers,
}

impl ExportSpec {
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::InvalidSpec(format!(
                "output dimensions {}x{} must be positive",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ExportError::InvalidSpec(format!(
                "output dimensions {}x{} must be even",
                self.width, self.height
            )));
        }
        if !self.frame_rate.is_valid() {
            return Err(ExportError::InvalidSpec(format!(
                "frame rate {}/{} must be positive",
                self.frame_rate.num, self.frame_rate.den
            )));
        }
        for iv in &self.trims.intervals {
            if !iv.is_valid() {
                return Err(ExportError::InvalidSpec(format!(
                    "trim [{}, {}) is inverted or empty",
                    iv.start_us, iv.end_us
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeInterval;

    fn base_spec() -> ExportSpec {
        ExportSpec {
            width:       1280,
            height:      720,
            frame_rate:  FrameRate::fps(30),
            bitrate_bps: default_bitrate(),
            codec_id:    default_codec_id(),
            source_uri:  PathBuf::from("clip.mp4"),
            trims:       TrimSet::default(),
            layers:      EditLayers::default(),
        }
    }

    #[test]
    fn period_rounding() {
        assert_eq!(FrameRate::fps(30).period_us(), 33_333);
        assert_eq!(FrameRate::fps(25).period_us(), 40_000);
        assert_eq!(FrameRate::fps(60).period_us(), 16_667);
        assert_eq!(FrameRate::new(30_000, 1_001).period_us(), 33_367);
    }

    #[test]
    fn valid_spec_passes() {
        assert!(base_spec().validate().is_ok());
    }

    #[test]
    fn odd_dimensions_rejected() {
        let mut spec = base_spec();
        spec.width = 1279;
        assert!(matches!(spec.validate(), Err(ExportError::InvalidSpec(_))));
    }

    #[test]
    fn zero_framerate_rejected() {
        let mut spec = base_spec();
        spec.frame_rate = FrameRate::new(0, 1);
        assert!(matches!(spec.validate(), Err(ExportError::InvalidSpec(_))));
    }

    #[test]
    fn inverted_trim_rejected() {
        let mut spec = base_spec();
        spec.trims = TrimSet::new(vec![TimeInterval::new(2_000_000, 1_000_000)]);
        assert!(matches!(spec.validate(), Err(ExportError::InvalidSpec(_))));
    }

    #[test]
    fn json_round_trip_with_defaults() {
        let json = r#"{
            "width": 1920, "height": 1080,
            "frame_rate": { "num": 30, "den": 1 },
            "source_uri": "recording.mp4"
        }"#;
        let spec: ExportSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.codec_id, "avc1.640033");
        assert_eq!(spec.bitrate_bps, 8_000_000);
        assert!(spec.trims.is_empty());

        let back: ExportSpec = serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();
        assert_eq!(back.width, 1920);
        assert_eq!(back.frame_rate, FrameRate::fps(30));
    }
}
