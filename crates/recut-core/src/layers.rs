// crates/recut-core/src/layers.rs
//
// The declarative edit-layer model: everything the compositor draws besides
// the raw source pixels. Pure serde data keyed by source time — the pipeline
// passes an `EditLayers` through to the compositor verbatim and never
// interprets it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::helpers::easing::ease_in_out;

// ── Background ────────────────────────────────────────────────────────────────

/// Fill painted behind the video rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Background {
    Solid([u8; 4]),
    /// Vertical gradient from `top` to `bottom`.
    Gradient { top: [u8; 4], bottom: [u8; 4] },
}

impl Default for Background {
    fn default() -> Self {
        Background::Solid([18, 18, 22, 255])
    }
}

// ── Video styling ─────────────────────────────────────────────────────────────

/// Drop shadow painted under the video rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    /// Peak darkness at the video edge, 0.0–1.0.
    pub opacity: f32,
    /// Falloff distance in output pixels.
    pub radius:  f32,
}

/// Static crop window in source pixels. Applied before zoom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x:      u32,
    pub y:      u32,
    pub width:  u32,
    pub height: u32,
}

// ── Zoom ──────────────────────────────────────────────────────────────────────

/// Ease-in/ease-out ramp length at each end of a zoom region.
pub const ZOOM_RAMP_US: u64 = 500_000;

/// A time-keyed magnification window on the source timeline.
///
/// Scale ramps 1.0 → `scale` over the first `ZOOM_RAMP_US` of the region and
/// back down over the last; regions shorter than two ramps peak proportionally
/// lower. Focus is the magnification center in normalized crop coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoomRegion {
    pub start_us: u64,
    pub end_us:   u64,
    pub scale:    f32,
    pub focus_x:  f32,
    pub focus_y:  f32,
}

impl ZoomRegion {
    /// Magnification at `src_ts_us`: 1.0 outside the region, eased ramps at
    /// the edges, `scale` across the plateau.
    pub fn scale_at(&self, src_ts_us: u64) -> f32 {
        if src_ts_us < self.start_us || src_ts_us >= self.end_us {
            return 1.0;
        }
        let ramp = ZOOM_RAMP_US.min((self.end_us - self.start_us) / 2).max(1);
        let into = src_ts_us - self.start_us;
        let left = self.end_us - src_ts_us;

        let t = if into < ramp {
            ease_in_out(into as f32 / ramp as f32)
        } else if left < ramp {
            ease_in_out(left as f32 / ramp as f32)
        } else {
            1.0
        };
        1.0 + (self.scale - 1.0) * t
    }
}

// ── Annotations ───────────────────────────────────────────────────────────────

/// A rectangle outline drawn over the frame for a source-time window.
/// Geometry is normalized to the video rectangle (0.0–1.0 on both axes).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    /// x, y, width, height — normalized.
    pub rect:      [f32; 4],
    pub color:     [u8; 4],
    /// Outline thickness in output pixels.
    pub thickness: f32,
    pub start_us:  u64,
    pub end_us:    u64,
}

impl Annotation {
    pub fn active_at(&self, src_ts_us: u64) -> bool {
        src_ts_us >= self.start_us && src_ts_us < self.end_us
    }
}

// ── The full layer stack ──────────────────────────────────────────────────────

fn default_padding() -> f32 {
    0.0
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EditLayers {
    #[serde(default)]
    pub background: Background,

    /// Inset around the video as a fraction of the smaller output dimension.
    #[serde(default = "default_padding")]
    pub padding: f32,

    /// Corner rounding of the video rectangle in output pixels.
    #[serde(default)]
    pub corner_radius: f32,

    #[serde(default)]
    pub shadow: Option<Shadow>,

    #[serde(default)]
    pub crop: Option<CropRegion>,

    #[serde(default)]
    pub zooms: Vec<ZoomRegion>,

    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl EditLayers {
    /// Combined zoom state at a source instant: `(scale, focus_x, focus_y)`.
    ///
    /// Regions are authored non-overlapping; the first active one wins. With
    /// no active region the focus is the frame center at scale 1.0.
    pub fn zoom_at(&self, src_ts_us: u64) -> (f32, f32, f32) {
        for z in &self.zooms {
            if src_ts_us >= z.start_us && src_ts_us < z.end_us {
                return (z.scale_at(src_ts_us).max(1.0), z.focus_x, z.focus_y);
            }
        }
        (1.0, 0.5, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoom() -> ZoomRegion {
        ZoomRegion {
            start_us: 2_000_000,
            end_us:   5_000_000,
            scale:    2.0,
            focus_x:  0.25,
            focus_y:  0.25,
        }
    }

    #[test]
    fn scale_is_identity_outside_region() {
        let z = zoom();
        assert_eq!(z.scale_at(0), 1.0);
        assert_eq!(z.scale_at(1_999_999), 1.0);
        assert_eq!(z.scale_at(5_000_000), 1.0);
    }

    #[test]
    fn scale_reaches_plateau_between_ramps() {
        let z = zoom();
        assert!((z.scale_at(3_500_000) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn scale_ramps_at_edges() {
        let z = zoom();
        let quarter_in = z.scale_at(2_125_000); // 25% into the ramp
        assert!(quarter_in > 1.0 && quarter_in < 2.0);
        let near_end = z.scale_at(4_900_000);
        assert!(near_end > 1.0 && near_end < 2.0);
    }

    #[test]
    fn short_region_still_peaks_mid() {
        let z = ZoomRegion { start_us: 0, end_us: 400_000, ..zoom() };
        let mid = z.scale_at(200_000);
        assert!((mid - 2.0).abs() < 1e-3, "mid-region scale {mid}");
    }

    #[test]
    fn zoom_at_picks_first_active_region() {
        let layers = EditLayers {
            zooms: vec![
                ZoomRegion { start_us: 0, end_us: 1_000_000, ..zoom() },
                ZoomRegion { start_us: 1_000_000, end_us: 2_000_000, focus_x: 0.9, ..zoom() },
            ],
            ..EditLayers::default()
        };
        assert_eq!(layers.zoom_at(1_500_000).1, 0.9);
        assert_eq!(layers.zoom_at(3_000_000), (1.0, 0.5, 0.5));
    }

    #[test]
    fn annotation_window_is_half_open() {
        let a = Annotation {
            id:        Uuid::nil(),
            rect:      [0.1, 0.1, 0.3, 0.2],
            color:     [255, 64, 64, 255],
            thickness: 2.0,
            start_us:  1_000_000,
            end_us:    2_000_000,
        };
        assert!(!a.active_at(999_999));
        assert!(a.active_at(1_000_000));
        assert!(!a.active_at(2_000_000));
    }
}
