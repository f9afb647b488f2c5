// crates/recut-core/src/compositor.rs
//
// Software frame compositor: consumes one decoded source frame plus the
// source timestamp that identifies it, renders one styled output frame into
// the single internal RGBA target.
//
// Draw order per pixel: background fill → drop shadow → source sampled
// through crop + animated zoom into the (optionally rounded) video rectangle.
// Annotations active at the timestamp are stroked on top afterward.
//
// The compositor is deterministic: identical frame, timestamp, and layer
// stack yield a pixel-identical target. It carries no state between calls
// beyond the target buffer itself, which every `render` fully overwrites.

use rayon::prelude::*;

use crate::error::ExportError;
use crate::frame::DecodedFrame;
use crate::helpers::pixel::{blend_rgba, sample_bilinear};
use crate::layers::{Background, CropRegion, EditLayers};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub out_w: u32,
    pub out_h: u32,
    /// Source display dimensions, as probed from the clip.
    pub src_w: u32,
    pub src_h: u32,
    pub layers: EditLayers,
}

/// Output-space rectangle the video lands in, in pixel-center coordinates.
#[derive(Clone, Copy, Debug)]
struct VideoRect {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl VideoRect {
    fn w(&self) -> f32 {
        self.x1 - self.x0
    }

    fn h(&self) -> f32 {
        self.y1 - self.y0
    }
}

// ── Compositor ────────────────────────────────────────────────────────────────

pub struct FrameCompositor {
    cfg:        RenderConfig,
    crop:       CropRegion,
    video_rect: VideoRect,
    target:     Vec<u8>,
}

impl FrameCompositor {
    pub fn new(cfg: RenderConfig) -> Result<Self, ExportError> {
        if cfg.out_w == 0 || cfg.out_h == 0 {
            return Err(ExportError::CompositorInit(format!(
                "output dimensions {}x{} must be positive",
                cfg.out_w, cfg.out_h
            )));
        }
        if cfg.src_w == 0 || cfg.src_h == 0 {
            return Err(ExportError::CompositorInit(format!(
                "source dimensions {}x{} must be positive",
                cfg.src_w, cfg.src_h
            )));
        }

        let crop = match cfg.layers.crop {
            Some(c) => {
                let fits = c.width > 0
                    && c.height > 0
                    && c.x.checked_add(c.width).is_some_and(|r| r <= cfg.src_w)
                    && c.y.checked_add(c.height).is_some_and(|b| b <= cfg.src_h);
                if !fits {
                    return Err(ExportError::CompositorInit(format!(
                        "crop {}x{}+{}+{} exceeds source {}x{}",
                        c.width, c.height, c.x, c.y, cfg.src_w, cfg.src_h
                    )));
                }
                c
            }
            None => CropRegion { x: 0, y: 0, width: cfg.src_w, height: cfg.src_h },
        };

        let video_rect = fit_video_rect(&cfg, &crop);
        let target = vec![0u8; cfg.out_w as usize * cfg.out_h as usize * 4];

        Ok(Self { cfg, crop, video_rect, target })
    }

    /// Render one output frame. `src_ts_us` keys the time-animated layers
    /// (zoom ramps, annotation windows); frame ownership stays with the
    /// caller, who releases it after this returns.
    pub fn render(&mut self, frame: &DecodedFrame, src_ts_us: u64) -> Result<(), ExportError> {
        if frame.width != self.cfg.src_w || frame.height != self.cfg.src_h {
            return Err(ExportError::RenderFailed(format!(
                "frame {}x{} does not match configured source {}x{}",
                frame.width, frame.height, self.cfg.src_w, self.cfg.src_h
            )));
        }
        if frame.data.len() != frame.width as usize * frame.height as usize * 4 {
            return Err(ExportError::RenderFailed(format!(
                "frame buffer holds {} bytes, expected {}",
                frame.data.len(),
                frame.width as usize * frame.height as usize * 4
            )));
        }

        let out_w = self.cfg.out_w;
        let out_h = self.cfg.out_h;
        let rect = self.video_rect;
        let crop = self.crop;
        let layers = &self.cfg.layers;
        let (zoom, focus_x, focus_y) = layers.zoom_at(src_ts_us);
        let radius = layers
            .corner_radius
            .clamp(0.0, rect.w().min(rect.h()) / 2.0);
        let src = frame.data.as_slice();

        self.target
            .par_chunks_exact_mut(out_w as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let py = y as f32 + 0.5;
                for x in 0..out_w as usize {
                    let px = x as f32 + 0.5;
                    let rgba = if inside_rounded(&rect, radius, px, py) {
                        // Normalized position inside the video rect, pulled
                        // toward the focus point by the current zoom.
                        let u = (px - rect.x0) / rect.w();
                        let v = (py - rect.y0) / rect.h();
                        let nx = (focus_x + (u - focus_x) / zoom).clamp(0.0, 1.0);
                        let ny = (focus_y + (v - focus_y) / zoom).clamp(0.0, 1.0);
                        let sx = crop.x as f32 + nx * (crop.width - 1) as f32;
                        let sy = crop.y as f32 + ny * (crop.height - 1) as f32;
                        sample_bilinear(src, frame.width, frame.height, sx, sy)
                    } else {
                        let bg = background_at(&layers.background, py, out_h);
                        shade(bg, layers, &rect, px, py)
                    };
                    row[x * 4..x * 4 + 4].copy_from_slice(&rgba);
                }
            });

        self.draw_annotations(src_ts_us);
        Ok(())
    }

    /// Borrow the current target (packed RGBA, `out_w * out_h * 4`). Valid
    /// until the next `render` overwrites it.
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    pub fn out_width(&self) -> u32 {
        self.cfg.out_w
    }

    pub fn out_height(&self) -> u32 {
        self.cfg.out_h
    }

    fn draw_annotations(&mut self, src_ts_us: u64) {
        let rect = self.video_rect;
        let out_w = self.cfg.out_w as i64;
        let out_h = self.cfg.out_h as i64;

        // Collect first: the stroke loop needs &mut target while cfg.layers
        // stays borrowed otherwise.
        let active: Vec<_> = self
            .cfg
            .layers
            .annotations
            .iter()
            .filter(|a| a.active_at(src_ts_us))
            .copied()
            .collect();

        for a in active {
            let t = a.thickness.max(1.0);
            let ax0 = rect.x0 + a.rect[0] * rect.w();
            let ay0 = rect.y0 + a.rect[1] * rect.h();
            let ax1 = ax0 + a.rect[2] * rect.w();
            let ay1 = ay0 + a.rect[3] * rect.h();
            let alpha = a.color[3] as f32 / 255.0;
            let stroke = [a.color[0], a.color[1], a.color[2], 255];

            let x_lo = ((ax0 - t).floor() as i64).clamp(0, out_w);
            let x_hi = ((ax1 + t).ceil() as i64).clamp(0, out_w);
            let y_lo = ((ay0 - t).floor() as i64).clamp(0, out_h);
            let y_hi = ((ay1 + t).ceil() as i64).clamp(0, out_h);

            for y in y_lo..y_hi {
                let py = y as f32 + 0.5;
                for x in x_lo..x_hi {
                    let px = x as f32 + 0.5;
                    let in_outer = px >= ax0 - t && px < ax1 + t && py >= ay0 - t && py < ay1 + t;
                    let in_inner = px >= ax0 + t && px < ax1 - t && py >= ay0 + t && py < ay1 - t;
                    if in_outer && !in_inner {
                        let off = (y as usize * out_w as usize + x as usize) * 4;
                        let cur = [
                            self.target[off],
                            self.target[off + 1],
                            self.target[off + 2],
                            self.target[off + 3],
                        ];
                        let px_out = blend_rgba(cur, stroke, alpha);
                        self.target[off..off + 4].copy_from_slice(&px_out);
                    }
                }
            }
        }
    }
}

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Fit the cropped source's aspect into the output inset by padding,
/// centered both ways.
fn fit_video_rect(cfg: &RenderConfig, crop: &CropRegion) -> VideoRect {
    let out_w = cfg.out_w as f32;
    let out_h = cfg.out_h as f32;
    let pad = cfg.layers.padding.clamp(0.0, 0.45) * out_w.min(out_h);

    let avail_w = (out_w - 2.0 * pad).max(1.0);
    let avail_h = (out_h - 2.0 * pad).max(1.0);

    let scale = (avail_w / crop.width as f32).min(avail_h / crop.height as f32);
    let vid_w = crop.width as f32 * scale;
    let vid_h = crop.height as f32 * scale;

    let x0 = (out_w - vid_w) / 2.0;
    let y0 = (out_h - vid_h) / 2.0;
    VideoRect { x0, y0, x1: x0 + vid_w, y1: y0 + vid_h }
}

fn inside_rounded(rect: &VideoRect, radius: f32, px: f32, py: f32) -> bool {
    if px < rect.x0 || px >= rect.x1 || py < rect.y0 || py >= rect.y1 {
        return false;
    }
    if radius <= 0.0 {
        return true;
    }
    let cx = if px < rect.x0 + radius {
        rect.x0 + radius
    } else if px > rect.x1 - radius {
        rect.x1 - radius
    } else {
        return true;
    };
    let cy = if py < rect.y0 + radius {
        rect.y0 + radius
    } else if py > rect.y1 - radius {
        rect.y1 - radius
    } else {
        return true;
    };
    let dx = px - cx;
    let dy = py - cy;
    dx * dx + dy * dy <= radius * radius
}

fn background_at(bg: &Background, py: f32, out_h: u32) -> [u8; 4] {
    match bg {
        Background::Solid(c) => *c,
        Background::Gradient { top, bottom } => {
            let t = (py / out_h as f32).clamp(0.0, 1.0);
            blend_rgba(*top, *bottom, t)
        }
    }
}

/// Darken a background pixel by the drop shadow's falloff outside the video
/// rectangle.
fn shade(bg: [u8; 4], layers: &EditLayers, rect: &VideoRect, px: f32, py: f32) -> [u8; 4] {
    let Some(shadow) = layers.shadow else { return bg };
    if shadow.radius <= 0.0 || shadow.opacity <= 0.0 {
        return bg;
    }
    let dx = (rect.x0 - px).max(px - rect.x1).max(0.0);
    let dy = (rect.y0 - py).max(py - rect.y1).max(0.0);
    let d = (dx * dx + dy * dy).sqrt();
    if d >= shadow.radius {
        return bg;
    }
    let alpha = shadow.opacity.clamp(0.0, 1.0) * (1.0 - d / shadow.radius);
    blend_rgba(bg, [0, 0, 0, bg[3]], alpha)
}
