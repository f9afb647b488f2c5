// crates/recut-media/src/reader.rs
//
// SourceReader: stateful decoder that serves "the frame at source time t"
// without re-opening or re-seeking for every request.
//
// Seek policy per request:
//   • within 1 ms of the last served frame      → return the cached frame
//   • small forward step (≤ RESEEK_WINDOW_US)   → decode forward to it
//   • backward, or a large forward jump         → container seek to the
//     keyframe before the target, then burn through the GOP decode-only
//     (no scale, no alloc) until the target is reached
//
// Requests past the end of the stream return the last decodable frame —
// the frame-count rounding upstream may legitimately address one period
// beyond the final sample, and that must clamp, not fail.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use recut_core::{DecodedFrame, ExportError, SourceInfo};

use crate::helpers::frame::{destripe, ensure_ffmpeg};
use crate::helpers::seek::seek_to_us;
use crate::probe::probe_source;

/// A request within this distance of the last served frame is answered from
/// the cache without touching the decoder.
const SEEK_TOLERANCE_US: i64 = 1_000;

/// Forward distance beyond which sequential decoding is slower than a fresh
/// keyframe seek plus a decode-only burn.
const RESEEK_WINDOW_US: i64 = 2_000_000;

/// Anything that can serve decoded frames addressed by source time. Owned
/// by the pipeline's decode thread, which constructs it in place and is the
/// single producer — one outstanding `frame_at` at a time.
pub trait FrameSource {
    fn info(&self) -> SourceInfo;
    fn frame_at(&mut self, src_ts_us: u64) -> Result<DecodedFrame, ExportError>;
}

pub struct SourceReader {
    path:      PathBuf,
    info:      SourceInfo,
    ictx:      ffmpeg::format::context::Input,
    decoder:   ffmpeg::decoder::video::Video,
    video_idx: usize,
    scaler:    SwsContext,
    tb_num:    i32,
    tb_den:    i32,
    /// PTS of the newest frame the decoder has surfaced, stream time base.
    last_pts:  Option<i64>,
    /// Last frame scaled out of the decoder; serves cache hits and the EOF
    /// clamp.
    last_good: Option<DecodedFrame>,
    eof:       bool,
}

impl SourceReader {
    pub fn open(path: &Path) -> Result<Self, ExportError> {
        let info = probe_source(path)?;
        Self::open_with_info(path, info)
    }

    /// Open against already-probed facts, skipping the second probe when
    /// the caller has run one (the pipeline probes before spawning its
    /// decode thread).
    pub fn open_with_info(path: &Path, info: SourceInfo) -> Result<Self, ExportError> {
        ensure_ffmpeg();

        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| ExportError::SourceUnavailable(format!("{}: {e}", path.display())))?;
        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| {
                ExportError::UnsupportedFormat(format!("no video stream in {}", path.display()))
            })?
            .index();

        let (tb_num, tb_den) = {
            let tb = ictx.stream(video_idx).unwrap().time_base();
            (tb.numerator(), tb.denominator())
        };

        // Second context for decoder construction — Parameters borrows from
        // the Stream, which borrows ictx.
        let ictx2   = ffmpeg::format::input(&path)
            .map_err(|e| ExportError::SourceUnavailable(format!("{}: {e}", path.display())))?;
        let stream2 = ictx2.stream(video_idx).ok_or_else(|| {
            ExportError::UnsupportedFormat(format!("video stream vanished in {}", path.display()))
        })?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| {
                ExportError::UnsupportedFormat(format!("open decoder for {}: {e}", path.display()))
            })?;

        // Scale to RGBA at display dimensions. Feeding the display height
        // (not the decoder's coded height) excludes macroblock padding rows.
        let scaler = SwsContext::get(
            decoder.format(), info.width, info.height,
            Pixel::RGBA,      info.width, info.height,
            Flags::BILINEAR,
        )
        .map_err(|e| ExportError::UnsupportedFormat(format!("create scaler: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            info,
            ictx,
            decoder,
            video_idx,
            scaler,
            tb_num,
            tb_den,
            last_pts: None,
            last_good: None,
            eof: false,
        })
    }

    /// Round to nearest: with coarse time bases (1/30) truncation would
    /// address the frame before the target after a keyframe seek.
    fn us_to_pts(&self, us: i64) -> i64 {
        let den = self.tb_num as i128 * 1_000_000;
        ((us as i128 * self.tb_den as i128 + den / 2) / den) as i64
    }

    fn pts_to_us(&self, pts: i64) -> i64 {
        (pts as i128 * self.tb_num as i128 * 1_000_000 / self.tb_den as i128) as i64
    }

    /// Decode forward until a frame at or past `target_pts` comes out,
    /// skipping the scaler for frames below the target. Decode-only is
    /// several times faster than decode+scale+alloc, so a post-seek GOP
    /// burns in tens of milliseconds.
    ///
    /// Returns the first scaled frame, or `None` at end of stream (after
    /// draining the decoder's internal queue into `last_good`).
    fn decode_until(&mut self, target_pts: i64) -> Result<Option<DecodedFrame>, ExportError> {
        let tol_pts   = self.us_to_pts(SEEK_TOLERANCE_US).max(0);
        let threshold = target_pts - tol_pts;
        let (w, h)    = (self.info.width, self.info.height);

        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.video_idx {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                // A corrupt packet is not fatal — the next keyframe
                // resynchronizes the decoder.
                continue;
            }
            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded
                    .pts()
                    .unwrap_or_else(|| self.last_pts.map_or(0, |p| p + 1));
                self.last_pts = Some(pts);
                if pts < threshold {
                    continue; // burn-through: decode-only, no scale
                }
                let data  = scale_rgba(&mut self.scaler, &decoded, w, h)?;
                let frame = DecodedFrame { width: w, height: h, data, src_ts_us: 0 };
                self.last_good = Some(frame.clone());
                return Ok(Some(frame));
            }
        }

        // End of stream: flush held frames (B-frame codecs queue several)
        // and keep the newest as the clamp frame.
        let _ = self.decoder.send_eof();
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded
                .pts()
                .unwrap_or_else(|| self.last_pts.map_or(0, |p| p + 1));
            self.last_pts = Some(pts);
            let data  = scale_rgba(&mut self.scaler, &decoded, w, h)?;
            let frame = DecodedFrame { width: w, height: h, data, src_ts_us: 0 };
            self.last_good = Some(frame.clone());
            if pts >= threshold {
                return Ok(Some(frame));
            }
        }
        self.eof = true;
        Ok(None)
    }

    fn serve_cached(&self, src_ts_us: u64) -> Option<DecodedFrame> {
        self.last_good.as_ref().map(|f| {
            let mut f = f.clone();
            f.src_ts_us = src_ts_us;
            f
        })
    }
}

impl FrameSource for SourceReader {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn frame_at(&mut self, src_ts_us: u64) -> Result<DecodedFrame, ExportError> {
        let target_us = src_ts_us as i64;
        let cur_us    = self.last_pts.map(|p| self.pts_to_us(p));

        // Cache hit: the decoder already sits within tolerance of the target.
        if let Some(cur) = cur_us {
            if (target_us - cur).abs() <= SEEK_TOLERANCE_US {
                if let Some(f) = self.serve_cached(src_ts_us) {
                    return Ok(f);
                }
            }
        }

        let needs_seek = match cur_us {
            None => true,
            Some(cur) => target_us < cur || target_us > cur + RESEEK_WINDOW_US,
        };

        if needs_seek {
            if !seek_to_us(&mut self.ictx, target_us, "frame_at") {
                return Err(ExportError::SeekFailed(format!(
                    "seek to {target_us} µs in {}",
                    self.path.display()
                )));
            }
            self.decoder.flush();
            self.last_pts = None;
            self.eof = false;
        } else if self.eof {
            // Forward request past the end of the stream: clamp.
            return self
                .serve_cached(src_ts_us)
                .ok_or_else(|| ExportError::DecodeFailed("no frame decoded before EOF".into()));
        }

        let target_pts = self.us_to_pts(target_us);
        match self.decode_until(target_pts)? {
            Some(mut frame) => {
                frame.src_ts_us = src_ts_us;
                // Keep the cached copy stamped identically.
                if let Some(g) = self.last_good.as_mut() {
                    g.src_ts_us = src_ts_us;
                }
                Ok(frame)
            }
            None => self.serve_cached(src_ts_us).ok_or_else(|| {
                ExportError::DecodeFailed(format!(
                    "no frame decoded at {target_us} µs in {}",
                    self.path.display()
                ))
            }),
        }
    }
}

/// Run the scaler and strip stride padding into a tight RGBA buffer.
fn scale_rgba(
    scaler:  &mut SwsContext,
    decoded: &ffmpeg::util::frame::video::Video,
    w:       u32,
    h:       u32,
) -> Result<Vec<u8>, ExportError> {
    let mut out = ffmpeg::util::frame::video::Video::empty();
    scaler
        .run(decoded, &mut out)
        .map_err(|e| ExportError::DecodeFailed(format!("scale frame: {e}")))?;
    Ok(destripe(&out, w, h, 4))
}
