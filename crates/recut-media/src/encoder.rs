// crates/recut-media/src/encoder.rs
//
// H.264 encode stage: composited RGBA frames in presentation order → coded
// chunks in the same order.
//
// Backend selection tries hardware encoders first and falls back to
// software; a candidate that is present but fails to open (no device, no
// session) is skipped, not fatal. Only when every candidate is exhausted is
// the codec unsupported.
//
// PTS strategy: the encoder time base is 1/1_000_000, so frame and packet
// timestamps are plain microseconds — no rescaling until the muxer.
// B-frames are disabled so packets leave in presentation order; chunk i
// always carries the pts of submission i.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::picture;
use ffmpeg::util::rational::Rational;
use ffmpeg::{encoder, Packet};

use recut_core::{CodecDescription, CodedChunk, ColorSpace, CompositedFrame, ExportError, ExportSpec};

use crate::helpers::frame::ensure_ffmpeg;

/// Hardware encoders tried in order before the software fallback.
const H264_HW_ENCODERS: &[&str] = &["h264_videotoolbox", "h264_nvenc", "h264_vaapi", "h264_qsv"];
const H264_SW_ENCODER: &str = "libx264";

// ── Backend selection ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderBackendInfo {
    pub name:     String,
    pub hardware: bool,
}

/// Resolve an opaque codec id into the ordered list of libav encoder names
/// to try. Only the AVC family is supported; the muxer's container choice
/// depends on it.
pub fn backend_candidates(codec_id: &str) -> Result<Vec<EncoderBackendInfo>, ExportError> {
    let avc = codec_id.starts_with("avc1")
        || codec_id.starts_with("avc3")
        || codec_id.eq_ignore_ascii_case("h264");
    if !avc {
        return Err(ExportError::CodecUnsupported(format!(
            "codec id '{codec_id}' is not AVC-family"
        )));
    }
    let mut out: Vec<EncoderBackendInfo> = H264_HW_ENCODERS
        .iter()
        .map(|&name| EncoderBackendInfo { name: name.into(), hardware: true })
        .collect();
    out.push(EncoderBackendInfo { name: H264_SW_ENCODER.into(), hardware: false });
    Ok(out)
}

// ── Backend trait ─────────────────────────────────────────────────────────────

/// The codec seam the pipeline drives. The production implementation wraps
/// libav and lives on the encode worker thread, which constructs it in
/// place; tests drive the pipeline with a stub.
pub trait EncodeBackend {
    /// Stream metadata captured when the encoder opened. Available before
    /// the first chunk so the pipeline can attach it to the first chunk's
    /// metadata.
    fn description(&self) -> Option<Arc<CodecDescription>>;

    fn backend_info(&self) -> &EncoderBackendInfo;

    /// Encode one frame; emitted chunks (zero or more — codec delay) are
    /// appended to `out` in presentation order.
    fn encode(
        &mut self,
        frame: &CompositedFrame,
        force_keyframe: bool,
        out: &mut Vec<CodedChunk>,
    ) -> Result<(), ExportError>;

    /// Drain everything still inside the codec.
    fn flush(&mut self, out: &mut Vec<CodedChunk>) -> Result<(), ExportError>;
}

// ── FFmpeg implementation ─────────────────────────────────────────────────────

pub struct VideoEncoder {
    enc:         encoder::video::Encoder,
    scaler:      SwsContext,
    info:        EncoderBackendInfo,
    description: Arc<CodecDescription>,
    width:       u32,
    height:      u32,
    duration_us: i64,
}

impl VideoEncoder {
    /// Open the first usable backend for `spec`. A candidate failing to
    /// open is logged and skipped; no candidate at all is
    /// `CodecUnsupported`.
    pub fn configure(spec: &ExportSpec) -> Result<Self, ExportError> {
        ensure_ffmpeg();
        let mut last_err = None;
        for cand in backend_candidates(&spec.codec_id)? {
            match Self::open_backend(spec, &cand) {
                Ok(enc) => {
                    eprintln!(
                        "[encode] {} ({}) {}x{} @ {} bps",
                        cand.name,
                        if cand.hardware { "hardware" } else { "software" },
                        spec.width,
                        spec.height,
                        spec.bitrate_bps
                    );
                    return Ok(enc);
                }
                Err(e) => {
                    eprintln!("[encode] {} unavailable: {e}", cand.name);
                    last_err = Some(e);
                }
            }
        }
        Err(ExportError::CodecUnsupported(format!(
            "no usable encoder for '{}' (last error: {})",
            spec.codec_id,
            last_err.map_or_else(|| "none tried".into(), |e| e.to_string())
        )))
    }

    fn open_backend(spec: &ExportSpec, cand: &EncoderBackendInfo) -> Result<Self, ExportError> {
        let codec = encoder::find_by_name(&cand.name)
            .ok_or_else(|| ExportError::CodecUnsupported(format!("{} not built in", cand.name)))?;

        let ctx = codec::context::Context::new_with_codec(codec);
        let mut enc = ctx
            .encoder()
            .video()
            .map_err(|e| ExportError::EncoderFailed(format!("create encoder context: {e}")))?;

        let time_base = Rational::new(1, 1_000_000);
        enc.set_width(spec.width);
        enc.set_height(spec.height);
        enc.set_format(Pixel::YUV420P);
        enc.set_time_base(time_base);
        enc.set_frame_rate(Some(Rational::new(
            spec.frame_rate.num as i32,
            spec.frame_rate.den as i32,
        )));
        enc.set_bit_rate(spec.bitrate_bps as usize);

        // Fields without safe setters in this version of ffmpeg-the-third.
        // GLOBAL_HEADER makes the encoder emit codec-private data (avcC) as
        // extradata instead of in-band — the muxer requires it up front.
        // max_b_frames = 0: packets must leave in presentation order.
        unsafe {
            let ptr = enc.as_mut_ptr();
            (*ptr).flags |= ffmpeg::ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            (*ptr).gop_size = 150;
            (*ptr).max_b_frames = 0;
            (*ptr).color_range = ffmpeg::ffi::AVColorRange::AVCOL_RANGE_JPEG;
            (*ptr).color_primaries = ffmpeg::ffi::AVColorPrimaries::AVCOL_PRI_BT709;
            (*ptr).color_trc =
                ffmpeg::ffi::AVColorTransferCharacteristic::AVCOL_TRC_IEC61966_2_1;
        }

        let mut opts = ffmpeg::Dictionary::new();
        if !cand.hardware {
            opts.set("preset", "fast");
        }

        let enc = enc
            .open_as_with(codec, opts)
            .map_err(|e| ExportError::EncoderFailed(format!("open {}: {e}", cand.name)))?;

        let blob = unsafe {
            let ptr = enc.as_ptr();
            if (*ptr).extradata.is_null() || (*ptr).extradata_size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts((*ptr).extradata, (*ptr).extradata_size as usize)
                    .to_vec()
            }
        };
        if blob.is_empty() {
            return Err(ExportError::EncoderFailed(format!(
                "{} produced no codec-private data",
                cand.name
            )));
        }

        let scaler = SwsContext::get(
            Pixel::RGBA,    spec.width, spec.height,
            Pixel::YUV420P, spec.width, spec.height,
            Flags::BILINEAR,
        )
        .map_err(|e| ExportError::EncoderFailed(format!("create RGBA→YUV scaler: {e}")))?;

        let description = Arc::new(CodecDescription {
            codec_id:         spec.codec_id.clone(),
            coded_w:          spec.width,
            coded_h:          spec.height,
            description_blob: blob,
            color_space:      ColorSpace::output(),
        });

        Ok(Self {
            enc,
            scaler,
            info: cand.clone(),
            description,
            width: spec.width,
            height: spec.height,
            duration_us: spec.frame_rate.period_us() as i64,
        })
    }

    fn drain_packets(&mut self, out: &mut Vec<CodedChunk>) -> Result<(), ExportError> {
        let mut pkt = Packet::empty();
        while self.enc.receive_packet(&mut pkt).is_ok() {
            out.push(CodedChunk {
                data:        pkt.data().map(<[u8]>::to_vec).unwrap_or_default(),
                pts_us:      pkt.pts().unwrap_or(0),
                duration_us: self.duration_us,
                is_key:      pkt.is_key(),
            });
        }
        Ok(())
    }
}

impl EncodeBackend for VideoEncoder {
    fn description(&self) -> Option<Arc<CodecDescription>> {
        Some(Arc::clone(&self.description))
    }

    fn backend_info(&self) -> &EncoderBackendInfo {
        &self.info
    }

    fn encode(
        &mut self,
        frame: &CompositedFrame,
        force_keyframe: bool,
        out: &mut Vec<CodedChunk>,
    ) -> Result<(), ExportError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(ExportError::EncoderFailed(format!(
                "frame {}x{} does not match configured {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let mut rgba = VideoFrame::new(Pixel::RGBA, self.width, self.height);
        let stride = rgba.stride(0);
        let row_bytes = self.width as usize * 4;
        {
            let dst = rgba.data_mut(0);
            for row in 0..self.height as usize {
                let s = row * row_bytes;
                let d = row * stride;
                dst[d..d + row_bytes].copy_from_slice(&frame.data[s..s + row_bytes]);
            }
        }

        let mut yuv = VideoFrame::empty();
        self.scaler
            .run(&rgba, &mut yuv)
            .map_err(|e| ExportError::EncoderFailed(format!("convert to YUV: {e}")))?;
        yuv.set_pts(Some(frame.eff_ts_us as i64));
        if force_keyframe {
            yuv.set_kind(picture::Type::I);
        }

        self.enc
            .send_frame(&yuv)
            .map_err(|e| ExportError::EncoderFailed(format!("send frame: {e}")))?;
        self.drain_packets(out)
    }

    fn flush(&mut self, out: &mut Vec<CodedChunk>) -> Result<(), ExportError> {
        self.enc
            .send_eof()
            .map_err(|e| ExportError::EncoderFailed(format!("send EOF: {e}")))?;
        self.drain_packets(out)
    }
}

// ── Backpressure gate ─────────────────────────────────────────────────────────

/// Counts frames submitted to the encode stage but not yet muxed. The
/// pipeline blocks on `acquire` while the count is at the cap — the sole
/// mechanism bounding codec-queue memory growth.
pub struct InFlightGate {
    count: Mutex<usize>,
    cvar:  Condvar,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self { count: Mutex::new(0), cvar: Condvar::new() }
    }

    /// Block until the count drops below `max`, then increment it.
    /// Observes `cancel` while waiting.
    pub fn acquire(&self, max: usize, cancel: &AtomicBool) -> Result<(), ExportError> {
        let mut n = self.count.lock().unwrap();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(ExportError::Cancelled);
            }
            if *n < max {
                *n += 1;
                return Ok(());
            }
            let (guard, _) = self
                .cvar
                .wait_timeout(n, Duration::from_millis(50))
                .unwrap();
            n = guard;
        }
    }

    /// Decrement the count (one chunk reached the muxer) and wake waiters.
    pub fn release(&self) {
        let mut n = self.count.lock().unwrap();
        *n = n.saturating_sub(1);
        self.cvar.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

impl Default for InFlightGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn avc_family_candidates_try_hardware_first() {
        let cands = backend_candidates("avc1.640033").unwrap();
        assert!(cands.len() >= 2);
        assert!(cands[..cands.len() - 1].iter().all(|c| c.hardware));
        let last = cands.last().unwrap();
        assert_eq!(last.name, "libx264");
        assert!(!last.hardware);
    }

    #[test]
    fn non_avc_codec_is_unsupported() {
        assert!(matches!(
            backend_candidates("vp09.00.10.08"),
            Err(ExportError::CodecUnsupported(_))
        ));
        assert!(backend_candidates("h264").is_ok());
    }

    #[test]
    fn software_fallback_when_hardware_rejects() {
        // The selection loop: skip every hardware candidate, accept software.
        let picked = backend_candidates("avc1.640033")
            .unwrap()
            .into_iter()
            .find(|c| !c.hardware)
            .unwrap();
        assert_eq!(picked.name, "libx264");
        assert!(!picked.hardware);
    }

    #[test]
    fn gate_counts_and_caps() {
        let gate = InFlightGate::new();
        let cancel = AtomicBool::new(false);
        for _ in 0..3 {
            gate.acquire(4, &cancel).unwrap();
        }
        assert_eq!(gate.in_flight(), 3);
        gate.release();
        assert_eq!(gate.in_flight(), 2);
    }

    #[test]
    fn gate_blocks_until_released() {
        let gate = Arc::new(InFlightGate::new());
        let cancel = Arc::new(AtomicBool::new(false));
        gate.acquire(1, &cancel).unwrap();

        let g2 = Arc::clone(&gate);
        let c2 = Arc::clone(&cancel);
        let waiter = thread::spawn(move || g2.acquire(1, &c2));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(gate.in_flight(), 1); // waiter still blocked
        gate.release();
        waiter.join().unwrap().unwrap();
        assert_eq!(gate.in_flight(), 1);
    }

    #[test]
    fn gate_observes_cancellation_while_blocked() {
        let gate = Arc::new(InFlightGate::new());
        let cancel = Arc::new(AtomicBool::new(false));
        gate.acquire(1, &cancel).unwrap();

        let g2 = Arc::clone(&gate);
        let c2 = Arc::clone(&cancel);
        let waiter = thread::spawn(move || g2.acquire(1, &c2));

        thread::sleep(Duration::from_millis(20));
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(waiter.join().unwrap(), Err(ExportError::Cancelled));
    }
}
