// crates/recut-media/src/muxer.rs
//
// MP4 muxing: coded chunks in → finalized container bytes out.
//
// The container is written to a scratch file (libav's muxers want a
// seekable sink for the moov box) and read back as the output blob on
// finalize. The video stream is created lazily on the first chunk, which
// must carry the full codec description — width, height, and the avcC
// extradata the demuxer-side needs.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::Id as CodecId;
use ffmpeg::util::rational::Rational;
use ffmpeg::{encoder, packet, Packet};

use recut_core::{CodecDescription, CodedChunk, ExportError};

use crate::helpers::frame::ensure_ffmpeg;

/// The container seam the pipeline writes through. Owned by the encode
/// worker thread, which constructs it in place and serializes every call;
/// chunks arrive in strictly increasing pts.
pub trait ChunkSink {
    /// Append one chunk. The first call must carry a full codec
    /// description or the sink fails with `MissingCodecDescription`.
    fn add_chunk(
        &mut self,
        chunk: &CodedChunk,
        meta: Option<&CodecDescription>,
    ) -> Result<(), ExportError>;

    /// Write the trailer and return the container bytes. Legal only after
    /// every `add_chunk` has resolved.
    fn finalize(&mut self) -> Result<Vec<u8>, ExportError>;
}

pub struct Mp4Muxer {
    scratch:     tempfile::TempPath,
    octx:        Option<ffmpeg::format::context::Output>,
    /// Muxer-assigned stream time base, read back after the header is
    /// written (it may differ from the 1/1_000_000 we request).
    stream_tb:   Rational,
    last_pts_us: Option<i64>,
    chunks:      u64,
}

impl Mp4Muxer {
    pub fn init() -> Result<Self, ExportError> {
        ensure_ffmpeg();
        let scratch = tempfile::Builder::new()
            .prefix("recut-")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| ExportError::MuxerInit(format!("create scratch file: {e}")))?
            .into_temp_path();

        let octx = ffmpeg::format::output(&scratch.to_path_buf())
            .map_err(|e| ExportError::MuxerInit(format!("open mp4 muxer: {e}")))?;

        Ok(Self {
            scratch,
            octx: Some(octx),
            stream_tb: Rational::new(1, 1_000_000),
            last_pts_us: None,
            chunks: 0,
        })
    }

    fn write_header(&mut self, meta: &CodecDescription) -> Result<(), ExportError> {
        let octx = self.octx.as_mut().ok_or_else(|| {
            ExportError::MuxFailed("muxer already finalized".into())
        })?;

        let h264 = encoder::find(CodecId::H264)
            .ok_or_else(|| ExportError::MuxerInit("H.264 codec not found".into()))?;
        let mut ost = octx
            .add_stream(h264)
            .map_err(|e| ExportError::MuxerInit(format!("add video stream: {e}")))?;
        ost.set_time_base(Rational::new(1, 1_000_000));

        // We have no encoder context to copy parameters from — the chunk
        // metadata is the source of truth. Write codecpar directly, like
        // avcodec_parameters_from_context would. Extradata must live in
        // av_malloc'd memory with input padding; libav frees it with the
        // stream.
        unsafe {
            let par = (**(*octx.as_mut_ptr()).streams.add(0)).codecpar;
            (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*par).codec_id = ffmpeg::ffi::AVCodecID::AV_CODEC_ID_H264;
            (*par).width = meta.coded_w as i32;
            (*par).height = meta.coded_h as i32;
            (*par).format = ffmpeg::ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
            (*par).color_range = ffmpeg::ffi::AVColorRange::AVCOL_RANGE_JPEG;
            (*par).color_primaries = ffmpeg::ffi::AVColorPrimaries::AVCOL_PRI_BT709;
            (*par).color_trc =
                ffmpeg::ffi::AVColorTransferCharacteristic::AVCOL_TRC_IEC61966_2_1;

            let len = meta.description_blob.len();
            let buf = ffmpeg::ffi::av_mallocz(len + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize)
                as *mut u8;
            if buf.is_null() {
                return Err(ExportError::MuxerInit("allocate extradata".into()));
            }
            std::ptr::copy_nonoverlapping(meta.description_blob.as_ptr(), buf, len);
            (*par).extradata = buf;
            (*par).extradata_size = len as i32;
        }

        octx.write_header()
            .map_err(|e| ExportError::MuxFailed(format!("write header: {e}")))?;

        self.stream_tb = octx
            .stream(0)
            .map(|s| s.time_base())
            .unwrap_or(Rational::new(1, 1_000_000));
        Ok(())
    }
}

impl ChunkSink for Mp4Muxer {
    fn add_chunk(
        &mut self,
        chunk: &CodedChunk,
        meta: Option<&CodecDescription>,
    ) -> Result<(), ExportError> {
        if let Some(prev) = self.last_pts_us {
            if chunk.pts_us <= prev {
                return Err(ExportError::MuxFailed(format!(
                    "non-monotonic pts {} after {}",
                    chunk.pts_us, prev
                )));
            }
        }

        if self.chunks == 0 {
            let meta = meta
                .filter(|m| !m.description_blob.is_empty())
                .ok_or(ExportError::MissingCodecDescription)?;
            self.write_header(meta)?;
        }

        let octx = self.octx.as_mut().ok_or_else(|| {
            ExportError::MuxFailed("muxer already finalized".into())
        })?;

        let mut pkt = Packet::copy(&chunk.data);
        pkt.set_stream(0);
        pkt.set_pts(Some(chunk.pts_us));
        // No B-frames upstream: decode order is presentation order.
        pkt.set_dts(Some(chunk.pts_us));
        pkt.set_duration(chunk.duration_us);
        if chunk.is_key {
            pkt.set_flags(packet::Flags::KEY);
        }
        pkt.rescale_ts(Rational::new(1, 1_000_000), self.stream_tb);
        pkt.write_interleaved(octx)
            .map_err(|e| ExportError::MuxFailed(format!("write chunk: {e}")))?;

        self.last_pts_us = Some(chunk.pts_us);
        self.chunks += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut octx = self
            .octx
            .take()
            .ok_or_else(|| ExportError::MuxFailed("muxer already finalized".into()))?;
        if self.chunks == 0 {
            return Err(ExportError::MuxFailed("no chunks were written".into()));
        }
        octx.write_trailer()
            .map_err(|e| ExportError::MuxFailed(format!("write trailer: {e}")))?;
        // Close the output context before reading the scratch file so the
        // moov box is flushed to disk.
        drop(octx);

        let blob = std::fs::read(&self.scratch)
            .map_err(|e| ExportError::MuxFailed(format!("read container: {e}")))?;
        eprintln!("[mux] finalized {} chunks, {} bytes", self.chunks, blob.len());
        Ok(blob)
    }
}
