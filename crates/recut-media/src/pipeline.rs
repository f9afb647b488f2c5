// crates/recut-media/src/pipeline.rs
//
// The export pipeline: one coordinated decode → render → encode → mux loop.
//
// Threads and channels:
//
//   decode thread ──bounded(DECODE_AHEAD)──▶ main loop ──channel──▶ encode worker
//                                            (render +               (encode + mux,
//                                             submit)                 FIFO)
//
// Each stage constructs its own FFmpeg objects on its own thread — nothing
// libav-backed ever crosses a thread boundary; the stages exchange plain
// frame and chunk data. The decode thread owns the SourceReader, which
// serializes seeks. The bounded queue IS the decode-ahead limit: send()
// blocks when the queue is full, so the reader stays at most DECODE_AHEAD
// frames ahead.
//
// The encode worker owns the encoder and the muxer, so encoder output and
// muxer writes are one FIFO — chunks reach the container in submission
// order by construction. The in-flight gate (frames submitted − chunks
// muxed) caps the pipeline's memory: the main loop blocks before submit
// while the count is at MAX_IN_FLIGHT.
//
// The cancel flag is checked at every blocking point. A fatal error
// anywhere sets it, so every thread winds down; cleanup joins each thread
// exactly once and never lets a cleanup failure shadow the original error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use recut_core::{
    CodedChunk, ColorSpace, CompositedFrame, DecodedFrame, ExportError, ExportSpec,
    FrameCompositor, ProgressEvent, RenderConfig, SourceInfo, TimeMap,
};

use crate::encoder::{EncodeBackend, InFlightGate, VideoEncoder};
use crate::muxer::{ChunkSink, Mp4Muxer};
use crate::probe::probe_source;
use crate::reader::{FrameSource, SourceReader};

/// Depth of the decode-ahead queue.
pub const DECODE_AHEAD: usize = 10;

/// Cap on frames submitted to the encode stage but not yet muxed.
pub const MAX_IN_FLIGHT: usize = 120;

/// Forced-keyframe spacing in output frames, independent of framerate.
pub const KEYFRAME_INTERVAL: u64 = 150;

type DecodeItem = Result<(DecodedFrame, u64, u64), ExportError>;

enum EncodeMsg {
    Frame { frame: CompositedFrame, force_keyframe: bool },
    Flush,
}

// ── Public surface ────────────────────────────────────────────────────────────

pub struct ExportPipeline {
    spec:   ExportSpec,
    cancel: Arc<AtomicBool>,
}

impl ExportPipeline {
    pub fn new(spec: ExportSpec) -> Self {
        Self::with_cancel(spec, Arc::new(AtomicBool::new(false)))
    }

    /// Share an externally owned cancel flag (the worker registers it under
    /// the job id before spawning).
    pub fn with_cancel(spec: ExportSpec, cancel: Arc<AtomicBool>) -> Self {
        Self { spec, cancel }
    }

    /// Request cancellation. Idempotent; calling after completion is a
    /// no-op.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the export to completion. Returns the finalized container bytes,
    /// or the first fatal error — never a partial blob.
    pub fn run(&self, progress: impl FnMut(ProgressEvent)) -> Result<Vec<u8>, ExportError> {
        self.spec.validate()?;
        let info = probe_source(&self.spec.source_uri)?;

        let path     = self.spec.source_uri.clone();
        let enc_spec = self.spec.clone();
        drive(
            &self.spec,
            info,
            move || SourceReader::open_with_info(&path, info),
            move || VideoEncoder::configure(&enc_spec),
            Mp4Muxer::init,
            Arc::clone(&self.cancel),
            progress,
        )
    }
}

// ── Core loop, generic over the collaborator seams ────────────────────────────

pub(crate) fn drive<S, E, K, F>(
    spec: &ExportSpec,
    info: SourceInfo,
    open_source: impl FnOnce() -> Result<S, ExportError> + Send + 'static,
    open_encoder: impl FnOnce() -> Result<E, ExportError> + Send + 'static,
    open_sink: impl FnOnce() -> Result<K, ExportError> + Send + 'static,
    cancel: Arc<AtomicBool>,
    mut progress: F,
) -> Result<Vec<u8>, ExportError>
where
    S: FrameSource + 'static,
    E: EncodeBackend + 'static,
    K: ChunkSink + 'static,
    F: FnMut(ProgressEvent),
{
    let time_map = TimeMap::new(spec.frame_rate, &spec.trims);
    let period   = time_map.period_us();
    let total    = time_map.total_frames(info.duration_us)?;
    if total == 0 {
        return Err(ExportError::InvalidSpec("empty output timeline".into()));
    }

    let mut compositor = FrameCompositor::new(RenderConfig {
        out_w:  spec.width,
        out_h:  spec.height,
        src_w:  info.width,
        src_h:  info.height,
        layers: spec.layers.clone(),
    })?;

    // ── Decode-ahead thread ───────────────────────────────────────────────────
    let (frame_tx, frame_rx) = bounded::<DecodeItem>(DECODE_AHEAD);
    let decode_cancel = Arc::clone(&cancel);
    let decode_handle = thread::spawn(move || {
        let source = match open_source() {
            Ok(s) => s,
            Err(e) => {
                let _ = frame_tx.send(Err(e));
                return;
            }
        };
        decode_loop(source, time_map, total, decode_cancel, frame_tx);
    });

    // ── Encode + mux worker ───────────────────────────────────────────────────
    let gate = Arc::new(InFlightGate::new());
    let (enc_tx, enc_rx) = unbounded::<EncodeMsg>();
    let (done_tx, done_rx) = bounded::<Result<Vec<u8>, ExportError>>(1);
    let worker_gate   = Arc::clone(&gate);
    let worker_cancel = Arc::clone(&cancel);
    let encode_handle = thread::spawn(move || {
        let fail_early = |e: ExportError| {
            worker_cancel.store(true, Ordering::Relaxed);
            let _ = done_tx.send(Err(e));
        };
        let encoder = match open_encoder() {
            Ok(e) => e,
            Err(e) => return fail_early(e),
        };
        let sink = match open_sink() {
            Ok(s) => s,
            Err(e) => return fail_early(e),
        };
        encode_loop(encoder, sink, enc_rx, worker_gate, worker_cancel, done_tx);
    });

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut failure: Option<ExportError> = None;
    let mut estimator = RemainingEstimator::new();

    for i in 0..total {
        if cancel.load(Ordering::Relaxed) {
            failure = Some(ExportError::Cancelled);
            break;
        }

        let (decoded, eff_ts, src_ts) = match frame_rx.recv() {
            Ok(Ok(item)) => item,
            Ok(Err(e)) => {
                failure = Some(e);
                break;
            }
            Err(_) => {
                failure = Some(if cancel.load(Ordering::Relaxed) {
                    ExportError::Cancelled
                } else {
                    ExportError::DecodeFailed("decode queue starved".into())
                });
                break;
            }
        };

        // render → submit is one critical section with respect to the
        // compositor target: the composited copy is taken before anything
        // can overwrite it.
        if let Err(e) = compositor.render(&decoded, src_ts) {
            failure = Some(e);
            break;
        }
        drop(decoded);
        let composited = CompositedFrame {
            width:       spec.width,
            height:      spec.height,
            data:        compositor.target().to_vec(),
            eff_ts_us:   eff_ts,
            duration_us: period,
            color_space: ColorSpace::output(),
        };

        if let Err(e) = gate.acquire(MAX_IN_FLIGHT, &cancel) {
            failure = Some(e);
            break;
        }
        let force_keyframe = i % KEYFRAME_INTERVAL == 0;
        if enc_tx.send(EncodeMsg::Frame { frame: composited, force_keyframe }).is_err() {
            gate.release(); // the frame never reached the worker
            failure = Some(ExportError::EncoderFailed("encode worker exited early".into()));
            break;
        }

        let done = i + 1;
        progress(ProgressEvent {
            current_frame:    done,
            total_frames:     total,
            fraction:         done as f64 / total as f64,
            est_remaining_us: estimator.tick(total - done),
        });
    }

    // ── Flush, or wind down without flushing ──────────────────────────────────
    let outcome = match failure {
        None => {
            let _ = enc_tx.send(EncodeMsg::Flush);
            drop(enc_tx);
            match done_rx.recv() {
                Ok(result) => result,
                Err(_) => Err(ExportError::EncoderFailed(
                    "encode worker exited before finalize".into(),
                )),
            }
        }
        Some(err) => {
            // Fatal error or cancellation: no flush, no partial blob. The
            // flag stops the decode thread and drains the worker.
            cancel.store(true, Ordering::Relaxed);
            drop(enc_tx);
            // If the worker hit the original fatal error, prefer it over
            // the secondary Cancelled/exit symptoms seen on this thread.
            match done_rx.try_recv() {
                Ok(Err(worker_err)) => Err(worker_err),
                _ => Err(err),
            }
        }
    };

    // ── Cleanup: join each thread exactly once; log, never shadow ─────────────
    drop(frame_rx);
    if decode_handle.join().is_err() {
        eprintln!("[pipeline] decode thread panicked during cleanup");
    }
    if encode_handle.join().is_err() {
        eprintln!("[pipeline] encode worker panicked during cleanup");
    }

    outcome
}

// ── Decode thread ─────────────────────────────────────────────────────────────

fn decode_loop<S: FrameSource>(
    mut source: S,
    map: TimeMap,
    total: u64,
    cancel: Arc<AtomicBool>,
    tx: Sender<DecodeItem>,
) {
    let period = map.period_us();
    for i in 0..total {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let eff_ts = i * period;
        let src_ts = map.source_time_of(eff_ts);

        let frame = match source.frame_at(src_ts) {
            Ok(f) => f,
            Err(ExportError::SeekFailed(msg)) => {
                // One fresh seek per frame before the failure is fatal.
                eprintln!("[pipeline] seek failed at {src_ts} µs, retrying once: {msg}");
                match source.frame_at(src_ts) {
                    Ok(f) => f,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        // Blocking send is the decode-ahead limit; a closed channel means
        // the pipeline is winding down.
        if tx.send(Ok((frame, eff_ts, src_ts))).is_err() {
            return;
        }
    }
}

// ── Encode + mux worker ───────────────────────────────────────────────────────

fn encode_loop<E: EncodeBackend, K: ChunkSink>(
    mut encoder: E,
    mut sink: K,
    rx: Receiver<EncodeMsg>,
    gate: Arc<InFlightGate>,
    cancel: Arc<AtomicBool>,
    done_tx: Sender<Result<Vec<u8>, ExportError>>,
) {
    let mut chunks: Vec<CodedChunk> = Vec::new();
    let mut description = encoder.description();
    let mut first_written = false;

    let fail = |e: ExportError, done_tx: &Sender<Result<Vec<u8>, ExportError>>| {
        // Fatal errors cancel the whole run so the producer side unblocks.
        cancel.store(true, Ordering::Relaxed);
        let _ = done_tx.send(Err(e));
    };

    for msg in rx.iter() {
        match msg {
            EncodeMsg::Frame { frame, force_keyframe } => {
                if cancel.load(Ordering::Relaxed) {
                    // Cancelled: stop encoding, keep the counter honest.
                    drop(frame);
                    gate.release();
                    continue;
                }
                chunks.clear();
                if let Err(e) = encoder.encode(&frame, force_keyframe, &mut chunks) {
                    fail(e, &done_tx);
                    return;
                }
                drop(frame); // released on this stage's exit path

                if description.is_none() {
                    description = encoder.description();
                }
                for chunk in &chunks {
                    let meta = if first_written { None } else { description.as_deref() };
                    if let Err(e) = sink.add_chunk(chunk, meta) {
                        fail(e, &done_tx);
                        return;
                    }
                    first_written = true;
                    gate.release();
                }
            }
            EncodeMsg::Flush => {
                chunks.clear();
                if let Err(e) = encoder.flush(&mut chunks) {
                    fail(e, &done_tx);
                    return;
                }
                if description.is_none() {
                    description = encoder.description();
                }
                for chunk in &chunks {
                    let meta = if first_written { None } else { description.as_deref() };
                    if let Err(e) = sink.add_chunk(chunk, meta) {
                        fail(e, &done_tx);
                        return;
                    }
                    first_written = true;
                    gate.release();
                }
                match sink.finalize() {
                    Ok(blob) => {
                        let _ = done_tx.send(Ok(blob));
                    }
                    Err(e) => fail(e, &done_tx),
                }
                return;
            }
        }
    }
    // Channel closed without a flush: cancelled run, nothing to finalize.
}

// ── Progress estimation ───────────────────────────────────────────────────────

/// Exponentially smoothed per-frame wall time, extrapolated over the frames
/// left.
struct RemainingEstimator {
    last:   Instant,
    ema_us: f64,
}

impl RemainingEstimator {
    fn new() -> Self {
        Self { last: Instant::now(), ema_us: 0.0 }
    }

    fn tick(&mut self, frames_left: u64) -> u64 {
        let dt = self.last.elapsed().as_micros() as f64;
        self.last = Instant::now();
        self.ema_us = if self.ema_us == 0.0 { dt } else { self.ema_us + (dt - self.ema_us) * 0.1 };
        (self.ema_us * frames_left as f64) as u64
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use recut_core::{CodecDescription, FrameRate, TimeInterval, TrimSet};
    use std::sync::atomic::AtomicU64;

    use crate::encoder::EncoderBackendInfo;

    // ── Stub collaborators ────────────────────────────────────────────────────

    struct StubSource {
        info:     SourceInfo,
        requests: Arc<Mutex<Vec<u64>>>,
        /// call index → error to return once.
        fail_at:  Option<(u64, ExportError)>,
        calls:    Arc<AtomicU64>,
    }

    impl StubSource {
        fn new(duration_us: u64) -> Self {
            Self {
                info:     stub_info(duration_us),
                requests: Arc::new(Mutex::new(Vec::new())),
                fail_at:  None,
                calls:    Arc::new(AtomicU64::new(0)),
            }
        }
    }

    fn stub_info(duration_us: u64) -> SourceInfo {
        SourceInfo { width: 64, height: 36, duration_us }
    }

    impl FrameSource for StubSource {
        fn info(&self) -> SourceInfo {
            self.info
        }

        fn frame_at(&mut self, src_ts_us: u64) -> Result<DecodedFrame, ExportError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if let Some((at, err)) = &self.fail_at {
                if call == *at {
                    return Err(err.clone());
                }
            }
            self.requests.lock().push(src_ts_us);
            Ok(DecodedFrame {
                width:     self.info.width,
                height:    self.info.height,
                data:      vec![128; (self.info.width * self.info.height * 4) as usize],
                src_ts_us,
            })
        }
    }

    /// One chunk per frame, immediately; key iff forced.
    struct StubEncoder {
        info:        EncoderBackendInfo,
        description: Arc<CodecDescription>,
    }

    impl StubEncoder {
        fn new() -> Self {
            Self {
                info: EncoderBackendInfo { name: "stub".into(), hardware: false },
                description: Arc::new(CodecDescription {
                    codec_id:         "avc1.640033".into(),
                    coded_w:          64,
                    coded_h:          36,
                    description_blob: vec![1, 100, 0, 51],
                    color_space:      ColorSpace::output(),
                }),
            }
        }
    }

    impl EncodeBackend for StubEncoder {
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
            out.push(CodedChunk {
                data:        vec![0; 8],
                pts_us:      frame.eff_ts_us as i64,
                duration_us: frame.duration_us as i64,
                is_key:      force_keyframe,
            });
            Ok(())
        }

        fn flush(&mut self, _out: &mut Vec<CodedChunk>) -> Result<(), ExportError> {
            Ok(())
        }
    }

    /// Fails every frame after `fail_after` submissions.
    struct FailingEncoder {
        inner:      StubEncoder,
        fail_after: u64,
        seen:       u64,
    }

    impl EncodeBackend for FailingEncoder {
        fn description(&self) -> Option<Arc<CodecDescription>> {
            self.inner.description()
        }

        fn backend_info(&self) -> &EncoderBackendInfo {
            self.inner.backend_info()
        }

        fn encode(
            &mut self,
            frame: &CompositedFrame,
            force_keyframe: bool,
            out: &mut Vec<CodedChunk>,
        ) -> Result<(), ExportError> {
            self.seen += 1;
            if self.seen > self.fail_after {
                return Err(ExportError::EncoderFailed("stub encoder gave up".into()));
            }
            self.inner.encode(frame, force_keyframe, out)
        }

        fn flush(&mut self, out: &mut Vec<CodedChunk>) -> Result<(), ExportError> {
            self.inner.flush(out)
        }
    }

    #[derive(Clone, Default)]
    struct Recorded {
        chunks:    Vec<(i64, i64, bool, bool)>, // pts, duration, key, had_meta
        finalized: bool,
    }

    struct RecordingSink {
        state:           Arc<Mutex<Recorded>>,
        reject_metaless: bool,
    }

    impl RecordingSink {
        fn new() -> (Self, Arc<Mutex<Recorded>>) {
            let state = Arc::new(Mutex::new(Recorded::default()));
            (Self { state: Arc::clone(&state), reject_metaless: false }, state)
        }

        /// A sink that refuses a first chunk lacking a description blob.
        fn strict() -> (Self, Arc<Mutex<Recorded>>) {
            let (mut sink, state) = Self::new();
            sink.reject_metaless = true;
            (sink, state)
        }
    }

    impl ChunkSink for RecordingSink {
        fn add_chunk(
            &mut self,
            chunk: &CodedChunk,
            meta: Option<&CodecDescription>,
        ) -> Result<(), ExportError> {
            let mut state = self.state.lock();
            if self.reject_metaless
                && state.chunks.is_empty()
                && meta.map_or(true, |m| m.description_blob.is_empty())
            {
                return Err(ExportError::MissingCodecDescription);
            }
            state
                .chunks
                .push((chunk.pts_us, chunk.duration_us, chunk.is_key, meta.is_some()));
            Ok(())
        }

        fn finalize(&mut self) -> Result<Vec<u8>, ExportError> {
            let mut state = self.state.lock();
            state.finalized = true;
            Ok(vec![0x66, 0x74, 0x79, 0x70])
        }
    }

    fn spec(fps: u32, trims: TrimSet) -> ExportSpec {
        ExportSpec {
            width:       64,
            height:      36,
            frame_rate:  FrameRate::fps(fps),
            bitrate_bps: 1_000_000,
            codec_id:    "avc1.640033".into(),
            source_uri:  "stub.mp4".into(),
            trims,
            layers:      Default::default(),
        }
    }

    fn run_drive<S, E, K>(
        spec: &ExportSpec,
        source: S,
        encoder: E,
        sink: K,
    ) -> Result<Vec<u8>, ExportError>
    where
        S: FrameSource + Send + 'static,
        E: EncodeBackend + Send + 'static,
        K: ChunkSink + Send + 'static,
    {
        let info = source.info();
        drive(
            spec,
            info,
            move || Ok(source),
            move || Ok(encoder),
            move || Ok(sink),
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
    }

    // ── Scenarios ─────────────────────────────────────────────────────────────

    #[test]
    fn identity_remap_produces_dense_timestamps() {
        // 3.0 s source, 30 fps, no trims → 90 frames, pts = i·33333.
        let (sink, state) = RecordingSink::new();
        let blob = run_drive(
            &spec(30, TrimSet::default()),
            StubSource::new(3_000_000),
            StubEncoder::new(),
            sink,
        )
        .unwrap();
        assert!(!blob.is_empty());

        let state = state.lock();
        assert!(state.finalized);
        assert_eq!(state.chunks.len(), 90);
        for (i, &(pts, dur, key, had_meta)) in state.chunks.iter().enumerate() {
            assert_eq!(pts, i as i64 * 33_333);
            assert_eq!(dur, 33_333);
            assert_eq!(had_meta, i == 0, "metadata must ride the first chunk only");
            if i as u64 % KEYFRAME_INTERVAL == 0 {
                assert!(key, "chunk {i} must be a forced keyframe");
            }
        }
        assert!(state.chunks[0].2, "first chunk must be a keyframe");
    }

    #[test]
    fn chunks_arrive_in_strictly_increasing_pts_with_gop_150() {
        // 4.0 s at 100 fps → 400 frames; forced keys at 0, 150, 300.
        let (sink, state) = RecordingSink::new();
        run_drive(
            &spec(100, TrimSet::default()),
            StubSource::new(4_000_000),
            StubEncoder::new(),
            sink,
        )
        .unwrap();

        let state = state.lock();
        assert_eq!(state.chunks.len(), 400);
        let mut prev = i64::MIN;
        for &(pts, ..) in &state.chunks {
            assert!(pts > prev, "pts must strictly increase ({pts} after {prev})");
            prev = pts;
        }
        let keys: Vec<usize> = state
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, &(_, _, key, _))| key.then_some(i))
            .collect();
        assert_eq!(keys, vec![0, 150, 300]);
    }

    #[test]
    fn trimmed_instants_are_never_decoded() {
        // 10 s source, [3 s, 5 s) removed, 25 fps → 200 frames.
        let trims = TrimSet::new(vec![TimeInterval::new(3_000_000, 5_000_000)]);
        let source = StubSource::new(10_000_000);
        let requests = Arc::clone(&source.requests);
        let (sink, state) = RecordingSink::new();

        run_drive(&spec(25, trims), source, StubEncoder::new(), sink).unwrap();

        assert_eq!(state.lock().chunks.len(), 200);
        let requests = requests.lock();
        assert_eq!(requests.len(), 200);
        for &src_ts in requests.iter() {
            assert!(
                !(3_000_000..5_000_000).contains(&src_ts),
                "decoded {src_ts} µs inside the trim"
            );
        }
        // The frame right at the trim boundary maps to the trim's end.
        assert!(requests.contains(&5_000_000));
    }

    #[test]
    fn cancellation_mid_run_yields_cancelled_and_no_blob() {
        // 8 s at 30 fps; cancel once progress reports frame 60.
        let cancel = Arc::new(AtomicBool::new(false));
        let (sink, state) = RecordingSink::new();
        let flag = Arc::clone(&cancel);

        let result = drive(
            &spec(30, TrimSet::default()),
            stub_info(8_000_000),
            move || Ok(StubSource::new(8_000_000)),
            move || Ok(StubEncoder::new()),
            move || Ok(sink),
            Arc::clone(&cancel),
            move |p| {
                if p.current_frame == 60 {
                    flag.store(true, Ordering::Relaxed);
                }
            },
        );

        assert_eq!(result, Err(ExportError::Cancelled));
        let state = state.lock();
        assert!(!state.finalized, "a cancelled run must not finalize");
        assert!(state.chunks.len() < 240);

        // Cancelling again is a no-op.
        cancel.store(true, Ordering::Relaxed);
    }

    #[test]
    fn captured_description_satisfies_a_strict_sink() {
        let (sink, state) = RecordingSink::strict();
        run_drive(
            &spec(30, TrimSet::default()),
            StubSource::new(1_000_000),
            StubEncoder::new(),
            sink,
        )
        .unwrap();
        let state = state.lock();
        assert!(state.finalized);
        assert!(state.chunks[0].3, "first chunk must carry the description");
    }

    #[test]
    fn empty_output_timeline_is_invalid() {
        let trims = TrimSet::new(vec![TimeInterval::new(0, 1_000_000)]);
        let (sink, _) = RecordingSink::new();
        let result = run_drive(
            &spec(30, trims),
            StubSource::new(1_000_000),
            StubEncoder::new(),
            sink,
        );
        assert!(matches!(result, Err(ExportError::InvalidSpec(_))));
    }

    #[test]
    fn decode_failure_is_fatal_and_discards_output() {
        let mut source = StubSource::new(8_000_000);
        source.fail_at = Some((30, ExportError::DecodeFailed("bad packet".into())));
        let (sink, state) = RecordingSink::new();

        let result = run_drive(&spec(30, TrimSet::default()), source, StubEncoder::new(), sink);
        assert_eq!(result, Err(ExportError::DecodeFailed("bad packet".into())));
        assert!(!state.lock().finalized);
    }

    #[test]
    fn seek_failure_is_retried_once() {
        let mut source = StubSource::new(1_000_000);
        source.fail_at = Some((10, ExportError::SeekFailed("transient".into())));
        let calls = Arc::clone(&source.calls);
        let (sink, state) = RecordingSink::new();

        run_drive(&spec(30, TrimSet::default()), source, StubEncoder::new(), sink).unwrap();

        assert_eq!(state.lock().chunks.len(), 30);
        // 30 frames plus exactly one retry.
        assert_eq!(calls.load(Ordering::Relaxed), 31);
    }

    #[test]
    fn encoder_failure_surfaces_as_the_original_error() {
        let encoder = FailingEncoder { inner: StubEncoder::new(), fail_after: 20, seen: 0 };
        let (sink, state) = RecordingSink::new();

        let result = run_drive(
            &spec(30, TrimSet::default()),
            StubSource::new(8_000_000),
            encoder,
            sink,
        );
        assert_eq!(
            result,
            Err(ExportError::EncoderFailed("stub encoder gave up".into()))
        );
        assert!(!state.lock().finalized);
    }

    #[test]
    fn encoder_open_failure_surfaces_from_the_worker() {
        let (sink, state) = RecordingSink::new();
        let result = drive(
            &spec(30, TrimSet::default()),
            stub_info(8_000_000),
            move || Ok(StubSource::new(8_000_000)),
            move || Err::<StubEncoder, _>(ExportError::CodecUnsupported("no backend".into())),
            move || Ok(sink),
            Arc::new(AtomicBool::new(false)),
            |_| {},
        );
        assert_eq!(
            result,
            Err(ExportError::CodecUnsupported("no backend".into()))
        );
        assert!(!state.lock().finalized);
    }

    #[test]
    fn progress_counts_every_frame_to_completion() {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink_progress = Arc::clone(&progress);
        let (sink, _) = RecordingSink::new();

        drive(
            &spec(30, TrimSet::default()),
            stub_info(1_000_000),
            move || Ok(StubSource::new(1_000_000)),
            move || Ok(StubEncoder::new()),
            move || Ok(sink),
            Arc::new(AtomicBool::new(false)),
            move |p| sink_progress.lock().push(p),
        )
        .unwrap();

        let progress = progress.lock();
        assert_eq!(progress.len(), 30);
        assert_eq!(progress[0].current_frame, 1);
        assert_eq!(progress[29].current_frame, 30);
        assert!((progress[29].fraction - 1.0).abs() < 1e-9);
        assert!(progress.iter().all(|p| p.total_frames == 30));
    }
}
