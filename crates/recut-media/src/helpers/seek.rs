// crates/recut-media/src/helpers/seek.rs
//
// Seek helper wrapping ffmpeg's avformat seek with consistent soft-fail
// behaviour. All container seeks route through here so the guard and log
// pattern live in one place; the caller chooses hard error vs soft-fail
// via the return value.

use ffmpeg_the_third as ffmpeg;

/// Seek `ictx` to `target_us` microseconds from the start of the file.
/// `AV_TIME_BASE` is one tick per microsecond, so no rescale is needed.
///
/// Returns `true` if the seek succeeded (or was skipped because the target
/// is 0). Returns `false` on failure — the demuxer stays wherever it is and
/// the caller's PTS-based frame filtering decides what to do next.
///
/// # Why backward seek (`..=target`)
/// A forward seek lands on the keyframe AT OR AFTER the target. When the
/// target falls mid-GOP — every frame following a trim boundary — that
/// keyframe may be seconds away and every frame in between is absent from
/// the decode stream. A backward seek lands on the keyframe BEFORE the
/// target; the pre-roll frames are burned through decode-only, so the
/// captured frame is still exactly at the target.
///
/// # Why skip at 0
/// `avformat_seek_file(max_ts=0)` returns EPERM on some platforms when
/// called on a freshly-opened context. The demuxer starts at position 0
/// anyway, so the seek is unnecessary.
pub fn seek_to_us(
    ictx:      &mut ffmpeg::format::context::Input,
    target_us: i64,
    label:     &str,
) -> bool {
    if target_us <= 0 {
        return true;
    }
    match ictx.seek(target_us, ..=target_us) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("[seek] failed in {label} at {target_us} µs: {e}");
            false
        }
    }
}
