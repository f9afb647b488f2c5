// crates/recut-media/src/worker.rs
//
// ExportWorker: owns the background export threads and the per-job cancel
// flags. All public API the embedding application calls lives here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use recut_core::{ExportEvent, ExportSpec};

use crate::pipeline::ExportPipeline;
use crate::poster::save_poster_png;

pub struct ExportWorker {
    /// Shared result channel: progress, completion, failures, poster saves.
    pub rx: Receiver<ExportEvent>,
    tx:     Sender<ExportEvent>,

    shutdown: Arc<AtomicBool>,
    /// Per-job cancel flags keyed by job id so cancellation is targeted.
    /// Entries are inserted by `start_export` and removed when the job's
    /// thread finishes.
    cancels: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl ExportWorker {
    pub fn new() -> Self {
        let (tx, rx) = bounded(512);
        Self {
            rx,
            tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            cancels:  Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a background thread exporting `spec`. Progress and the final
    /// outcome arrive on `rx` tagged with `job_id`.
    ///
    /// Multiple jobs may run concurrently; each carries its own cancel
    /// flag.
    pub fn start_export(&self, job_id: Uuid, spec: ExportSpec) {
        let cancel = Arc::new(AtomicBool::new(self.shutdown.load(Ordering::Relaxed)));

        // Register the flag before spawning — avoids a window where
        // cancel_export is called before the thread has inserted it.
        self.cancels.lock().insert(job_id, Arc::clone(&cancel));

        let tx = self.tx.clone();
        let cancels_ref = Arc::clone(&self.cancels);
        thread::spawn(move || {
            let pipeline = ExportPipeline::with_cancel(spec, cancel);
            let progress_tx = tx.clone();
            let result = pipeline.run(move |progress| {
                let _ = progress_tx.send(ExportEvent::Progress { job_id, progress });
            });

            let _ = match result {
                Ok(blob) => tx.send(ExportEvent::Done { job_id, blob }),
                Err(error) => tx.send(ExportEvent::Failed { job_id, error }),
            };

            // Drop the flag once the job is done so the map doesn't grow
            // across a long session of exports.
            cancels_ref.lock().remove(&job_id);
        });
    }

    /// Signal the export identified by `job_id` to stop. The thread winds
    /// down at its next blocking point and reports
    /// `ExportError::Cancelled` on the result channel.
    pub fn cancel_export(&self, job_id: Uuid) {
        if let Some(flag) = self.cancels.lock().get(&job_id) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel every active job and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for flag in self.cancels.lock().values() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Decode the frame at `timestamp_us` and write it to `dest` as a PNG
    /// on a background thread.
    pub fn extract_poster(&self, path: PathBuf, timestamp_us: u64, dest: PathBuf) {
        let tx = self.tx.clone();
        let sd = Arc::clone(&self.shutdown);
        thread::spawn(move || {
            if sd.load(Ordering::Relaxed) {
                return;
            }
            match save_poster_png(&path, timestamp_us, &dest) {
                Ok(()) => {
                    let _ = tx.send(ExportEvent::PosterSaved { path: dest });
                }
                Err(e) => eprintln!("[poster] extract failed for {}: {e}", path.display()),
            }
        });
    }
}

impl Default for ExportWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recut_core::{ExportError, FrameRate, TrimSet};
    use std::time::Duration;

    #[test]
    fn missing_source_reports_failed_event() {
        let worker = ExportWorker::new();
        let job_id = Uuid::new_v4();
        worker.start_export(
            job_id,
            ExportSpec {
                width:       640,
                height:      360,
                frame_rate:  FrameRate::fps(30),
                bitrate_bps: 1_000_000,
                codec_id:    "avc1.640033".into(),
                source_uri:  "/nonexistent/recut-test-clip.mp4".into(),
                trims:       TrimSet::default(),
                layers:      Default::default(),
            },
        );

        let event = worker
            .rx
            .recv_timeout(Duration::from_secs(30))
            .expect("worker should report within the timeout");
        match event {
            ExportEvent::Failed { job_id: id, error } => {
                assert_eq!(id, job_id);
                assert!(matches!(error, ExportError::SourceUnavailable(_)));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn invalid_spec_reports_failed_event() {
        let worker = ExportWorker::new();
        let job_id = Uuid::new_v4();
        worker.start_export(
            job_id,
            ExportSpec {
                width:       641, // odd
                height:      360,
                frame_rate:  FrameRate::fps(30),
                bitrate_bps: 1_000_000,
                codec_id:    "avc1.640033".into(),
                source_uri:  "/nonexistent/recut-test-clip.mp4".into(),
                trims:       TrimSet::default(),
                layers:      Default::default(),
            },
        );

        let event = worker
            .rx
            .recv_timeout(Duration::from_secs(30))
            .expect("worker should report within the timeout");
        assert!(matches!(
            event,
            ExportEvent::Failed { error: ExportError::InvalidSpec(_), .. }
        ));
    }

    #[test]
    fn cancel_unknown_job_is_a_no_op() {
        let worker = ExportWorker::new();
        worker.cancel_export(Uuid::new_v4());
        worker.shutdown();
    }
}
