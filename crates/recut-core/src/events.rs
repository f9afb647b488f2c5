// crates/recut-core/src/events.rs
//
// Messages sent from export worker threads back to the caller.
// No ffmpeg and no channel types here — just the payloads.

use std::path::PathBuf;

use uuid::Uuid;

use crate::error::ExportError;

/// Per-frame progress report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEvent {
    /// Frames completed so far (1-based after the first frame).
    pub current_frame: u64,
    pub total_frames:  u64,
    /// `current_frame / total_frames`, in [0.0, 1.0].
    pub fraction: f64,
    /// Smoothed wall-clock estimate of the time left.
    pub est_remaining_us: u64,
}

/// Results sent from export background threads to the owner of the worker.
#[derive(Debug)]
pub enum ExportEvent {
    Progress {
        job_id:   Uuid,
        progress: ProgressEvent,
    },
    /// Export completed; `blob` is the finalized container.
    Done {
        job_id: Uuid,
        blob:   Vec<u8>,
    },
    /// Export failed or was cancelled (`ExportError::Cancelled`).
    Failed {
        job_id: Uuid,
        error:  ExportError,
    },
    /// A poster frame was written to disk.
    PosterSaved {
        path: PathBuf,
    },
}
