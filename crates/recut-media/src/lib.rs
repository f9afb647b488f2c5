// crates/recut-media/src/lib.rs

pub mod encoder;
pub mod muxer;
pub mod pipeline;
pub mod poster;
pub mod probe;
pub mod reader;
pub mod worker;
mod helpers;   // internal — not pub, not re-exported

pub use pipeline::ExportPipeline;
pub use reader::SourceReader;
pub use worker::ExportWorker;
pub use recut_core::{ExportError, ExportEvent, ExportSpec, ProgressEvent};
