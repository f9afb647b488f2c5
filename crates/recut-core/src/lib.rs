// crates/recut-core/src/lib.rs

pub mod compositor;
pub mod error;
pub mod events;
pub mod frame;
pub mod helpers;
pub mod layers;
pub mod spec;
pub mod time;

pub use compositor::{FrameCompositor, RenderConfig};
pub use error::ExportError;
pub use events::{ExportEvent, ProgressEvent};
pub use frame::{CodecDescription, CodedChunk, ColorSpace, CompositedFrame, DecodedFrame, SourceInfo};
pub use layers::EditLayers;
pub use spec::{ExportSpec, FrameRate};
pub use time::{TimeInterval, TimeMap, TrimSet};
