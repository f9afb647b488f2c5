// crates/recut-core/src/error.rs
//
// The single error surface for an export run. Every component maps its
// failures into one of these kinds; the pipeline propagates the first fatal
// one unchanged (cleanup failures are logged, never allowed to shadow it).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    /// The export description failed validation: odd dimensions, zero
    /// framerate, inverted trim intervals, or an empty output timeline.
    #[error("invalid export spec: {0}")]
    InvalidSpec(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// Retryable: the pipeline issues one fresh seek per frame before
    /// treating a second failure as fatal.
    #[error("seek failed: {0}")]
    SeekFailed(String),

    #[error("compositor init failed: {0}")]
    CompositorInit(String),

    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("codec unsupported: {0}")]
    CodecUnsupported(String),

    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    #[error("muxer init failed: {0}")]
    MuxerInit(String),

    /// The first chunk handed to the muxer carried no codec description.
    #[error("first chunk carried no codec description")]
    MissingCodecDescription,

    #[error("mux failed: {0}")]
    MuxFailed(String),

    /// The run was cancelled. Never silently swallowed — a cancelled export
    /// always surfaces as this error, with cleanup still performed.
    #[error("export cancelled")]
    Cancelled,
}
