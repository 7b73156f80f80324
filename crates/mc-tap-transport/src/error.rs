use mc_tap_proto::ProtoError;
use thiserror::Error;

/// Boxed error returned by pipeline stages defined outside this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("frame of {length} bytes exceeds limit of {max}")]
    FrameTooLong { length: usize, max: usize },

    #[error("no pipeline stage named {0:?}")]
    NoSuchHandler(String),

    #[error("pipeline stage {0:?} already exists")]
    DuplicateHandler(String),

    #[error("stage {stage:?} expected {expected}")]
    UnexpectedItem { stage: String, expected: &'static str },

    #[error("channel is closed")]
    ChannelClosed,

    #[error("stage {stage:?} failed: {source}")]
    Handler {
        stage: String,
        #[source]
        source: BoxError,
    },
}
