use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty payload")]
    EmptyInput,
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),
}

/// Compressed bytes ↔ raw frames.
///
/// Stateless; one instance is shared by every session.
pub trait FrameCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError>;

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, CodecError>;
}
