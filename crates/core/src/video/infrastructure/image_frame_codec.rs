use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::shared::constants::DEFAULT_JPEG_QUALITY;
use crate::shared::frame::Frame;
use crate::video::domain::frame_codec::{CodecError, FrameCodec};

/// Decodes any format the `image` crate recognises into RGB frames and
/// encodes frames back as baseline JPEG.
pub struct ImageFrameCodec {
    quality: u8,
}

impl ImageFrameCodec {
    pub fn new() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// JPEG quality, clamped to 1..=100.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for ImageFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for ImageFrameCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| CodecError::Decode(e.to_string()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Frame::new(img.into_raw(), width, height, 3, 0))
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        let color = match frame.channels() {
            1 => ExtendedColorType::L8,
            3 => ExtendedColorType::Rgb8,
            other => return Err(CodecError::UnsupportedChannels(other)),
        };
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder
            .encode(frame.data(), frame.width(), frame.height(), color)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf)
    }
}
