/// Mask value for pixels that deviate from the learned background.
pub const MASK_FOREGROUND: u8 = 255;
/// Mask value for pixels classified as a shadow cast on the background.
pub const MASK_SHADOW: u8 = 127;

/// Blobs below this many pixels are treated as noise.
pub const DEFAULT_MIN_AREA: f64 = 500.0;
/// Side of the square structuring element used for closing/opening.
pub const DEFAULT_KERNEL_SIZE: usize = 5;
/// Binary threshold cut; shadow values fall below it.
pub const DEFAULT_THRESHOLD: u8 = 200;

pub const DEFAULT_HISTORY: usize = 500;
pub const DEFAULT_WARMUP_ITERATIONS: usize = 30;
pub const DEFAULT_WARMUP_LEARNING_RATE: f64 = 0.1;

pub const STROKE_WIDTH: u32 = 2;
/// RGB highlight used for motion rectangles.
pub const HIGHLIGHT_COLOR: [u8; 3] = [255, 0, 0];

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Outbound frames buffered per viewer before frames are skipped.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 4;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

pub const DEFAULT_STREAM_PATH: &str = "/ws/stream";
