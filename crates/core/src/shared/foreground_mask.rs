use crate::shared::constants::{MASK_FOREGROUND, MASK_SHADOW};

/// Single-channel per-pixel classification produced by a background model.
///
/// Values are `0` (background), [`MASK_SHADOW`] and [`MASK_FOREGROUND`]
/// until a threshold step collapses them to binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForegroundMask {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ForegroundMask {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize),
            "mask length must equal width * height"
        );
        Self {
            data,
            width,
            height,
        }
    }

    pub fn zeros(width: u32, height: u32) -> Self {
        Self::new(vec![0; (width as usize) * (height as usize)], width, height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Number of pixels marked as foreground.
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == MASK_FOREGROUND).count()
    }

    pub fn shadow_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == MASK_SHADOW).count()
    }
}
