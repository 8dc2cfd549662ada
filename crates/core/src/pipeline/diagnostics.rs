use std::path::{Path, PathBuf};

use crate::shared::foreground_mask::ForegroundMask;

/// Optional observer of intermediate pipeline products.
///
/// Errors are reported to the caller, which logs them and carries on; a
/// hook can never fail a frame.
pub trait DiagnosticHook: Send + Sync {
    fn on_mask(&self, index: usize, mask: &ForegroundMask)
        -> Result<(), Box<dyn std::error::Error>>;
}

/// Writes every raw foreground mask as `mask-<index>.png` into a directory.
pub struct MaskDumpHook {
    dir: PathBuf,
}

impl MaskDumpHook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("mask-{index}.png"))
    }
}

impl DiagnosticHook for MaskDumpHook {
    fn on_mask(
        &self,
        index: usize,
        mask: &ForegroundMask,
    ) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&self.dir)?;
        let img = image::GrayImage::from_raw(mask.width(), mask.height(), mask.data().to_vec())
            .ok_or("Failed to create image from mask data")?;
        img.save(self.path_for(index))?;
        Ok(())
    }
}
