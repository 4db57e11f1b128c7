use serde::{Deserialize, Serialize};

/// Declared size of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Smallest resolution that covers both `self` and `other`.
    pub fn max(&self, other: Resolution) -> Resolution {
        Resolution::new(self.width.max(other.width), self.height.max(other.height))
    }

    pub fn covers(&self, other: Resolution) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}
