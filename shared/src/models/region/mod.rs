use serde::{Deserialize, Serialize};

/// A pixel rectangle as carried on the wire.
///
/// Coordinates are signed because the producer sends plain ints; the codec
/// keeps whatever it receives and range checks happen when a tile is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Pixel count, zero for degenerate rectangles.
    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Bounding box of both rectangles.
    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Region::new(x, y, (right - x as i64) as i32, (bottom - y as i64) as i32)
    }

    /// True when the rectangle lies fully inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty()
            && self.x >= 0
            && self.y >= 0
            && self.right() <= width as i64
            && self.bottom() <= height as i64
    }

    pub fn intersects(&self, other: &Region) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.x as i64) < other.right()
            && (other.x as i64) < self.right()
            && (self.y as i64) < other.bottom()
            && (other.y as i64) < self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_covers_both_rectangles() {
        let a = Region::new(0, 0, 16, 16);
        let b = Region::new(32, 8, 16, 16);
        assert_eq!(a.union(&b), Region::new(0, 0, 48, 24));
    }

    #[test]
    fn union_ignores_empty_rectangles() {
        let a = Region::new(4, 4, 8, 8);
        assert_eq!(a.union(&Region::default()), a);
        assert_eq!(Region::default().union(&a), a);
    }

    #[test]
    fn fits_within_checks_every_edge() {
        assert!(Region::new(0, 0, 320, 240).fits_within(320, 240));
        assert!(!Region::new(1, 0, 320, 240).fits_within(320, 240));
        assert!(!Region::new(-1, 0, 16, 16).fits_within(320, 240));
        assert!(!Region::new(0, 0, 0, 16).fits_within(320, 240));
    }

    #[test]
    fn intersects_is_exclusive_on_edges() {
        let a = Region::new(0, 0, 16, 16);
        assert!(!a.intersects(&Region::new(16, 0, 16, 16)));
        assert!(a.intersects(&Region::new(15, 15, 16, 16)));
    }
}
