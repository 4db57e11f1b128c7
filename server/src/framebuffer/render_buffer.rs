use shared::models::{message::Message, region::Region, resolution::Resolution};
use shared::networking::codec::MAX_IMAGE_SAMPLES;

use crate::error::RouteError;

/// Pixel storage for one AOV of one image.
///
/// Samples are interleaved per pixel, rows top to bottom. Tiles overwrite
/// whatever was there before; nothing is accumulated.
#[derive(Debug, Clone)]
pub struct RenderBuffer {
    name: String,
    resolution: Resolution,
    samples_per_pixel: usize,
    pixels: Vec<f32>,
    coverage: i64,
}

impl RenderBuffer {
    pub fn new(name: impl Into<String>, resolution: Resolution, samples_per_pixel: usize) -> Self {
        Self {
            name: name.into(),
            resolution,
            samples_per_pixel,
            pixels: vec![0.0; resolution.pixel_count() * samples_per_pixel],
            coverage: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn samples_per_pixel(&self) -> usize {
        self.samples_per_pixel
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Sum of the areas of every tile merged so far.
    pub fn coverage(&self) -> i64 {
        self.coverage
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<f32>()
    }

    /// Completion in percent against the render region's area.
    pub fn progress(&self, region_area: i64) -> f32 {
        if region_area <= 0 {
            return 0.0;
        }
        (self.coverage as f64 * 100.0 / region_area as f64).min(100.0) as f32
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&[f32]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let start = self.offset(x as usize, y as usize);
        Some(&self.pixels[start..start + self.samples_per_pixel])
    }

    pub fn row(&self, y: u32) -> Option<&[f32]> {
        if y >= self.resolution.height {
            return None;
        }
        let start = self.offset(0, y as usize);
        let len = self.resolution.width as usize * self.samples_per_pixel;
        Some(&self.pixels[start..start + len])
    }

    /// Copies a pixel tile into the grid, row by row.
    pub fn merge(&mut self, message: &Message) -> Result<(), RouteError> {
        if message.samples_per_pixel() as i64 != self.samples_per_pixel as i64 {
            return Err(RouteError::ChannelMismatch {
                aov: self.name.clone(),
                expected: self.samples_per_pixel,
                actual: message.samples_per_pixel(),
            });
        }

        let region = message.region();
        if !region.fits_within(self.resolution.width, self.resolution.height) {
            return Err(RouteError::OutOfRangeGeometry(format!(
                "tile {:?} outside {}x{} image",
                region, self.resolution.width, self.resolution.height
            )));
        }

        let payload = message.payload().unwrap_or_default();
        let row_len = region.width as usize * self.samples_per_pixel;
        if payload.len() != row_len * region.height as usize {
            return Err(RouteError::OutOfRangeGeometry(format!(
                "tile {:?} carries {} samples",
                region,
                payload.len()
            )));
        }

        for (row, source) in payload.chunks_exact(row_len).enumerate() {
            let start = self.offset(region.x as usize, region.y as usize + row);
            self.pixels[start..start + row_len].copy_from_slice(source);
        }
        self.coverage += region.area();
        Ok(())
    }

    /// Grows the grid, keeping existing pixels at their coordinates.
    pub(crate) fn grow(&mut self, resolution: Resolution) {
        if self.resolution.covers(resolution) {
            return;
        }
        let resolution = self.resolution.max(resolution);
        let mut pixels = vec![0.0; resolution.pixel_count() * self.samples_per_pixel];
        let old_row = self.resolution.width as usize * self.samples_per_pixel;
        let new_row = resolution.width as usize * self.samples_per_pixel;
        if old_row > 0 {
            for (y, source) in self.pixels.chunks_exact(old_row).enumerate() {
                pixels[y * new_row..y * new_row + old_row].copy_from_slice(source);
            }
        }
        self.pixels = pixels;
        self.resolution = resolution;
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (y * self.resolution.width as usize + x) * self.samples_per_pixel
    }
}

/// Size an open declares. The origin plays no part.
pub(crate) fn declared_size(region: &Region) -> Option<Resolution> {
    if region.is_empty() {
        return None;
    }
    Some(Resolution::new(region.width as u32, region.height as u32))
}

/// Fails when a grid of `resolution` at `samples_per_pixel` would exceed
/// [`MAX_IMAGE_SAMPLES`].
pub(crate) fn check_allocation(
    resolution: Resolution,
    samples_per_pixel: usize,
) -> Result<(), RouteError> {
    let samples = (resolution.width as u64)
        .checked_mul(resolution.height as u64)
        .and_then(|pixels| pixels.checked_mul(samples_per_pixel as u64));
    match samples {
        Some(samples) if samples <= MAX_IMAGE_SAMPLES => Ok(()),
        _ => Err(RouteError::OutOfRangeGeometry(format!(
            "{}x{} image with {} samples per pixel exceeds {} samples",
            resolution.width, resolution.height, samples_per_pixel, MAX_IMAGE_SAMPLES
        ))),
    }
}

/// Smallest image that contains `region`, if it has a sane origin.
pub(crate) fn extent_of(region: &Region) -> Option<Resolution> {
    if region.is_empty() || region.x < 0 || region.y < 0 {
        return None;
    }
    let width = u32::try_from(region.right()).ok()?;
    let height = u32::try_from(region.bottom()).ok()?;
    Some(Resolution::new(width, height))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use shared::models::message::MessageHeader;

    use super::*;

    fn tile(x: i32, y: i32, w: i32, h: i32, value: f32) -> Message {
        let header = MessageHeader::new(Region::new(x, y, w, h), 3).with_region_area(64);
        Message::pixels(header, vec![value; (w * h * 3) as usize]).unwrap()
    }

    fn buffer() -> RenderBuffer {
        RenderBuffer::new("RGBA", Resolution::new(8, 8), 3)
    }

    #[test]
    fn starts_zeroed() {
        let buffer = buffer();
        assert_eq!(buffer.pixels().len(), 8 * 8 * 3);
        assert!(buffer.pixels().iter().all(|v| *v == 0.0));
        assert_eq!(buffer.coverage(), 0);
    }

    #[test]
    fn merge_writes_only_the_tile() {
        let mut buffer = buffer();
        buffer.merge(&tile(2, 3, 2, 2, 1.0)).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let inside = (2..4).contains(&x) && (3..5).contains(&y);
                let expected = if inside { 1.0 } else { 0.0 };
                assert_eq!(buffer.pixel(x, y).unwrap(), &[expected; 3]);
            }
        }
        assert_eq!(buffer.coverage(), 4);
    }

    #[test]
    fn merge_keeps_channel_order() {
        let mut buffer = buffer();
        let header = MessageHeader::new(Region::new(7, 7, 1, 1), 3);
        buffer
            .merge(&Message::pixels(header, vec![0.1, 0.2, 0.3]).unwrap())
            .unwrap();
        assert_eq!(buffer.pixel(7, 7).unwrap(), &[0.1, 0.2, 0.3]);
        assert_eq!(&buffer.row(7).unwrap()[21..], &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn merge_rejects_tile_outside_image() {
        let mut buffer = buffer();
        let err = buffer.merge(&tile(6, 6, 4, 4, 1.0)).unwrap_err();
        assert!(matches!(err, RouteError::OutOfRangeGeometry(_)));
        assert_eq!(buffer.coverage(), 0);
    }

    #[test]
    fn merge_rejects_wrong_channel_depth() {
        let mut buffer = RenderBuffer::new("N", Resolution::new(8, 8), 4);
        let err = buffer.merge(&tile(0, 0, 1, 1, 1.0)).unwrap_err();
        assert_eq!(
            err,
            RouteError::ChannelMismatch {
                aov: "N".to_string(),
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn overlapping_tiles_last_write_wins() {
        let mut buffer = buffer();
        buffer.merge(&tile(0, 0, 4, 4, 1.0)).unwrap();
        buffer.merge(&tile(2, 2, 4, 4, 0.5)).unwrap();
        assert_eq!(buffer.pixel(1, 1).unwrap(), &[1.0; 3]);
        assert_eq!(buffer.pixel(3, 3).unwrap(), &[0.5; 3]);
    }

    #[test]
    fn progress_reaches_one_hundred() {
        let mut buffer = buffer();
        buffer.merge(&tile(0, 0, 8, 4, 1.0)).unwrap();
        assert_eq!(buffer.progress(64), 50.0);
        buffer.merge(&tile(0, 4, 8, 4, 1.0)).unwrap();
        assert_eq!(buffer.coverage(), 64);
        assert_eq!(buffer.progress(64), 100.0);
        buffer.merge(&tile(0, 4, 8, 4, 1.0)).unwrap();
        assert_eq!(buffer.progress(64), 100.0);
        assert_eq!(buffer.progress(0), 0.0);
    }

    #[test]
    fn grow_keeps_pixels_in_place() {
        let mut buffer = RenderBuffer::new("RGBA", Resolution::new(2, 2), 3);
        buffer.merge(&tile(1, 1, 1, 1, 1.0)).unwrap();
        buffer.grow(Resolution::new(4, 3));
        assert_eq!(buffer.resolution(), Resolution::new(4, 3));
        assert_eq!(buffer.pixel(1, 1).unwrap(), &[1.0; 3]);
        assert_eq!(buffer.pixels().iter().filter(|v| **v != 0.0).count(), 3);
    }

    #[test]
    fn extent_needs_a_sane_origin() {
        assert_eq!(
            extent_of(&Region::new(4, 8, 16, 16)),
            Some(Resolution::new(20, 24))
        );
        assert_eq!(extent_of(&Region::new(-1, 0, 16, 16)), None);
        assert_eq!(extent_of(&Region::new(0, 0, 0, 16)), None);
    }

    #[test]
    fn declared_size_ignores_origin() {
        assert_eq!(
            declared_size(&Region::new(10, 10, 320, 240)),
            Some(Resolution::new(320, 240))
        );
        assert_eq!(declared_size(&Region::new(0, 0, -320, 240)), None);
    }

    #[test]
    fn allocation_limit_counts_every_sample() {
        assert!(check_allocation(Resolution::new(8192, 8192), 4).is_ok());
        assert!(matches!(
            check_allocation(Resolution::new(8192, 8192), 5),
            Err(RouteError::OutOfRangeGeometry(_))
        ));
        assert!(check_allocation(Resolution::new(u32::MAX, u32::MAX), usize::MAX).is_err());
    }

    fn tile_strategy() -> impl Strategy<Value = Message> {
        (0i32..8, 0i32..8, 1i32..5, 1i32..5, -4.0f32..4.0).prop_map(|(x, y, w, h, v)| {
            let w = w.min(8 - x);
            let h = h.min(8 - y);
            tile(x, y, w, h, v)
        })
    }

    proptest! {
        #[test]
        fn merging_twice_equals_merging_once(message in tile_strategy()) {
            let mut once = buffer();
            once.merge(&message).unwrap();
            let mut twice = buffer();
            twice.merge(&message).unwrap();
            twice.merge(&message).unwrap();
            prop_assert_eq!(once.pixels(), twice.pixels());
        }

        #[test]
        fn disjoint_tiles_commute(a in tile_strategy(), b in tile_strategy()) {
            prop_assume!(!a.region().intersects(&b.region()));
            let mut ab = buffer();
            ab.merge(&a).unwrap();
            ab.merge(&b).unwrap();
            let mut ba = buffer();
            ba.merge(&b).unwrap();
            ba.merge(&a).unwrap();
            prop_assert_eq!(ab.pixels(), ba.pixels());
        }

        #[test]
        fn coverage_never_decreases(tiles in prop::collection::vec(tile_strategy(), 1..12)) {
            let mut buffer = buffer();
            let mut last = 0;
            for message in &tiles {
                buffer.merge(message).unwrap();
                prop_assert!(buffer.coverage() >= last);
                last = buffer.coverage();
            }
        }
    }
}
