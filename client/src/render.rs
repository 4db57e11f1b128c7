//! A stand-in renderer: streams a gradient image bucket by bucket.

use std::time::Instant;

use log::info;
use rand::seq::SliceRandom;
use shared::models::{message::MessageHeader, region::Region};
use shared::networking::result::NetworkingResult;

use crate::Client;

#[derive(Debug, Clone, PartialEq)]
pub struct AovLayer {
    pub name: String,
    pub samples_per_pixel: u32,
}

impl AovLayer {
    pub fn new(name: impl Into<String>, samples_per_pixel: u32) -> Self {
        Self {
            name: name.into(),
            samples_per_pixel,
        }
    }

    /// The default layer, addressed by an empty name.
    pub fn beauty() -> Self {
        Self::new("", 4)
    }
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub width: u32,
    pub height: u32,
    pub bucket_size: u32,
    pub frame: f32,
    pub version: i32,
    pub aovs: Vec<AovLayer>,
    /// Send buckets in random order instead of scanline order.
    pub shuffle: bool,
}

impl RenderJob {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bucket_size: 64,
            frame: 1.0,
            version: 1,
            aovs: vec![AovLayer::beauty()],
            shuffle: true,
        }
    }

    fn region_area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Bytes the finished image takes across all AOVs.
    fn image_bytes(&self) -> i64 {
        let samples: i64 = self.aovs.iter().map(|a| a.samples_per_pixel as i64).sum();
        self.region_area() * samples * std::mem::size_of::<f32>() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub buckets: usize,
    pub messages: usize,
    pub elapsed_ms: u32,
}

/// Splits the image into buckets, scanline order, clipped at the edges.
pub fn buckets(width: u32, height: u32, bucket_size: u32) -> Vec<Region> {
    let size = bucket_size.max(1);
    let mut regions = Vec::new();
    for y in (0..height).step_by(size as usize) {
        for x in (0..width).step_by(size as usize) {
            let w = size.min(width - x);
            let h = size.min(height - y);
            regions.push(Region::new(x as i32, y as i32, w as i32, h as i32));
        }
    }
    regions
}

/// Sample value of the test pattern for one channel of one pixel.
pub fn shade(job: &RenderJob, aov_index: usize, x: u32, y: u32, channel: u32) -> f32 {
    let u = x as f32 / job.width.max(1) as f32;
    let v = y as f32 / job.height.max(1) as f32;
    let base = match channel {
        0 => u,
        1 => v,
        2 => 1.0 - u,
        _ => 1.0,
    };
    base / (aov_index + 1) as f32
}

pub fn bucket_pixels(job: &RenderJob, aov_index: usize, region: &Region) -> Vec<f32> {
    let spp = job.aovs[aov_index].samples_per_pixel;
    let mut pixels = Vec::with_capacity(region.area() as usize * spp as usize);
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            for channel in 0..spp {
                pixels.push(shade(job, aov_index, x as u32, y as u32, channel));
            }
        }
    }
    pixels
}

/// Streams one full image: open, every bucket for every AOV, close.
pub async fn render(client: &mut Client, job: &RenderJob) -> NetworkingResult<RenderStats> {
    let started = Instant::now();
    let mut regions = buckets(job.width, job.height, job.bucket_size);
    if job.shuffle {
        regions.shuffle(&mut rand::thread_rng());
    }

    let beauty = job.aovs.first().map(|a| a.samples_per_pixel).unwrap_or(4);
    let image = Region::new(0, 0, job.width as i32, job.height as i32);
    client
        .open_image(
            MessageHeader::new(image, beauty as i32)
                .with_frame(job.frame, job.version)
                .with_region_area(job.region_area()),
        )
        .await?;

    let mut messages = 1;
    for region in &regions {
        for (index, aov) in job.aovs.iter().enumerate() {
            let elapsed = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
            let header = MessageHeader::new(*region, aov.samples_per_pixel as i32)
                .with_frame(job.frame, job.version)
                .with_region_area(job.region_area())
                .with_aov(aov.name.clone())
                .with_stats(job.image_bytes(), elapsed);
            client
                .send_pixels(header, bucket_pixels(job, index, region))
                .await?;
            messages += 1;
        }
    }

    client.close_image().await?;
    messages += 1;

    let stats = RenderStats {
        buckets: regions.len(),
        messages,
        elapsed_ms: started.elapsed().as_millis().min(u32::MAX as u128) as u32,
    };
    info!(
        "Rendered frame {} version {}: {} buckets in {} ms",
        job.frame, job.version, stats.buckets, stats.elapsed_ms
    );
    Ok(stats)
}
