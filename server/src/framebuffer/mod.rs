pub mod render_buffer;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use log::debug;
use parking_lot::RwLock;
use serde::Serialize;
use shared::models::{message::Message, region::Region, resolution::Resolution};

use crate::error::RouteError;

pub use self::render_buffer::RenderBuffer;
use self::render_buffer::{check_allocation, declared_size, extent_of};

/// Name the default layer is stored under. Messages address it with an
/// empty AOV name.
pub const DEFAULT_AOV: &str = "RGBA";

pub fn aov_key(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_AOV
    } else {
        name
    }
}

/// Identity of a FrameBuffer. Frames compare bitwise so that every key
/// matches itself.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FrameKey {
    pub frame: f32,
    pub version: i32,
}

impl FrameKey {
    pub fn new(frame: f32, version: i32) -> Self {
        Self { frame, version }
    }
}

impl PartialEq for FrameKey {
    fn eq(&self, other: &Self) -> bool {
        self.frame.to_bits() == other.frame.to_bits() && self.version == other.version
    }
}

impl Eq for FrameKey {}

/// Metadata copied out of a FrameBuffer for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameBufferInfo {
    pub frame: f32,
    pub version: i32,
    pub width: u32,
    pub height: u32,
    pub aovs: Vec<String>,
    pub progress: f32,
    pub region_area: i64,
    pub active_region: Option<Region>,
    pub elapsed_time: u32,
    pub ram_bytes: i64,
    pub peak_ram_bytes: i64,
    pub memory_bytes: usize,
    pub finalized: bool,
    pub created_at: DateTime<Local>,
}

#[derive(Debug)]
struct FrameBufferState {
    resolution: Resolution,
    /// Set once an open has fixed the image size.
    declared: bool,
    frame: f32,
    render_buffers: IndexMap<String, RenderBuffer>,
    region_area: i64,
    active_region: Option<Region>,
    elapsed_time: u32,
    ram_bytes: i64,
    peak_ram_bytes: i64,
    finalized: bool,
}

/// One logical image: every AOV of one (frame, version) pair.
///
/// All pixel access goes through the internal lock, and a tile is merged
/// under a single write guard, so readers see a tile either entirely or not
/// at all.
#[derive(Debug)]
pub struct FrameBuffer {
    key: FrameKey,
    created_at: DateTime<Local>,
    state: RwLock<FrameBufferState>,
}

impl FrameBuffer {
    /// A FrameBuffer whose size was declared by an open.
    pub fn declared(key: FrameKey, resolution: Resolution) -> Self {
        Self::with_state(key, resolution, true)
    }

    /// A FrameBuffer created by a tile that arrived before any open; it
    /// grows to fit later tiles until an open declares its size.
    pub fn provisional(key: FrameKey, resolution: Resolution) -> Self {
        Self::with_state(key, resolution, false)
    }

    fn with_state(key: FrameKey, resolution: Resolution, declared: bool) -> Self {
        Self {
            key,
            created_at: Local::now(),
            state: RwLock::new(FrameBufferState {
                resolution,
                declared,
                frame: key.frame,
                render_buffers: IndexMap::new(),
                region_area: resolution.pixel_count() as i64,
                active_region: None,
                elapsed_time: 0,
                ram_bytes: 0,
                peak_ram_bytes: 0,
                finalized: false,
            }),
        }
    }

    pub fn key(&self) -> FrameKey {
        self.key
    }

    pub fn version(&self) -> i32 {
        self.key.version
    }

    /// Frame number of the latest message routed here.
    pub fn frame(&self) -> f32 {
        self.state.read().frame
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn resolution(&self) -> Resolution {
        self.state.read().resolution
    }

    pub fn aov_names(&self) -> Vec<String> {
        self.state.read().render_buffers.keys().cloned().collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.state.read().finalized
    }

    pub fn active_region(&self) -> Option<Region> {
        self.state.read().active_region
    }

    pub fn elapsed_time(&self) -> u32 {
        self.state.read().elapsed_time
    }

    pub fn ram_bytes(&self) -> i64 {
        self.state.read().ram_bytes
    }

    pub fn peak_ram_bytes(&self) -> i64 {
        self.state.read().peak_ram_bytes
    }

    pub fn memory_bytes(&self) -> usize {
        self.state
            .read()
            .render_buffers
            .values()
            .map(RenderBuffer::memory_bytes)
            .sum()
    }

    /// Completion of the default layer, or of the first layer if the default
    /// one has not shown up.
    pub fn progress(&self) -> f32 {
        let state = self.state.read();
        state.progress()
    }

    pub fn info(&self) -> FrameBufferInfo {
        let state = self.state.read();
        FrameBufferInfo {
            frame: state.frame,
            version: self.key.version,
            width: state.resolution.width,
            height: state.resolution.height,
            aovs: state.render_buffers.keys().cloned().collect(),
            progress: state.progress(),
            region_area: state.region_area,
            active_region: state.active_region,
            elapsed_time: state.elapsed_time,
            ram_bytes: state.ram_bytes,
            peak_ram_bytes: state.peak_ram_bytes,
            memory_bytes: state.render_buffers.values().map(RenderBuffer::memory_bytes).sum(),
            finalized: state.finalized,
            created_at: self.created_at,
        }
    }

    /// Runs `f` against one AOV under the read lock.
    pub fn read_aov<R>(&self, aov: &str, f: impl FnOnce(&RenderBuffer) -> R) -> Option<R> {
        let state = self.state.read();
        state.render_buffers.get(aov_key(aov)).map(f)
    }

    /// Copies out the samples of one pixel.
    pub fn pixel(&self, aov: &str, x: u32, y: u32) -> Option<Vec<f32>> {
        self.read_aov(aov, |buffer| buffer.pixel(x, y).map(<[f32]>::to_vec))
            .flatten()
    }

    /// Applies an open. Repeated opens only make sure the AOV exists and,
    /// for a provisional FrameBuffer, fix its size.
    pub fn open(&self, message: &Message) -> Result<(), RouteError> {
        let samples_per_pixel = positive_depth(message)?;
        let resolution = declared_size(&message.region()).ok_or_else(|| {
            RouteError::OutOfRangeGeometry(format!("open with region {:?}", message.region()))
        })?;

        let mut state = self.state.write();
        if !state.declared {
            state.grow(resolution, samples_per_pixel)?;
            state.declared = true;
        }
        if message.header().region_area > 0 {
            state.region_area = message.header().region_area;
        }
        state.frame = message.frame();
        let aov = aov_key(message.aov_name());
        state.ensure_aov(aov, samples_per_pixel)?;
        Ok(())
    }

    /// Merges a pixel tile and updates the image metadata.
    pub fn merge(&self, message: &Message) -> Result<(), RouteError> {
        let samples_per_pixel = positive_depth(message)?;
        let region = message.region();

        let mut state = self.state.write();
        if !state.declared {
            let extent = extent_of(&region).ok_or_else(|| {
                RouteError::OutOfRangeGeometry(format!("tile {:?} has no valid extent", region))
            })?;
            state.grow(extent, samples_per_pixel)?;
        }

        let aov = aov_key(message.aov_name());
        state
            .ensure_aov(aov, samples_per_pixel)?
            .merge(message)?;

        let header = message.header();
        state.active_region = Some(match state.active_region {
            Some(active) => active.union(&region),
            None => region,
        });
        if header.region_area > 0 {
            state.region_area = header.region_area;
        }
        state.frame = header.frame;
        state.elapsed_time = header.elapsed_time;
        state.ram_bytes = header.ram_bytes;
        state.peak_ram_bytes = state.peak_ram_bytes.max(header.ram_bytes);
        Ok(())
    }

    /// Marks the image closed. Tiles keep being accepted afterwards.
    pub fn close(&self) {
        self.state.write().finalized = true;
    }
}

impl FrameBufferState {
    fn progress(&self) -> f32 {
        self.render_buffers
            .get(DEFAULT_AOV)
            .or_else(|| self.render_buffers.values().next())
            .map(|buffer| buffer.progress(self.region_area))
            .unwrap_or(0.0)
    }

    /// Grows every AOV to hold `resolution`, refusing sizes that a layer of
    /// `samples_per_pixel` or any existing layer could not allocate.
    fn grow(
        &mut self,
        resolution: Resolution,
        samples_per_pixel: usize,
    ) -> Result<(), RouteError> {
        if self.resolution.covers(resolution) {
            return Ok(());
        }
        let target = self.resolution.max(resolution);
        let deepest = self
            .render_buffers
            .values()
            .map(RenderBuffer::samples_per_pixel)
            .fold(samples_per_pixel, usize::max);
        check_allocation(target, deepest)?;

        self.resolution = target;
        for buffer in self.render_buffers.values_mut() {
            buffer.grow(target);
        }
        Ok(())
    }

    /// Finds the AOV, allocating it on first use. The default layer is
    /// always kept first.
    fn ensure_aov(
        &mut self,
        aov: &str,
        samples_per_pixel: usize,
    ) -> Result<&mut RenderBuffer, RouteError> {
        if !self.render_buffers.contains_key(aov) {
            check_allocation(self.resolution, samples_per_pixel)?;
            debug!(
                "Allocating aov {} ({} samples) at {}x{}",
                aov, samples_per_pixel, self.resolution.width, self.resolution.height
            );
            let buffer = RenderBuffer::new(aov, self.resolution, samples_per_pixel);
            if aov == DEFAULT_AOV {
                self.render_buffers.shift_insert(0, aov.to_string(), buffer);
            } else {
                self.render_buffers.insert(aov.to_string(), buffer);
            }
        }

        let buffer = self
            .render_buffers
            .get_mut(aov)
            .ok_or_else(|| RouteError::OutOfRangeGeometry(format!("aov {} missing", aov)))?;
        if buffer.samples_per_pixel() != samples_per_pixel {
            return Err(RouteError::ChannelMismatch {
                aov: aov.to_string(),
                expected: buffer.samples_per_pixel(),
                actual: samples_per_pixel as i32,
            });
        }
        Ok(buffer)
    }
}

pub(crate) fn positive_depth(message: &Message) -> Result<usize, RouteError> {
    match usize::try_from(message.samples_per_pixel()) {
        Ok(depth) if depth > 0 => Ok(depth),
        _ => Err(RouteError::OutOfRangeGeometry(format!(
            "{} samples per pixel",
            message.samples_per_pixel()
        ))),
    }
}
