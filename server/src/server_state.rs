use std::sync::Arc;

use log::{debug, info};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use shared::models::message::{Message, MessageKind};
use shared::networking::server::ServerConfig;

use crate::error::RouteError;
use crate::framebuffer::render_buffer::{check_allocation, declared_size, extent_of};
use crate::framebuffer::{aov_key, positive_depth, FrameBuffer, FrameKey, DEFAULT_AOV};
use crate::metrics::ServerMetrics;

/// Smallest accepted capacity. One slot is always left for incoming images
/// next to a pinned selection.
pub const MIN_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// What routing did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Created,
    Opened,
    Merged,
    Finalized,
    /// Close for an image that is not (or no longer) held.
    Ignored,
    /// Tile for a disabled AOV.
    Skipped,
    /// The FrameBuffer was evicted as soon as it was created.
    Evicted,
}

#[derive(Debug)]
struct Inner {
    /// Creation order, oldest first.
    framebuffers: Vec<Arc<FrameBuffer>>,
    capacity: usize,
    selected: Option<FrameKey>,
    multiframe: bool,
    enable_aovs: bool,
}

impl Inner {
    fn find(&self, key: FrameKey) -> Option<&Arc<FrameBuffer>> {
        self.framebuffers.iter().find(|fb| fb.key() == key)
    }

    fn selected_index(&self) -> Option<usize> {
        let selected = self.selected?;
        self.framebuffers.iter().position(|fb| fb.key() == selected)
    }

    /// Drops the oldest unpinned FrameBuffers until the list fits.
    fn enforce_capacity(&mut self) -> Vec<Arc<FrameBuffer>> {
        let mut evicted = Vec::new();
        while self.framebuffers.len() > self.capacity {
            let selected = self.selected;
            let Some(index) = self
                .framebuffers
                .iter()
                .position(|fb| Some(fb.key()) != selected)
            else {
                break;
            };
            evicted.push(self.framebuffers.remove(index));
        }
        evicted
    }
}

/// The ordered set of FrameBuffers shared by every connection and the
/// consumer.
///
/// The list lock covers creation, eviction and selection only; pixel merges
/// take the per-FrameBuffer lock, so producers writing different images do
/// not block each other.
#[derive(Debug)]
pub struct ServerState {
    inner: RwLock<Inner>,
    metrics: ServerMetrics,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                framebuffers: Vec::new(),
                capacity: config.capacity.max(MIN_CAPACITY),
                selected: None,
                multiframe: config.multiframe,
                enable_aovs: config.enable_aovs,
            }),
            metrics: ServerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Applies one decoded message.
    pub fn route(&self, message: &Message) -> Result<RouteOutcome, RouteError> {
        let result = match message.kind() {
            MessageKind::Open => self.route_open(message),
            MessageKind::Pixels => self.route_pixels(message),
            MessageKind::Close => Ok(self.route_close(message)),
        };
        match result {
            Ok(_) => self.metrics.record_routed(),
            Err(_) => self.metrics.record_dropped(),
        }
        result
    }

    // Geometry is checked before the list is touched, so a rejected message
    // never creates or evicts a FrameBuffer.
    fn route_open(&self, message: &Message) -> Result<RouteOutcome, RouteError> {
        let resolution = declared_size(&message.region()).ok_or_else(|| {
            RouteError::OutOfRangeGeometry(format!("open with region {:?}", message.region()))
        })?;
        check_allocation(resolution, positive_depth(message)?)?;
        if !self.accepts_aov(message.aov_name()) {
            return Ok(RouteOutcome::Skipped);
        }

        let key = self.key_for(message);
        let (framebuffer, created) =
            self.find_or_insert(key, || FrameBuffer::declared(key, resolution));
        let Some(framebuffer) = framebuffer else {
            return Ok(RouteOutcome::Evicted);
        };
        framebuffer.open(message)?;
        Ok(if created {
            RouteOutcome::Created
        } else {
            RouteOutcome::Opened
        })
    }

    fn route_pixels(&self, message: &Message) -> Result<RouteOutcome, RouteError> {
        let extent = extent_of(&message.region()).ok_or_else(|| {
            RouteError::OutOfRangeGeometry(format!("tile {:?}", message.region()))
        })?;
        check_allocation(extent, positive_depth(message)?)?;
        if !self.accepts_aov(message.aov_name()) {
            debug!("Skipping tile for disabled aov {}", message.aov_name());
            return Ok(RouteOutcome::Skipped);
        }

        let key = self.key_for(message);
        let (framebuffer, _) = self.find_or_insert(key, || FrameBuffer::provisional(key, extent));
        let Some(framebuffer) = framebuffer else {
            return Ok(RouteOutcome::Evicted);
        };
        framebuffer.merge(message)?;
        Ok(RouteOutcome::Merged)
    }

    fn route_close(&self, message: &Message) -> RouteOutcome {
        let key = self.key_for(message);
        match self.find_by_key(key) {
            Some(framebuffer) => {
                framebuffer.close();
                info!("Closed frame {} version {}", key.frame, key.version);
                RouteOutcome::Finalized
            }
            None => {
                debug!("Close for unknown frame {} version {}", key.frame, key.version);
                RouteOutcome::Ignored
            }
        }
    }

    /// Looks the key up, creating and inserting a FrameBuffer if needed.
    /// Returns `None` when the new FrameBuffer had to be evicted right away.
    fn find_or_insert(
        &self,
        key: FrameKey,
        create: impl FnOnce() -> FrameBuffer,
    ) -> (Option<Arc<FrameBuffer>>, bool) {
        let inner = self.inner.upgradable_read();
        if let Some(framebuffer) = inner.find(key) {
            return (Some(Arc::clone(framebuffer)), false);
        }

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        let framebuffer = Arc::new(create());
        let resolution = framebuffer.resolution();
        info!(
            "Created frame {} version {} ({}x{})",
            key.frame, key.version, resolution.width, resolution.height
        );
        inner.framebuffers.push(Arc::clone(&framebuffer));

        let evicted = inner.enforce_capacity();
        drop(inner);
        self.log_evictions(&evicted);
        if evicted.iter().any(|fb| fb.key() == key) {
            return (None, true);
        }
        (Some(framebuffer), true)
    }

    fn log_evictions(&self, evicted: &[Arc<FrameBuffer>]) {
        if evicted.is_empty() {
            return;
        }
        self.metrics.record_evictions(evicted.len());
        for framebuffer in evicted {
            info!(
                "Evicted frame {} version {}",
                framebuffer.frame(),
                framebuffer.version()
            );
        }
    }

    fn key_for(&self, message: &Message) -> FrameKey {
        let frame = if self.inner.read().multiframe {
            message.frame()
        } else {
            0.0
        };
        FrameKey::new(frame, message.version())
    }

    fn accepts_aov(&self, aov_name: &str) -> bool {
        self.inner.read().enable_aovs || aov_key(aov_name) == DEFAULT_AOV
    }

    fn find_by_key(&self, key: FrameKey) -> Option<Arc<FrameBuffer>> {
        self.inner.read().find(key).cloned()
    }

    /// Every FrameBuffer, oldest first. The list lock is held only while the
    /// handles are cloned.
    pub fn snapshot(&self) -> Vec<Arc<FrameBuffer>> {
        self.inner.read().framebuffers.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().framebuffers.is_empty()
    }

    /// Looks a FrameBuffer up by the frame and version a producer sent.
    pub fn find(&self, frame: f32, version: i32) -> Option<Arc<FrameBuffer>> {
        let frame = if self.inner.read().multiframe {
            frame
        } else {
            0.0
        };
        self.find_by_key(FrameKey::new(frame, version))
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Changes the retention limit, evicting right away if the list is now
    /// too long.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.write();
        inner.capacity = capacity.max(MIN_CAPACITY);
        let evicted = inner.enforce_capacity();
        drop(inner);
        self.log_evictions(&evicted);
    }

    pub fn set_multiframe(&self, multiframe: bool) {
        self.inner.write().multiframe = multiframe;
    }

    pub fn set_enable_aovs(&self, enable_aovs: bool) {
        self.inner.write().enable_aovs = enable_aovs;
    }

    /// Moves the selection one step, wrapping at both ends. With nothing
    /// selected, `Next` starts at the oldest image and `Previous` at the
    /// newest.
    pub fn select(&self, direction: Direction) -> Option<usize> {
        let mut inner = self.inner.write();
        let len = inner.framebuffers.len();
        if len == 0 {
            inner.selected = None;
            return None;
        }
        let index = match (inner.selected_index(), direction) {
            (Some(current), Direction::Next) => (current + 1) % len,
            (Some(current), Direction::Previous) => (current + len - 1) % len,
            (None, Direction::Next) => 0,
            (None, Direction::Previous) => len - 1,
        };
        inner.selected = Some(inner.framebuffers[index].key());
        Some(index)
    }

    pub fn select_index(&self, index: usize) -> Option<usize> {
        let mut inner = self.inner.write();
        let key = inner.framebuffers.get(index)?.key();
        inner.selected = Some(key);
        Some(index)
    }

    pub fn clear_selection(&self) {
        self.inner.write().selected = None;
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.inner.read().selected_index()
    }

    /// The selected FrameBuffer, or the newest one when nothing is selected.
    pub fn current_framebuffer(&self) -> Option<Arc<FrameBuffer>> {
        let inner = self.inner.read();
        match inner.selected_index() {
            Some(index) => inner.framebuffers.get(index).cloned(),
            None => inner.framebuffers.last().cloned(),
        }
    }

    /// Drops one FrameBuffer on request, clearing the selection if it
    /// pointed there.
    pub fn remove(&self, frame: f32, version: i32) -> Option<Arc<FrameBuffer>> {
        let mut inner = self.inner.write();
        let key = FrameKey::new(if inner.multiframe { frame } else { 0.0 }, version);
        let index = inner.framebuffers.iter().position(|fb| fb.key() == key)?;
        if inner.selected == Some(key) {
            inner.selected = None;
        }
        Some(inner.framebuffers.remove(index))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.framebuffers.clear();
        inner.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use shared::models::message::MessageHeader;
    use shared::models::region::Region;
    use yare::parameterized;

    use super::*;

    fn state(capacity: usize) -> ServerState {
        let mut config = ServerConfig::default();
        config.capacity = capacity;
        ServerState::new(&config)
    }

    fn header(frame: f32, version: i32, region: Region) -> MessageHeader {
        MessageHeader::new(region, 3)
            .with_frame(frame, version)
            .with_region_area(320 * 240)
    }

    fn open(frame: f32, version: i32) -> Message {
        Message::open(header(frame, version, Region::new(0, 0, 320, 240)))
    }

    fn tile(frame: f32, version: i32, aov: &str, region: Region, value: f32) -> Message {
        let header = header(frame, version, region).with_aov(aov);
        Message::pixels(header, vec![value; region.area() as usize * 3]).unwrap()
    }

    fn close(frame: f32, version: i32) -> Message {
        Message::close(header(frame, version, Region::new(0, 0, 320, 240)))
    }

    fn keys(state: &ServerState) -> Vec<i32> {
        state.snapshot().iter().map(|fb| fb.version()).collect()
    }

    #[test]
    fn open_tile_close_scenario() {
        let state = state(5);
        assert_eq!(state.route(&open(1.0, 1)), Ok(RouteOutcome::Created));
        let fb = state.find(1.0, 1).unwrap();
        assert_eq!(fb.resolution().width, 320);
        assert_eq!(fb.resolution().height, 240);

        let region = Region::new(0, 0, 16, 16);
        assert_eq!(
            state.route(&tile(1.0, 1, "", region, 1.0)),
            Ok(RouteOutcome::Merged)
        );
        for y in 0..240 {
            for x in 0..320 {
                let expected = if x < 16 && y < 16 { 1.0 } else { 0.0 };
                assert_eq!(fb.pixel("", x, y), Some(vec![expected; 3]));
            }
        }

        assert_eq!(state.route(&close(1.0, 1)), Ok(RouteOutcome::Finalized));
        let fb = state.find(1.0, 1).unwrap();
        assert!(fb.is_finalized());
        assert_eq!(fb.pixel("", 15, 15), Some(vec![1.0; 3]));
    }

    #[test]
    fn repeated_open_is_a_no_op() {
        let state = state(5);
        state.route(&open(1.0, 1)).unwrap();
        state.route(&tile(1.0, 1, "", Region::new(0, 0, 4, 4), 1.0)).unwrap();
        assert_eq!(state.route(&open(1.0, 1)), Ok(RouteOutcome::Opened));
        assert_eq!(state.len(), 1);
        assert_eq!(state.find(1.0, 1).unwrap().pixel("", 0, 0), Some(vec![1.0; 3]));
    }

    #[test]
    fn concurrent_opens_create_one_framebuffer() {
        let state = Arc::new(state(5));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.route(&open(1.0, 1)).unwrap())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == RouteOutcome::Created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn tile_before_open_creates_framebuffer() {
        let state = state(5);
        let region = Region::new(16, 16, 16, 16);
        assert_eq!(
            state.route(&tile(2.0, 1, "normals", region, 0.5)),
            Ok(RouteOutcome::Merged)
        );
        let fb = state.find(2.0, 1).unwrap();
        assert_eq!(fb.aov_names(), vec!["normals".to_string()]);
        assert_eq!(fb.pixel("normals", 20, 20), Some(vec![0.5; 3]));

        state.route(&open(2.0, 1)).unwrap();
        assert_eq!(fb.resolution().width, 320);
        assert_eq!(fb.aov_names(), vec!["RGBA".to_string(), "normals".to_string()]);
    }

    #[test]
    fn unseen_aov_after_open_is_allocated() {
        let state = state(5);
        state.route(&open(1.0, 1)).unwrap();
        let region = Region::new(0, 0, 8, 8);
        state.route(&tile(1.0, 1, "normals", region, 0.25)).unwrap();
        let fb = state.find(1.0, 1).unwrap();
        assert_eq!(fb.pixel("normals", 7, 7), Some(vec![0.25; 3]));
        assert_eq!(fb.pixel("", 7, 7), Some(vec![0.0; 3]));
    }

    #[parameterized(
        zero_width = { Region::new(0, 0, 0, 16) },
        both_negative = { Region::new(0, 0, -2, -2) },
        negative_origin = { Region::new(-1, 0, 16, 16) },
        past_right_edge = { Region::new(312, 0, 16, 16) },
        past_bottom_edge = { Region::new(0, 232, 16, 16) },
    )]
    fn out_of_range_tiles_are_dropped(region: Region) {
        let state = state(5);
        state.route(&open(1.0, 1)).unwrap();
        let header = header(1.0, 1, region);
        let samples = header.expected_samples().max(0) as usize;
        let message = Message::pixels(header, vec![1.0; samples]).unwrap();
        assert!(matches!(
            state.route(&message),
            Err(RouteError::OutOfRangeGeometry(_))
        ));
        assert_eq!(state.metrics().snapshot().messages_dropped, 1);
        assert_eq!(state.find(1.0, 1).unwrap().active_region(), None);
    }

    #[parameterized(
        zero_size = { Region::new(0, 0, 0, 0), 3 },
        negative_width = { Region::new(0, 0, -320, 240), 3 },
        no_channels = { Region::new(0, 0, 320, 240), 0 },
        too_large = { Region::new(0, 0, 1 << 16, 1 << 16), 4 },
    )]
    fn bad_opens_are_dropped(region: Region, samples_per_pixel: i32) {
        let state = state(5);
        let message = Message::open(MessageHeader::new(region, samples_per_pixel));
        assert!(state.route(&message).is_err());
        assert!(state.is_empty());
    }

    #[test]
    fn far_off_tile_neither_allocates_nor_evicts() {
        let state = state(1);
        state.route(&open(1.0, 1)).unwrap();

        let region = Region::new(i32::MAX - 1, i32::MAX - 1, 1, 1);
        assert!(matches!(
            state.route(&tile(1.0, 2, "", region, 1.0)),
            Err(RouteError::OutOfRangeGeometry(_))
        ));
        assert_eq!(keys(&state), vec![1]);
        assert_eq!(state.metrics().evictions(), 0);
    }

    #[test]
    fn oversized_first_tile_creates_nothing() {
        let state = state(5);
        let header =
            MessageHeader::new(Region::new(200_000, 200_000, 1, 1), 4).with_frame(1.0, 1);
        let message = Message::pixels(header, vec![1.0; 4]).unwrap();
        assert!(matches!(
            state.route(&message),
            Err(RouteError::OutOfRangeGeometry(_))
        ));
        assert!(state.is_empty());
    }

    #[test]
    fn open_is_sized_by_its_dimensions() {
        let state = state(5);
        let message = Message::open(header(1.0, 1, Region::new(10, 10, 320, 240)));
        assert_eq!(state.route(&message), Ok(RouteOutcome::Created));
        let fb = state.find(1.0, 1).unwrap();
        assert_eq!(fb.resolution().width, 320);
        assert_eq!(fb.resolution().height, 240);

        assert!(matches!(
            state.route(&tile(1.0, 1, "", Region::new(320, 240, 8, 8), 1.0)),
            Err(RouteError::OutOfRangeGeometry(_))
        ));
        assert_eq!(
            state.route(&tile(1.0, 1, "", Region::new(312, 232, 8, 8), 1.0)),
            Ok(RouteOutcome::Merged)
        );
    }

    #[test]
    fn oldest_framebuffer_is_evicted() {
        let state = state(2);
        for version in 1..=3 {
            state.route(&open(1.0, version)).unwrap();
        }
        assert_eq!(keys(&state), vec![2, 3]);
        assert_eq!(state.metrics().evictions(), 1);
    }

    #[test]
    fn selected_framebuffer_is_never_evicted() {
        let state = state(2);
        state.route(&open(1.0, 1)).unwrap();
        state.route(&open(1.0, 2)).unwrap();
        assert_eq!(state.select_index(0), Some(0));

        state.route(&open(1.0, 3)).unwrap();
        state.route(&open(1.0, 4)).unwrap();
        assert_eq!(keys(&state), vec![1, 4]);
        assert_eq!(state.current_framebuffer().unwrap().version(), 1);
    }

    #[test]
    fn capacity_one_with_pinned_selection_drops_new_images() {
        let state = state(1);
        state.route(&open(1.0, 1)).unwrap();
        state.select(Direction::Next);
        assert_eq!(state.route(&open(1.0, 2)), Ok(RouteOutcome::Evicted));
        assert_eq!(
            state.route(&tile(1.0, 2, "", Region::new(0, 0, 4, 4), 1.0)),
            Ok(RouteOutcome::Evicted)
        );
        assert_eq!(keys(&state), vec![1]);
    }

    #[test]
    fn lowering_capacity_evicts_immediately() {
        let state = state(5);
        for version in 1..=5 {
            state.route(&open(1.0, version)).unwrap();
        }
        state.set_capacity(2);
        assert_eq!(keys(&state), vec![4, 5]);
        state.set_capacity(0);
        assert_eq!(state.capacity(), MIN_CAPACITY);
        assert_eq!(keys(&state), vec![5]);
    }

    #[test]
    fn select_wraps_in_both_directions() {
        let state = state(5);
        assert_eq!(state.select(Direction::Next), None);
        for version in 1..=3 {
            state.route(&open(1.0, version)).unwrap();
        }
        assert_eq!(state.select(Direction::Previous), Some(2));
        assert_eq!(state.select(Direction::Next), Some(0));
        assert_eq!(state.select(Direction::Previous), Some(2));
        assert_eq!(state.select(Direction::Previous), Some(1));
        assert_eq!(state.selected_index(), Some(1));
    }

    #[test]
    fn current_framebuffer_follows_newest_until_selected() {
        let state = state(5);
        assert!(state.current_framebuffer().is_none());
        state.route(&open(1.0, 1)).unwrap();
        state.route(&open(2.0, 1)).unwrap();
        assert_eq!(state.current_framebuffer().unwrap().key().frame, 2.0);
        state.select_index(0);
        state.route(&open(3.0, 1)).unwrap();
        assert_eq!(state.current_framebuffer().unwrap().key().frame, 1.0);
        state.clear_selection();
        assert_eq!(state.current_framebuffer().unwrap().key().frame, 3.0);
    }

    #[test]
    fn frames_fold_together_without_multiframe() {
        let state = state(5);
        state.set_multiframe(false);
        state.route(&open(1.0, 1)).unwrap();
        state.route(&tile(2.0, 1, "", Region::new(0, 0, 4, 4), 1.0)).unwrap();
        assert_eq!(state.len(), 1);
        let fb = state.find(7.0, 1).unwrap();
        assert_eq!(fb.frame(), 2.0);
    }

    #[test]
    fn disabled_aovs_only_keep_default_layer() {
        let state = state(5);
        state.set_enable_aovs(false);
        state.route(&open(1.0, 1)).unwrap();
        assert_eq!(
            state.route(&tile(1.0, 1, "normals", Region::new(0, 0, 4, 4), 1.0)),
            Ok(RouteOutcome::Skipped)
        );
        assert_eq!(
            state.find(1.0, 1).unwrap().aov_names(),
            vec!["RGBA".to_string()]
        );
    }

    #[test]
    fn close_for_unknown_image_is_ignored() {
        let state = state(5);
        assert_eq!(state.route(&close(9.0, 9)), Ok(RouteOutcome::Ignored));
    }

    #[test]
    fn remove_clears_matching_selection() {
        let state = state(5);
        state.route(&open(1.0, 1)).unwrap();
        state.route(&open(1.0, 2)).unwrap();
        state.select_index(0);
        assert!(state.remove(1.0, 1).is_some());
        assert_eq!(state.selected_index(), None);
        assert!(state.remove(1.0, 1).is_none());
        state.clear();
        assert!(state.is_empty());
    }

    proptest! {
        #[test]
        fn retained_count_never_exceeds_capacity(
            capacity in 1usize..5,
            ops in prop::collection::vec((0i32..8, any::<bool>()), 1..40),
        ) {
            let state = state(capacity);
            for (version, select) in ops {
                let pinned = state.selected_index().map(|i| state.snapshot()[i].key());
                let _ = state.route(&open(1.0, version));
                prop_assert!(state.len() <= capacity);
                if let Some(key) = pinned {
                    prop_assert!(state.snapshot().iter().any(|fb| fb.key() == key));
                }
                if select {
                    state.select(Direction::Next);
                }
            }
        }
    }
}
