pub mod kind;

use serde::{Deserialize, Serialize};

use crate::models::region::Region;
use crate::networking::error::ProtocolError;

pub use self::kind::MessageKind;

/// Metadata shared by every message kind.
///
/// For an open the region is the full image, for a pixel message it is the
/// tile being delivered. An empty `aov_name` addresses the default layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    pub region: Region,
    /// Pixel count of the whole render region, used for progress.
    pub region_area: i64,
    pub version: i32,
    pub frame: f32,
    /// Channel depth of the addressed AOV.
    pub samples_per_pixel: i32,
    /// Memory reported by the renderer, informational only.
    pub ram_bytes: i64,
    /// Elapsed render time reported by the renderer.
    pub elapsed_time: u32,
    pub aov_name: String,
}

impl MessageHeader {
    pub fn new(region: Region, samples_per_pixel: i32) -> Self {
        Self {
            region,
            region_area: region.area(),
            samples_per_pixel,
            ..Default::default()
        }
    }

    pub fn with_frame(mut self, frame: f32, version: i32) -> Self {
        self.frame = frame;
        self.version = version;
        self
    }

    pub fn with_aov(mut self, aov_name: impl Into<String>) -> Self {
        self.aov_name = aov_name.into();
        self
    }

    pub fn with_region_area(mut self, region_area: i64) -> Self {
        self.region_area = region_area;
        self
    }

    pub fn with_stats(mut self, ram_bytes: i64, elapsed_time: u32) -> Self {
        self.ram_bytes = ram_bytes;
        self.elapsed_time = elapsed_time;
        self
    }

    /// `width * height * samples_per_pixel`, computed without overflow.
    ///
    /// Negative for nonsensical geometry; such a header can still be framed
    /// as long as no payload is attached.
    pub fn expected_samples(&self) -> i64 {
        (self.region.width as i64)
            .saturating_mul(self.region.height as i64)
            .saturating_mul(self.samples_per_pixel as i64)
    }
}

/// One protocol event, immutable once built.
///
/// Only [`MessageKind::Pixels`] carries a payload, and its length always
/// equals [`MessageHeader::expected_samples`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: MessageKind,
    header: MessageHeader,
    payload: Option<Vec<f32>>,
}

impl Message {
    pub fn open(header: MessageHeader) -> Self {
        Self {
            kind: MessageKind::Open,
            header,
            payload: None,
        }
    }

    pub fn close(header: MessageHeader) -> Self {
        Self {
            kind: MessageKind::Close,
            header,
            payload: None,
        }
    }

    /// Builds a pixel tile, rejecting payloads whose length does not match
    /// the header's geometry.
    pub fn pixels(header: MessageHeader, payload: Vec<f32>) -> Result<Self, ProtocolError> {
        let expected = header.expected_samples();
        if expected < 0 || payload.len() as i64 != expected {
            return Err(ProtocolError::PayloadMismatch {
                expected,
                actual: payload.len(),
            });
        }
        Ok(Self {
            kind: MessageKind::Pixels,
            header,
            payload: Some(payload),
        })
    }

    /// Reassembles a message from decoded parts.
    pub(crate) fn from_parts(
        kind: MessageKind,
        header: MessageHeader,
        payload: Vec<f32>,
    ) -> Result<Self, ProtocolError> {
        match kind {
            MessageKind::Pixels => Message::pixels(header, payload),
            MessageKind::Open | MessageKind::Close if !payload.is_empty() => {
                Err(ProtocolError::PayloadMismatch {
                    expected: 0,
                    actual: payload.len(),
                })
            }
            MessageKind::Open => Ok(Message::open(header)),
            MessageKind::Close => Ok(Message::close(header)),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn region(&self) -> Region {
        self.header.region
    }

    pub fn frame(&self) -> f32 {
        self.header.frame
    }

    pub fn version(&self) -> i32 {
        self.header.version
    }

    pub fn samples_per_pixel(&self) -> i32 {
        self.header.samples_per_pixel
    }

    pub fn aov_name(&self) -> &str {
        &self.header.aov_name
    }

    pub fn payload(&self) -> Option<&[f32]> {
        self.payload.as_deref()
    }
}
