//! Binary layout of a message frame.
//!
//! All values are big endian:
//!
//! ```text
//! kind i32 | x i32 | y i32 | width i32 | height i32 | region_area i64
//! version i32 | frame f32 | samples_per_pixel i32 | ram_bytes i64
//! elapsed_time u32 | aov_len u32 | aov bytes | sample_count u32 | samples f32...
//! ```
//!
//! `sample_count` is zero for open and close frames and must equal
//! `width * height * samples_per_pixel` for pixel frames.

use bytes::{Buf, BufMut};

use crate::models::message::{Message, MessageHeader, MessageKind};
use crate::models::region::Region;

use super::error::ProtocolError;

/// Bytes from `kind` through `elapsed_time`.
pub const FIXED_HEADER_LEN: usize = 52;

/// Fixed header plus the AOV name length prefix.
pub const PREAMBLE_LEN: usize = FIXED_HEADER_LEN + 4;

pub const MAX_AOV_NAME_LEN: u32 = 4096;

/// 1 GiB of samples per frame.
pub const MAX_PAYLOAD_SAMPLES: u32 = 1 << 28;

/// Largest pixel grid one AOV may allocate, in samples.
pub const MAX_IMAGE_SAMPLES: u64 = 1 << 28;

pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

pub fn encode(message: &Message) -> Vec<u8> {
    let header = message.header();
    let payload = message.payload().unwrap_or_default();
    let aov = header.aov_name.as_bytes();

    let mut buf = Vec::with_capacity(PREAMBLE_LEN + aov.len() + 4 + payload.len() * SAMPLE_SIZE);
    buf.put_i32(message.kind().code());
    buf.put_i32(header.region.x);
    buf.put_i32(header.region.y);
    buf.put_i32(header.region.width);
    buf.put_i32(header.region.height);
    buf.put_i64(header.region_area);
    buf.put_i32(header.version);
    buf.put_f32(header.frame);
    buf.put_i32(header.samples_per_pixel);
    buf.put_i64(header.ram_bytes);
    buf.put_u32(header.elapsed_time);
    buf.put_u32(aov.len() as u32);
    buf.put_slice(aov);
    buf.put_u32(payload.len() as u32);
    for sample in payload {
        buf.put_f32(*sample);
    }
    buf
}

/// Decodes exactly one frame.
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let mut buf = bytes;

    ensure(&buf, PREAMBLE_LEN)?;
    let kind = MessageKind::try_from(buf.get_i32())?;
    let region = Region::new(buf.get_i32(), buf.get_i32(), buf.get_i32(), buf.get_i32());
    let region_area = buf.get_i64();
    let version = buf.get_i32();
    let frame = buf.get_f32();
    let samples_per_pixel = buf.get_i32();
    let ram_bytes = buf.get_i64();
    let elapsed_time = buf.get_u32();

    let aov_len = buf.get_u32() as usize;
    ensure(&buf, aov_len)?;
    let aov_name = String::from_utf8(buf[..aov_len].to_vec())
        .map_err(|_| ProtocolError::InvalidAovName)?;
    buf.advance(aov_len);

    ensure(&buf, 4)?;
    let sample_count = buf.get_u32() as usize;
    ensure(&buf, sample_count * SAMPLE_SIZE)?;
    let mut payload = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        payload.push(buf.get_f32());
    }

    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes(buf.remaining()));
    }

    let header = MessageHeader {
        region,
        region_area,
        version,
        frame,
        samples_per_pixel,
        ram_bytes,
        elapsed_time,
        aov_name,
    };
    Message::from_parts(kind, header, payload)
}

fn ensure(buf: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}
