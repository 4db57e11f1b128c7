pub mod client;
pub mod codec;
pub mod error;
pub mod result;
pub mod server;

use std::io::ErrorKind;

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::message::Message;

use self::codec::{MAX_AOV_NAME_LEN, MAX_PAYLOAD_SAMPLES, PREAMBLE_LEN, SAMPLE_SIZE};
use self::error::{NetworkingError, ProtocolError};
use self::result::NetworkingResult;

/// The bytes of one complete frame, not yet decoded.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub data: Vec<u8>,
}

impl RawMessage {
    pub fn decode(&self) -> Result<Message, ProtocolError> {
        codec::decode(&self.data)
    }
}

pub async fn send_message<W>(stream: &mut W, message: &Message) -> NetworkingResult<()>
where
    W: AsyncWrite + Unpin,
{
    let buffer = codec::encode(message);
    stream.write_all(&buffer).await?;
    Ok(stream.flush().await?)
}

/// Reads the next frame off the stream without interpreting it.
///
/// Only the length fields are looked at, so a frame that later fails to
/// decode has still been consumed in full.
pub async fn read_message_raw<R>(stream: &mut R) -> NetworkingResult<RawMessage>
where
    R: AsyncRead + Unpin,
{
    let mut data = vec![0u8; PREAMBLE_LEN];
    read_frame_start(stream, &mut data).await?;

    let aov_len = read_length(&data[PREAMBLE_LEN - 4..]);
    if aov_len > MAX_AOV_NAME_LEN {
        return Err(NetworkingError::FrameTooLarge {
            field: "aov name",
            declared: aov_len,
            limit: MAX_AOV_NAME_LEN,
        });
    }

    let count_at = data.len() + aov_len as usize;
    data.resize(count_at + 4, 0);
    read_frame_part(stream, &mut data[PREAMBLE_LEN..]).await?;

    let sample_count = read_length(&data[count_at..]);
    if sample_count > MAX_PAYLOAD_SAMPLES {
        return Err(NetworkingError::FrameTooLarge {
            field: "sample count",
            declared: sample_count,
            limit: MAX_PAYLOAD_SAMPLES,
        });
    }

    read_frame_tail(stream, &mut data, sample_count as usize * SAMPLE_SIZE).await?;

    trace!("Read frame of {} bytes", data.len());
    Ok(RawMessage { data })
}

/// Reads and decodes the next frame.
pub async fn read_message<R>(stream: &mut R) -> NetworkingResult<Message>
where
    R: AsyncRead + Unpin,
{
    let raw = read_message_raw(stream).await?;
    Ok(raw.decode()?)
}

fn read_length(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Fills `buf` with the start of a frame. End of stream before the first
/// byte is a closed connection, after it a truncated frame.
async fn read_frame_start<R>(stream: &mut R, buf: &mut [u8]) -> NetworkingResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = match stream.read(&mut buf[filled..]).await {
            Ok(n) => n,
            Err(e) if is_disconnect(&e) => return Err(NetworkingError::ConnectionLost),
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            if filled == 0 {
                return Err(NetworkingError::ConnectionLost);
            }
            return Err(ProtocolError::Truncated {
                needed: buf.len() - filled,
                available: 0,
            }
            .into());
        }
        filled += n;
    }
    Ok(())
}

async fn read_frame_part<R>(stream: &mut R, buf: &mut [u8]) -> NetworkingResult<()>
where
    R: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated {
            needed: buf.len(),
            available: 0,
        }
        .into()),
        Err(e) if is_disconnect(&e) => Err(NetworkingError::ConnectionLost),
        Err(e) => Err(e.into()),
    }
}

/// Appends exactly `len` bytes to `data`. The buffer grows with what has
/// arrived, not with what the header declared.
async fn read_frame_tail<R>(
    stream: &mut R,
    data: &mut Vec<u8>,
    len: usize,
) -> NetworkingResult<()>
where
    R: AsyncRead + Unpin,
{
    let read = match (&mut *stream).take(len as u64).read_to_end(data).await {
        Ok(read) => read,
        Err(e) if is_disconnect(&e) => return Err(NetworkingError::ConnectionLost),
        Err(e) => return Err(e.into()),
    };
    if read < len {
        return Err(ProtocolError::Truncated {
            needed: len - read,
            available: 0,
        }
        .into());
    }
    Ok(())
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}
