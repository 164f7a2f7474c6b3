use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NetError, NetResult};
use crate::packet::Packet;

/// Largest accepted batch payload.
pub const MAX_BATCH_SIZE: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Frames packet batches for byte-stream transports.
///
/// A frame is `[u32 big-endian payload length][JSON array of packets]`.
pub struct PacketCodec;

impl PacketCodec {
    /// Encode one batch as a frame. Batches carrying in-process values are
    /// refused.
    pub fn encode(batch: &[Packet]) -> NetResult<Bytes> {
        let payload =
            serde_json::to_vec(batch).map_err(|e| NetError::Codec(e.to_string()))?;
        if payload.len() > MAX_BATCH_SIZE {
            return Err(NetError::BatchTooLarge {
                size: payload.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode one complete frame. Returns the batch and the number of bytes
    /// consumed.
    pub fn decode(data: &[u8]) -> NetResult<(Vec<Packet>, usize)> {
        if data.len() < HEADER_LEN {
            return Err(NetError::Codec("frame too short".into()));
        }
        let len = Self::payload_len(data)?;
        let total = HEADER_LEN + len;
        if data.len() < total {
            return Err(NetError::Codec(format!(
                "incomplete frame: have {}, need {}",
                data.len(),
                total
            )));
        }
        let batch = Self::parse(&data[HEADER_LEN..total])?;
        Ok((batch, total))
    }

    /// Take the next complete frame off a read buffer. Returns `None` until
    /// the whole frame has arrived.
    pub fn decode_frame(buf: &mut BytesMut) -> NetResult<Option<Vec<Packet>>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = Self::payload_len(buf)?;
        if buf.len() < HEADER_LEN + len {
            buf.reserve(HEADER_LEN + len - buf.len());
            return Ok(None);
        }
        buf.advance(HEADER_LEN);
        let payload = buf.split_to(len);
        Self::parse(&payload).map(Some)
    }

    fn payload_len(data: &[u8]) -> NetResult<usize> {
        let mut header = &data[..HEADER_LEN];
        let len = header.get_u32() as usize;
        if len > MAX_BATCH_SIZE {
            return Err(NetError::BatchTooLarge {
                size: len,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(len)
    }

    fn parse(payload: &[u8]) -> NetResult<Vec<Packet>> {
        serde_json::from_slice(payload).map_err(|e| NetError::Codec(e.to_string()))
    }
}
