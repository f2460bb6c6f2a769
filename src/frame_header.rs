use anyhow::bail;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::safe_converter::PrecheckedCast;

/// Version tag at the start of every frame header. A frame not starting with this value
///  means the byte stream is corrupt or the peer speaks a different protocol version;
///  there is no way to resynchronize a misaligned length-prefixed stream, so the
///  connection must be closed.
pub const WIRE_MAGIC: i16 = 0x574C;

/// Discriminator for the frames this node knows how to interpret. The header stores the
///  raw value, so unknown kinds pass through the framing layer untouched.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(i16)]
pub enum FrameKind {
    Data = 1,
    Availability = 2,
}

/// Fixed-width binary header preceding every framed message.
///
/// Wire layout, all fields little-endian:
/// ```ascii
///  0: magic (i16) - protocol version tag, must equal WIRE_MAGIC
///  2: node id (i16) - sending node
///  4: kind (i16) - frame discriminator, see FrameKind
///  6: payload length (i32) - number of payload bytes following the header
/// 10: reserved (i16)
/// 12: reserved (i16)
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub node_id: i16,
    pub kind: i16,
    pub length: i32,
}

impl FrameHeader {
    pub const SERIALIZED_LEN: usize = 5 * size_of::<i16>() + size_of::<i32>();

    pub fn for_payload(node_id: i16, kind: FrameKind, payload: &[u8]) -> FrameHeader {
        FrameHeader {
            node_id,
            kind: kind.into(),
            length: payload.len().prechecked_cast(),
        }
    }

    pub fn frame_kind(&self) -> Option<FrameKind> {
        FrameKind::try_from(self.kind).ok()
    }

    /// payload length as a buffer index
    pub fn payload_len(&self) -> usize {
        self.length.prechecked_cast()
    }

    pub fn copy_bytes_to(&self, buf: &mut impl BufMut) {
        buf.put_i16_le(WIRE_MAGIC);
        buf.put_i16_le(self.node_id);
        buf.put_i16_le(self.kind);
        buf.put_i32_le(self.length);
        buf.put_i16_le(0);
        buf.put_i16_le(0);
    }

    pub fn read(buf: &mut impl Buf) -> anyhow::Result<FrameHeader> {
        let magic = buf.try_get_i16_le()?;
        if magic != WIRE_MAGIC {
            bail!("frame header starts with {:#06x} instead of the expected {:#06x} - the stream is corrupt or the peer speaks a different protocol version", magic, WIRE_MAGIC);
        }

        let node_id = buf.try_get_i16_le()?;
        let kind = buf.try_get_i16_le()?;
        let length = buf.try_get_i32_le()?;
        let _reserved1 = buf.try_get_i16_le()?;
        let _reserved2 = buf.try_get_i16_le()?;

        if length < 0 {
            bail!("frame header declares a negative payload length {}", length);
        }

        Ok(FrameHeader {
            node_id,
            kind,
            length,
        })
    }
}
