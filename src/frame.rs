use anyhow::bail;
use bytes::BufMut;
use crate::frame_header::{FrameHeader, FrameKind};

/// A framed message: header plus an owned, fixed-capacity payload store with a running
///  append index.
///
/// A `Frame` is allocated once per channel slot and reused for many logical messages via
///  [Frame::reset] - receiving a message must not allocate on the hot path. Completeness
///  is defined against the header's declared payload length, which lets the assembler
///  fill a frame incrementally across several socket reads.
pub struct Frame {
    header: FrameHeader,
    body: Vec<u8>,
    index: usize,
}

impl Frame {
    pub fn new(capacity: usize) -> Frame {
        Frame {
            header: FrameHeader { node_id: 0, kind: 0, length: 0 },
            body: vec![0; capacity],
            index: 0,
        }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// install the header for the message being assembled; the payload index keeps its
    ///  current value, so callers reset first when starting a fresh message
    pub fn set_header(&mut self, header: FrameHeader) {
        self.header = header;
    }

    pub fn capacity(&self) -> usize {
        self.body.len()
    }

    pub fn len(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.body[..self.index]
    }

    pub fn append(&mut self, bytes: &[u8]) {
        assert!(self.index + bytes.len() <= self.capacity(),
                "this is a bug: appending past the frame capacity - declared lengths are checked before assembly");
        self.body[self.index..self.index + bytes.len()].copy_from_slice(bytes);
        self.index += bytes.len();
    }

    /// make the slot available for the next logical message. The header stays in place
    ///  until the next [Frame::set_header], which is what lets completeness checks
    ///  distinguish "not started" from "fully assembled".
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// the payload length the header promises
    pub fn required_length(&self) -> usize {
        self.header.payload_len()
    }

    pub fn is_complete(&self) -> bool {
        self.index != 0 && self.index == self.required_length()
    }

    pub fn is_incomplete(&self) -> bool {
        !self.is_complete()
    }

    /// serialize header and payload in wire order, for the send path
    pub fn copy_bytes_to(&self, buf: &mut impl BufMut) {
        self.header.copy_bytes_to(buf);
        buf.put_slice(self.payload());
    }

    /// populate this frame with a freshly built message
    pub fn set(&mut self, node_id: i16, kind: FrameKind, payload: &[u8]) {
        assert!(payload.len() <= self.capacity(),
                "this is a bug: payload of {} bytes exceeds the frame capacity of {}",
                payload.len(), self.capacity());
        self.reset();
        self.set_header(FrameHeader::for_payload(node_id, kind, payload));
        self.append(payload);
    }

    /// Parse one whole UDP datagram into this frame in place. Datagrams carry exactly one
    ///  frame, so no incremental assembly is involved; a datagram whose content does not
    ///  match its header is rejected as foreign or truncated traffic.
    pub fn from_datagram(&mut self, datagram: &[u8]) -> anyhow::Result<()> {
        let mut parse = datagram;
        let header = FrameHeader::read(&mut parse)?;

        if header.payload_len() > self.capacity() {
            bail!("datagram declares a payload of {} bytes, larger than the frame capacity of {}",
                  header.payload_len(), self.capacity());
        }
        if parse.len() != header.payload_len() {
            bail!("datagram carries {} payload bytes but its header declares {}",
                  parse.len(), header.payload_len());
        }

        self.reset();
        self.set_header(header);
        self.append(parse);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_append_and_reset_reuse() {
        let mut frame = Frame::new(32);
        frame.set_header(FrameHeader { node_id: 1, kind: FrameKind::Data.into(), length: 5 });

        frame.append(b"he");
        assert!(frame.is_incomplete());
        frame.append(b"llo");
        assert!(frame.is_complete());
        assert_eq!(frame.payload(), b"hello");

        frame.reset();
        assert!(frame.is_incomplete());
        assert!(frame.is_empty());

        frame.append(b"again");
        assert!(frame.is_complete());
        assert_eq!(frame.payload(), b"again");
    }

    #[test]
    fn test_empty_frame_is_incomplete_even_for_zero_length() {
        let mut frame = Frame::new(32);
        frame.set_header(FrameHeader { node_id: 1, kind: FrameKind::Data.into(), length: 0 });
        assert!(frame.is_incomplete());
    }

    #[test]
    fn test_copy_bytes_to_round_trips_through_datagram_parse() {
        let mut frame = Frame::new(32);
        frame.set(7, FrameKind::Availability, b"hello");

        let mut buf = BytesMut::new();
        frame.copy_bytes_to(&mut buf);

        let mut parsed = Frame::new(32);
        parsed.from_datagram(&buf).unwrap();

        assert_eq!(parsed.header(), frame.header());
        assert_eq!(parsed.payload(), b"hello");
        assert!(parsed.is_complete());
    }

    #[test]
    fn test_from_datagram_rejects_truncated_payload() {
        let mut frame = Frame::new(32);
        frame.set(7, FrameKind::Data, b"hello");

        let mut buf = BytesMut::new();
        frame.copy_bytes_to(&mut buf);

        let mut parsed = Frame::new(32);
        assert!(parsed.from_datagram(&buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_from_datagram_rejects_foreign_traffic() {
        let mut parsed = Frame::new(32);
        assert!(parsed.from_datagram(b"not a frame at all").is_err());
    }

    #[test]
    fn test_from_datagram_rejects_oversized_declaration() {
        let mut frame = Frame::new(64);
        frame.set(7, FrameKind::Data, &[0u8; 40]);

        let mut buf = BytesMut::new();
        frame.copy_bytes_to(&mut buf);

        let mut small = Frame::new(16);
        assert!(small.from_datagram(&buf).is_err());
    }
}
