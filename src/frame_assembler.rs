use std::cmp::min;
use anyhow::bail;
use tracing::trace;
use crate::buffers::byte_buffer::ByteBuffer;
use crate::frame::Frame;
use crate::frame_header::FrameHeader;

/// Minimum spare room guaranteed to socket reads by [FrameAssembler::writable_chunk].
const READ_CHUNK: usize = 4 * 1024;

/// Assembly is a two-state machine: either the next bytes in the work buffer start with
///  a fresh header, or a frame is mid-assembly and the already-parsed header stays in
///  effect until its payload is complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    ReadHeader,
    ReuseHeader,
}

/// Accumulates raw socket bytes and assembles them into complete [Frame]s.
///
/// TCP delivers a byte stream, so on any read the work buffer may hold a partial header,
///  a partial payload, exactly one frame, or several frames plus a partial one. Each
///  [FrameAssembler::sync] consumes as much of the buffered content as the current frame
///  needs and leaves the rest for the next round:
///
/// * *underflow*: fewer than header-size + 1 bytes buffered and no frame in progress -
///   compact the work buffer and wait for more data
/// * *exact fit*: the frame completes and nothing is left over - the work buffer is
///   cleared for the next read
/// * *overflow*: the frame completes with bytes left over - the remainder stays buffered
///   so the dispatch loop can assemble the next frame without another socket read
/// * *body underflow*: fewer bytes than the payload needs - everything is appended, and
///   the parsed header is reused when the continuation bytes arrive
pub struct FrameAssembler {
    frame: Frame,
    work: ByteBuffer,
    mode: Mode,
    /// whether the work buffer is currently flipped for consumption
    work_readable: bool,
}

impl FrameAssembler {
    pub fn new(max_frame_size: usize) -> FrameAssembler {
        FrameAssembler {
            frame: Frame::new(max_frame_size),
            work: ByteBuffer::new(max_frame_size + FrameHeader::SERIALIZED_LEN),
            mode: Mode::ReadHeader,
            work_readable: false,
        }
    }

    /// spare room for the next socket read; the work buffer is scratch space and grows
    ///  on demand
    pub fn writable_chunk(&mut self) -> &mut [u8] {
        assert!(!self.work_readable, "this is a bug: writing while content is prepared for consumption");
        self.work.ensure_writable(READ_CHUNK);
        self.work.writable()
    }

    /// record that a socket read placed `n` bytes into [FrameAssembler::writable_chunk]
    pub fn bytes_written(&mut self, n: usize) {
        self.work.advance(n);
    }

    pub fn has_buffered_content(&self) -> bool {
        !self.work_readable && self.work.position() > 0
    }

    /// flip the work buffer so accumulated bytes become consumable by [FrameAssembler::sync]
    pub fn prepare_content(&mut self) {
        self.work.flip();
        self.work_readable = true;
    }

    /// unconsumed bytes remaining after a completed frame - possibly a whole next frame
    pub fn has_unconsumed_content(&self) -> bool {
        self.work_readable && self.work.has_remaining()
    }

    pub fn current_frame(&self) -> &Frame {
        &self.frame
    }

    pub fn is_current_frame_complete(&self) -> bool {
        self.frame.is_complete()
    }

    pub fn is_current_frame_incomplete(&self) -> bool {
        self.frame.is_incomplete()
    }

    /// release the frame slot for the next message; the work buffer is left untouched so
    ///  remaining content survives
    pub fn prepare_for_next_frame(&mut self) {
        self.frame.reset();
    }

    /// Advance assembly by consuming buffered content. An error means the stream is
    ///  corrupt (bad magic, impossible declared length); the connection owner is
    ///  expected to close it, since a misaligned length-prefixed stream cannot be
    ///  resynchronized.
    pub fn sync(&mut self) -> anyhow::Result<()> {
        if self.underflow() {
            trace!("only {} bytes buffered - waiting for more", self.work.remaining());
            self.work.compact();
            self.work_readable = false;
            return Ok(());
        }

        if self.mode == Mode::ReadHeader {
            let header = {
                let mut parse = self.work.content();
                FrameHeader::read(&mut parse)?
            };
            self.work.advance(FrameHeader::SERIALIZED_LEN);

            if header.payload_len() == 0 {
                bail!("frame header declares an empty payload - the stream is corrupt");
            }
            if header.payload_len() > self.frame.capacity() {
                bail!("frame header declares a payload of {} bytes, larger than the configured maximum of {} - closing the stream because it is apparently compromised",
                      header.payload_len(), self.frame.capacity());
            }

            self.frame.reset();
            self.frame.set_header(header);
        }

        let missing = self.frame.required_length() - self.frame.len();
        let available = self.work.remaining();
        let take = min(missing, available);

        trace!("appending {} of {} missing payload bytes ({} available)", take, missing, available);
        let taken = self.work.take(take);
        self.frame.append(taken);

        if take == missing {
            self.mode = Mode::ReadHeader;
            if !self.work.has_remaining() {
                self.work.clear();
                self.work_readable = false;
            }
            // leftover content stays positioned for the dispatch loop's next sync
        }
        else {
            // everything available went into the frame; expect continuation bytes with
            //  no header in front of them
            self.mode = Mode::ReuseHeader;
            self.work.clear();
            self.work_readable = false;
        }

        Ok(())
    }

    fn underflow(&self) -> bool {
        self.mode == Mode::ReadHeader && self.work.remaining() < FrameHeader::SERIALIZED_LEN + 1
    }
}
