use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::trace;
use crate::frame_assembler::FrameAssembler;
use crate::frame_dispatcher::{FrameConsumer, FrameDispatcher};

/// What a probe observed about the peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    /// the connection stays usable; all immediately available bytes were consumed
    Open,
    /// the peer closed its end (zero-byte read) - not an error, but the owner should
    ///  tear the connection down
    PeerClosed,
}

/// Pulls immediately available bytes from a socket into a [FrameAssembler] and triggers
///  dispatch of every frame that completes.
///
/// One connection owns one reader, so frames of a connection reach the consumer in
///  receipt order and are never interleaved with another connection's frames.
pub struct SelectionReader {
    stream: TcpStream,
    assembler: FrameAssembler,
    dispatcher: FrameDispatcher,
}

impl SelectionReader {
    pub fn new(stream: TcpStream, max_frame_size: usize, consumer: Arc<dyn FrameConsumer>) -> SelectionReader {
        SelectionReader {
            stream,
            assembler: FrameAssembler::new(max_frame_size),
            dispatcher: FrameDispatcher::new(consumer),
        }
    }

    /// Read whatever the socket has buffered right now, dispatching as frames complete.
    ///  Never waits for network data: a would-block ends the probe until the next tick.
    ///  Errors mean stream corruption or socket failure; the owner closes the connection.
    pub async fn probe(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            match self.stream.try_read(self.assembler.writable_chunk()) {
                Ok(0) => {
                    trace!("zero-byte read: peer closed the connection");
                    return Ok(ReadOutcome::PeerClosed);
                }
                Ok(n) => {
                    trace!("read {} bytes", n);
                    self.assembler.bytes_written(n);
                    self.dispatcher.dispatch(&mut self.assembler).await?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Open);
                }
                Err(e) => {
                    return Err(e.into());
                }
            }
        }
    }
}
