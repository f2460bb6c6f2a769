use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::sync::Arc;
use tracing::error;
use crate::frame::Frame;
use crate::frame_assembler::FrameAssembler;

/// Receives every fully assembled frame, in the order the bytes appeared on the wire.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameConsumer: Send + Sync + 'static {
    async fn consume(&self, frame: &Frame) -> anyhow::Result<()>;
}

/// Drives a [FrameAssembler] to completion, delivering every complete frame to the
///  consumer before the next socket wait.
pub struct FrameDispatcher {
    consumer: Arc<dyn FrameConsumer>,
}

impl FrameDispatcher {
    pub fn new(consumer: Arc<dyn FrameConsumer>) -> FrameDispatcher {
        FrameDispatcher { consumer }
    }

    /// Assemble and deliver as many frames as the buffered content yields. When one read
    ///  carried several whole frames, all of them are dispatched here, in stream order.
    ///
    /// Consumer failures are logged and swallowed at this boundary - one faulty message
    ///  handler must not stall the read loop for the messages behind it. Assembly errors
    ///  (stream corruption) do propagate so the connection owner can close the stream.
    pub async fn dispatch(&self, assembler: &mut FrameAssembler) -> anyhow::Result<()> {
        if !assembler.has_buffered_content() {
            return Ok(());
        }

        assembler.prepare_content();
        assembler.sync()?;

        while assembler.is_current_frame_complete() {
            if let Err(e) = self.consumer.consume(assembler.current_frame()).await {
                error!("frame consumer failed: {:#} - continuing with the next frame", e);
            }

            assembler.prepare_for_next_frame();
            if assembler.has_unconsumed_content() {
                assembler.sync()?;
            }
            else {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use bytes::BytesMut;
    use std::sync::Mutex;
    use crate::frame_header::{FrameHeader, FrameKind};

    struct CollectingConsumer {
        payloads: Mutex<Vec<Vec<u8>>>,
    }
    #[async_trait]
    impl FrameConsumer for CollectingConsumer {
        async fn consume(&self, frame: &Frame) -> anyhow::Result<()> {
            self.payloads.lock().unwrap().push(frame.payload().to_vec());
            Ok(())
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FrameHeader::for_payload(1, FrameKind::Data, payload).copy_bytes_to(&mut buf);
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    fn feed(assembler: &mut FrameAssembler, bytes: &[u8]) {
        let chunk = assembler.writable_chunk();
        chunk[..bytes.len()].copy_from_slice(bytes);
        assembler.bytes_written(bytes.len());
    }

    #[tokio::test]
    async fn test_dispatch_without_content_is_a_noop() {
        // the mock has no expectations, so any consume call would fail the test
        let consumer = Arc::new(MockFrameConsumer::new());
        let dispatcher = FrameDispatcher::new(consumer);
        let mut assembler = FrameAssembler::new(1024);

        dispatcher.dispatch(&mut assembler).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatches_all_frames_of_one_read_in_order() {
        let consumer = Arc::new(CollectingConsumer { payloads: Mutex::new(Vec::new()) });
        let dispatcher = FrameDispatcher::new(consumer.clone());
        let mut assembler = FrameAssembler::new(1024);

        let mut stream = Vec::new();
        for payload in [b"one".as_ref(), b"two", b"three"] {
            stream.extend_from_slice(&framed(payload));
        }
        feed(&mut assembler, &stream);

        dispatcher.dispatch(&mut assembler).await.unwrap();

        assert_eq!(*consumer.payloads.lock().unwrap(),
                   vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[tokio::test]
    async fn test_partial_frame_is_dispatched_once_completed() {
        let consumer = Arc::new(CollectingConsumer { payloads: Mutex::new(Vec::new()) });
        let dispatcher = FrameDispatcher::new(consumer.clone());
        let mut assembler = FrameAssembler::new(1024);

        let bytes = framed(b"split payload");
        feed(&mut assembler, &bytes[..bytes.len() - 4]);
        dispatcher.dispatch(&mut assembler).await.unwrap();
        assert!(consumer.payloads.lock().unwrap().is_empty());

        feed(&mut assembler, &bytes[bytes.len() - 4..]);
        dispatcher.dispatch(&mut assembler).await.unwrap();
        assert_eq!(*consumer.payloads.lock().unwrap(), vec![b"split payload".to_vec()]);
    }

    #[tokio::test]
    async fn test_consumer_failure_does_not_stall_the_loop() {
        struct FailingFirst {
            calls: Mutex<usize>,
            payloads: Mutex<Vec<Vec<u8>>>,
        }
        #[async_trait]
        impl FrameConsumer for FailingFirst {
            async fn consume(&self, frame: &Frame) -> anyhow::Result<()> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    return Err(anyhow!("handler rejected the message"));
                }
                self.payloads.lock().unwrap().push(frame.payload().to_vec());
                Ok(())
            }
        }

        let consumer = Arc::new(FailingFirst { calls: Mutex::new(0), payloads: Mutex::new(Vec::new()) });
        let dispatcher = FrameDispatcher::new(consumer.clone());
        let mut assembler = FrameAssembler::new(1024);

        let mut stream = Vec::new();
        stream.extend_from_slice(&framed(b"rejected"));
        stream.extend_from_slice(&framed(b"delivered"));
        feed(&mut assembler, &stream);

        dispatcher.dispatch(&mut assembler).await.unwrap();

        assert_eq!(*consumer.calls.lock().unwrap(), 2);
        assert_eq!(*consumer.payloads.lock().unwrap(), vec![b"delivered".to_vec()]);
    }

    #[tokio::test]
    async fn test_corruption_propagates() {
        let consumer = Arc::new(CollectingConsumer { payloads: Mutex::new(Vec::new()) });
        let dispatcher = FrameDispatcher::new(consumer);
        let mut assembler = FrameAssembler::new(1024);

        let mut bytes = framed(b"payload");
        bytes[0] ^= 0xff;
        feed(&mut assembler, &bytes);

        assert!(dispatcher.dispatch(&mut assembler).await.is_err());
    }
}
