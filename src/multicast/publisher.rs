use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use bytes::BytesMut;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, trace, warn};
use crate::channel::selection_reader::{ReadOutcome, SelectionReader};
use crate::config::WireConfig;
use crate::frame_dispatcher::FrameConsumer;
use crate::frame_header::{FrameHeader, FrameKind};
use crate::multicast::availability::PublisherAvailability;

/// Broadcasts framed messages to a multicast group and answers point-to-point traffic
///  on a TCP side channel.
///
/// Outbound datagrams go through a FIFO queue drained one per probe; the side channel
///  reuses the regular framing and dispatch machinery, so subscribers can reach the
///  publisher with the same wire format they discover it by.
pub struct MulticastPublisher {
    name: String,
    node_id: i16,
    group: SocketAddrV4,
    socket: UdpSocket,
    send_queue: VecDeque<Vec<u8>>,
    side_channel_addr: SocketAddr,
    accept_rx: mpsc::UnboundedReceiver<TcpStream>,
    readers: Vec<SelectionReader>,
    consumer: Arc<dyn FrameConsumer>,
    max_frame_size: usize,
}

impl MulticastPublisher {
    pub async fn bind(
        name: &str,
        node_id: i16,
        group: SocketAddrV4,
        config: &WireConfig,
        consumer: Arc<dyn FrameConsumer>,
    ) -> anyhow::Result<MulticastPublisher> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_multicast_loop_v4(true)?;

        let listener = TcpListener::bind("0.0.0.0:0").await?;
        let side_channel_addr = listener.local_addr()?;
        debug!("{}: side channel listening on {}", name, side_channel_addr);

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let accept_name = name.to_string();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        trace!("{}: side channel connection from {}", accept_name, peer);
                        if accept_tx.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("{}: side channel accept failed: {}", accept_name, e);
                    }
                }
            }
        });

        Ok(MulticastPublisher {
            name: name.to_string(),
            node_id,
            group,
            socket,
            send_queue: VecDeque::new(),
            side_channel_addr,
            accept_rx,
            readers: Vec::new(),
            consumer,
            max_frame_size: config.max_frame_size,
        })
    }

    pub fn side_channel_addr(&self) -> SocketAddr {
        self.side_channel_addr
    }

    pub fn pending_sends(&self) -> usize {
        self.send_queue.len()
    }

    /// enqueue the well-known "I am here" record advertising the side channel address
    pub fn send_availability(&mut self) {
        let availability = PublisherAvailability::new(
            &self.name,
            "127.0.0.1",
            self.side_channel_addr.port(),
        );
        self.enqueue(FrameKind::Availability, availability.to_text().as_bytes());
    }

    /// enqueue an opaque payload for broadcast
    pub fn send(&mut self, payload: &[u8]) {
        self.enqueue(FrameKind::Data, payload);
    }

    fn enqueue(&mut self, kind: FrameKind, payload: &[u8]) {
        let mut datagram = BytesMut::with_capacity(FrameHeader::SERIALIZED_LEN + payload.len());
        FrameHeader::for_payload(self.node_id, kind, payload).copy_bytes_to(&mut datagram);
        datagram.extend_from_slice(payload);
        self.send_queue.push_back(datagram.to_vec());
    }

    /// one tick: adopt side-channel connections, probe their readers, send one datagram
    pub async fn probe(&mut self) {
        while let Ok(stream) = self.accept_rx.try_recv() {
            self.readers.push(SelectionReader::new(stream, self.max_frame_size, self.consumer.clone()));
        }

        let mut open = Vec::with_capacity(self.readers.len());
        for mut reader in self.readers.drain(..) {
            match reader.probe().await {
                Ok(ReadOutcome::Open) => open.push(reader),
                Ok(ReadOutcome::PeerClosed) => {
                    debug!("{}: side channel peer disconnected", self.name);
                }
                Err(e) => {
                    warn!("{}: closing side channel connection: {:#}", self.name, e);
                }
            }
        }
        self.readers = open;

        if let Some(datagram) = self.send_queue.front() {
            match self.socket.try_send_to(datagram, SocketAddr::V4(self.group)) {
                Ok(n) => {
                    trace!("{}: published {} bytes to {}", self.name, n, self.group);
                    self.send_queue.pop_front();
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // try again next tick
                }
                Err(e) => {
                    warn!("{}: publish to {} failed: {} - dropping the datagram", self.name, self.group, e);
                    self.send_queue.pop_front();
                }
            }
        }
    }

    /// hand the publisher over to a spawned loop driven by commands and probe ticks
    pub fn start(mut self, probe_interval: Duration) -> MulticastPublisherHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                select! {
                    command = rx.recv() => {
                        match command {
                            Some(PublisherCommand::SendAvailability) => self.send_availability(),
                            Some(PublisherCommand::Send(payload)) => self.send(&payload),
                            Some(PublisherCommand::Stop) | None => {
                                debug!("{}: stopping", self.name);
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        self.probe().await;
                    }
                }
            }
        });

        MulticastPublisherHandle { tx }
    }
}

enum PublisherCommand {
    SendAvailability,
    Send(Vec<u8>),
    Stop,
}

#[derive(Clone)]
pub struct MulticastPublisherHandle {
    tx: mpsc::UnboundedSender<PublisherCommand>,
}

impl MulticastPublisherHandle {
    pub fn send_availability(&self) {
        let _ = self.tx.send(PublisherCommand::SendAvailability);
    }

    pub fn send(&self, payload: &[u8]) {
        let _ = self.tx.send(PublisherCommand::Send(payload.to_vec()));
    }

    /// idempotent
    pub fn stop(&self) {
        let _ = self.tx.send(PublisherCommand::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::time::sleep;
    use crate::frame::Frame;

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

    fn test_group() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(239, 255, 17, 17), 0)
    }

    #[tokio::test]
    async fn test_availability_is_queued_and_drained_one_per_probe() {
        let consumer = Arc::new(CollectingConsumer { payloads: Mutex::new(Vec::new()) });
        let mut publisher = MulticastPublisher::bind(
            "pub-1", 1, test_group(), &WireConfig::default_for_node(), consumer).await.unwrap();

        publisher.send_availability();
        publisher.send(b"extra broadcast");
        assert_eq!(publisher.pending_sends(), 2);

        // group port 0 means the datagram goes nowhere useful, but the send succeeds
        publisher.probe().await;
        assert_eq!(publisher.pending_sends(), 1);
        publisher.probe().await;
        assert_eq!(publisher.pending_sends(), 0);
    }

    #[tokio::test]
    async fn test_side_channel_dispatches_framed_requests() {
        let consumer = Arc::new(CollectingConsumer { payloads: Mutex::new(Vec::new()) });
        let mut publisher = MulticastPublisher::bind(
            "pub-2", 1, test_group(), &WireConfig::default_for_node(), consumer.clone()).await.unwrap();

        let mut subscriber_side = TcpStream::connect(publisher.side_channel_addr()).await.unwrap();

        let mut request = BytesMut::new();
        FrameHeader::for_payload(9, FrameKind::Data, b"give me the details").copy_bytes_to(&mut request);
        request.extend_from_slice(b"give me the details");
        subscriber_side.write_all(&request).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        publisher.probe().await; // adopt the connection
        publisher.probe().await; // read the request

        assert_eq!(*consumer.payloads.lock().unwrap(), vec![b"give me the details".to_vec()]);
    }

    #[tokio::test]
    async fn test_availability_text_includes_side_channel_port() {
        let consumer = Arc::new(CollectingConsumer { payloads: Mutex::new(Vec::new()) });
        let mut publisher = MulticastPublisher::bind(
            "pub-3", 1, test_group(), &WireConfig::default_for_node(), consumer).await.unwrap();
        let port = publisher.side_channel_addr().port();

        publisher.send_availability();
        let datagram = publisher.send_queue.front().unwrap().clone();

        let mut frame = Frame::new(1024);
        frame.from_datagram(&datagram).unwrap();
        assert_eq!(frame.header().frame_kind(), Some(FrameKind::Availability));

        let availability = PublisherAvailability::from_text(std::str::from_utf8(frame.payload()).unwrap());
        assert!(availability.is_valid());
        assert_eq!(availability.name, "pub-3");
        assert_eq!(availability.port, port);
    }
}
