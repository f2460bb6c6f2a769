use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};
use crate::config::WireConfig;
use crate::frame::Frame;
use crate::frame_dispatcher::FrameConsumer;
use crate::frame_header::FrameHeader;
use crate::scheduler::{schedule, Scheduled};

/// Listens on a multicast group and hands every well-formed datagram to the consumer.
///
/// UDP preserves datagram boundaries, so there is no incremental assembly here: each
///  datagram is parsed directly into a single reused [Frame]. Datagrams that do not
///  parse are foreign traffic on the group and are skipped, not errors.
pub struct MulticastSubscriber {
    group: SocketAddrV4,
    socket: UdpSocket,
    frame: Frame,
    scratch: Vec<u8>,
    consumer: Arc<dyn FrameConsumer>,
}

impl MulticastSubscriber {
    pub fn join(
        group: SocketAddrV4,
        config: &WireConfig,
        consumer: Arc<dyn FrameConsumer>,
    ) -> anyhow::Result<MulticastSubscriber> {
        // several subscribers on one host share the group port, which needs the
        //  reuse-address setup below, so the socket is built with socket2 and then
        //  handed to tokio
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        let bind_addr = std::net::SocketAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()));
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!("joined multicast group {}", group);

        Ok(MulticastSubscriber {
            group,
            socket,
            frame: Frame::new(config.max_frame_size),
            scratch: vec![0; config.max_frame_size + FrameHeader::SERIALIZED_LEN],
            consumer,
        })
    }

    /// one tick: drain every immediately available datagram
    pub async fn probe(&mut self) {
        loop {
            match self.socket.try_recv_from(&mut self.scratch) {
                Ok((n, from)) => {
                    trace!("datagram of {} bytes from {}", n, from);
                    match self.frame.from_datagram(&self.scratch[..n]) {
                        Ok(()) => {
                            if let Err(e) = self.consumer.consume(&self.frame).await {
                                error!("availability consumer failed: {:#}", e);
                            }
                        }
                        Err(e) => {
                            debug!("skipping foreign datagram from {} on {}: {:#}", from, self.group, e);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return;
                }
                Err(e) => {
                    warn!("receive on group {} failed: {}", self.group, e);
                    return;
                }
            }
        }
    }

    /// probe on a fixed interval until the returned handle is cancelled
    pub fn start(self, probe_interval: Duration) -> Scheduled {
        let subscriber = Arc::new(Mutex::new(self));
        schedule(probe_interval, move || {
            let subscriber = subscriber.clone();
            async move {
                subscriber.lock().await.probe().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::BytesMut;
    use rand::RngExt;
    use std::sync::Mutex as StdMutex;
    use tokio::time::sleep;
    use crate::frame_header::FrameKind;
    use crate::multicast::availability::PublisherAvailability;

    struct CollectingConsumer {
        payloads: StdMutex<Vec<Vec<u8>>>,
    }
    #[async_trait]
    impl FrameConsumer for CollectingConsumer {
        async fn consume(&self, frame: &Frame) -> anyhow::Result<()> {
            self.payloads.lock().unwrap().push(frame.payload().to_vec());
            Ok(())
        }
    }

    fn random_group() -> SocketAddrV4 {
        let mut rng = rand::rng();
        SocketAddrV4::new(
            Ipv4Addr::new(239, 255, rng.random_range(1..255), rng.random_range(1..255)),
            rng.random_range(20000..40000),
        )
    }

    async fn send_datagram(group: SocketAddrV4, bytes: &[u8]) {
        let sender = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        sender.set_multicast_loop_v4(true).unwrap();
        sender.send_to(bytes, group).await.unwrap();
    }

    #[tokio::test]
    async fn test_receives_framed_availability_broadcast() {
        let group = random_group();
        let consumer = Arc::new(CollectingConsumer { payloads: StdMutex::new(Vec::new()) });
        let mut subscriber = MulticastSubscriber::join(
            group, &WireConfig::default_for_node(), consumer.clone()).unwrap();

        let text = PublisherAvailability::new("pub-x", "127.0.0.1", 4711).to_text();
        let mut datagram = BytesMut::new();
        FrameHeader::for_payload(1, FrameKind::Availability, text.as_bytes()).copy_bytes_to(&mut datagram);
        datagram.extend_from_slice(text.as_bytes());

        send_datagram(group, &datagram).await;
        sleep(Duration::from_millis(100)).await;

        subscriber.probe().await;

        let payloads = consumer.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        let parsed = PublisherAvailability::from_text(std::str::from_utf8(&payloads[0]).unwrap());
        assert!(parsed.is_valid());
        assert_eq!(parsed.name, "pub-x");
    }

    #[tokio::test]
    async fn test_foreign_datagrams_are_skipped() {
        let group = random_group();
        let consumer = Arc::new(CollectingConsumer { payloads: StdMutex::new(Vec::new()) });
        let mut subscriber = MulticastSubscriber::join(
            group, &WireConfig::default_for_node(), consumer.clone()).unwrap();

        send_datagram(group, b"not a frame").await;
        sleep(Duration::from_millis(100)).await;

        subscriber.probe().await;
        assert!(consumer.payloads.lock().unwrap().is_empty());
    }
}
