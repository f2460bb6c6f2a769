use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, trace};
use crate::buffers::buffer_pool::BufferPool;
use crate::channel::outbound_channel::OutboundChannel;
use crate::config::WireConfig;

/// Receives response bytes from a client channel.
///
/// Delivery is byte-oriented: one callback carries whatever was available on the socket
///  when the probe ran, which may be a partial response or several responses combined.
///  Interpreting boundaries is the consumer's business.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseConsumer: Send + Sync + 'static {
    async fn consume(&self, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Client side of a request/response exchange: requests are pushed with
///  [ClientChannel::request_with], responses are pulled by the periodic
///  [ClientChannel::probe] and handed to the [ResponseConsumer].
pub struct ClientChannel {
    outbound: OutboundChannel,
    pool: Arc<BufferPool>,
    consumer: Arc<dyn ResponseConsumer>,
    closed: bool,
    /// probing only starts once a request went out - a read probe must not race ahead
    ///  of connection establishment
    can_start_probing: bool,
}

impl ClientChannel {
    pub fn new(
        address: SocketAddr,
        config: &WireConfig,
        pool: Arc<BufferPool>,
        consumer: Arc<dyn ResponseConsumer>,
    ) -> ClientChannel {
        ClientChannel {
            outbound: OutboundChannel::new(address, config),
            pool,
            consumer,
            closed: false,
            can_start_probing: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_broken(&self) -> bool {
        self.outbound.is_broken()
    }

    /// Send request bytes, connecting (with bounded retries) first if necessary. On
    ///  failure the underlying socket is torn down, so the next request reconnects from
    ///  scratch.
    pub async fn request_with(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if self.closed {
            bail!("channel to {} is closed", self.outbound.address());
        }

        self.outbound.write_bytes(bytes).await?;
        self.can_start_probing = true;
        Ok(())
    }

    /// Collect whatever response bytes are immediately available and hand them to the
    ///  consumer. Never waits: a would-block ends the probe until the next tick.
    pub async fn probe(&mut self) {
        if self.closed || !self.can_start_probing {
            return;
        }
        let Some(stream) = self.outbound.stream() else {
            return;
        };

        let mut buffer = self.pool.acquire();
        let mut peer_closed = false;

        loop {
            if !buffer.has_remaining() {
                // response larger than one pooled buffer: deliver this part, the rest
                //  follows on the next probe
                break;
            }
            match stream.try_read(buffer.writable()) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    trace!("received {} response bytes from {}", n, self.outbound.address());
                    buffer.advance(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    error!("receive from {} failed: {} - closing the connection", self.outbound.address(), e);
                    peer_closed = true;
                    break;
                }
            }
        }

        if buffer.position() > 0 {
            buffer.flip();
            if let Err(e) = self.consumer.consume(buffer.content()).await {
                error!("response consumer failed: {:#}", e);
            }
        }
        buffer.release();

        if peer_closed {
            debug!("peer {} closed the connection", self.outbound.address());
            self.outbound.close();
            self.can_start_probing = false;
        }
    }

    /// terminal close; further requests fail. Idempotent.
    pub fn close(&mut self) {
        self.outbound.close();
        self.closed = true;
    }

    /// Hand the channel over to a spawned loop that serves requests from the handle and
    ///  probes for responses at the given interval.
    pub fn start(mut self, probe_interval: Duration) -> ClientChannelHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                select! {
                    command = rx.recv() => {
                        match command {
                            Some(ClientCommand::Request(bytes)) => {
                                if let Err(e) = self.request_with(&bytes).await {
                                    error!("request to {} failed: {:#}", self.outbound.address(), e);
                                }
                            }
                            Some(ClientCommand::Close) | None => {
                                self.close();
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if self.closed {
                            break;
                        }
                        self.probe().await;
                    }
                }
            }
        });

        ClientChannelHandle { tx }
    }
}

enum ClientCommand {
    Request(Vec<u8>),
    Close,
}

/// Cheap cloneable front for a started [ClientChannel] loop.
#[derive(Clone)]
pub struct ClientChannelHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientChannelHandle {
    pub fn request_with(&self, bytes: &[u8]) -> anyhow::Result<()> {
        if self.tx.send(ClientCommand::Request(bytes.to_vec())).is_err() {
            bail!("channel loop has terminated");
        }
        Ok(())
    }

    /// idempotent: the loop shuts down on the first close, later ones are no-ops
    pub fn close(&self) {
        let _ = self.tx.send(ClientCommand::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    struct CollectingConsumer {
        chunks: Mutex<Vec<Vec<u8>>>,
    }
    #[async_trait]
    impl ResponseConsumer for CollectingConsumer {
        async fn consume(&self, bytes: &[u8]) -> anyhow::Result<()> {
            self.chunks.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn test_config() -> WireConfig {
        let mut config = WireConfig::default_for_node();
        config.max_failures = 2;
        config.retry_backoff = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_probe_is_a_noop_before_first_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool = Arc::new(BufferPool::new(1024, 4));
        let consumer = Arc::new(CollectingConsumer { chunks: Mutex::new(Vec::new()) });

        let mut channel = ClientChannel::new(listener.local_addr().unwrap(), &test_config(), pool, consumer.clone());
        channel.probe().await;

        assert!(consumer.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_then_probe_delivers_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = Arc::new(BufferPool::new(1024, 4));
        let consumer = Arc::new(CollectingConsumer { chunks: Mutex::new(Vec::new()) });

        let mut channel = ClientChannel::new(addr, &test_config(), pool, consumer.clone());
        channel.request_with(b"ping").await.unwrap();

        let (mut server_side, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut server_side, &mut request).await.unwrap();
        assert_eq!(&request, b"ping");

        server_side.write_all(b"pong").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        channel.probe().await;
        assert_eq!(*consumer.chunks.lock().unwrap(), vec![b"pong".to_vec()]);
    }

    #[tokio::test]
    async fn test_request_on_closed_channel_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool = Arc::new(BufferPool::new(1024, 4));
        let consumer = Arc::new(CollectingConsumer { chunks: Mutex::new(Vec::new()) });

        let mut channel = ClientChannel::new(listener.local_addr().unwrap(), &test_config(), pool, consumer);
        channel.close();
        channel.close();

        assert!(channel.request_with(b"ping").await.is_err());
    }

    #[tokio::test]
    async fn test_peer_disconnect_resets_priming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = Arc::new(BufferPool::new(1024, 4));
        let consumer = Arc::new(CollectingConsumer { chunks: Mutex::new(Vec::new()) });

        let mut channel = ClientChannel::new(addr, &test_config(), pool, consumer.clone());
        channel.request_with(b"ping").await.unwrap();

        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);
        sleep(Duration::from_millis(50)).await;

        channel.probe().await;
        assert!(consumer.chunks.lock().unwrap().is_empty());

        // the next probe must not touch the torn-down socket
        channel.probe().await;
        assert!(!channel.is_closed());
    }
}
