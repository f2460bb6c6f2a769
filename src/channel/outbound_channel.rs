use std::net::SocketAddr;
use std::time::Duration;
use anyhow::{bail, Context};
use bytes::BytesMut;
use rand::RngExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use crate::config::WireConfig;
use crate::frame::Frame;
use crate::frame_header::FrameHeader;

/// A managed outbound TCP connection that (re)connects on demand.
///
/// Consecutive connect/send failures are counted; once the configured ceiling is
///  exceeded the channel marks itself broken and refuses further attempts, so a dead
///  peer does not cause an unbounded retry storm. The owner must create a fresh channel
///  to resume. Any successful operation resets the counter.
pub struct OutboundChannel {
    address: SocketAddr,
    connect_timeout: Duration,
    max_failures: u32,
    retry_backoff: Duration,
    stream: Option<TcpStream>,
    consecutive_failures: u32,
    broken: bool,
}

impl OutboundChannel {
    pub fn new(address: SocketAddr, config: &WireConfig) -> OutboundChannel {
        OutboundChannel {
            address,
            connect_timeout: config.connect_timeout,
            max_failures: config.max_failures,
            retry_backoff: config.retry_backoff,
            stream: None,
            consecutive_failures: 0,
            broken: false,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// true once the failure ceiling was exceeded; a broken channel never retries
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// the connected socket, for owners that also read from it
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// serialize header and payload and send them; connects first if necessary
    pub async fn write_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let mut buf = BytesMut::with_capacity(FrameHeader::SERIALIZED_LEN + frame.len());
        frame.copy_bytes_to(&mut buf);
        self.write_bytes(&buf).await
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if self.broken {
            bail!("channel to {} is broken after {} consecutive failures - recreate it to resume",
                  self.address, self.consecutive_failures);
        }

        self.ensure_connected().await?;

        let stream = self.stream.as_mut()
            .expect("ensure_connected leaves a connected stream or fails");
        match stream.write_all(bytes).await {
            Ok(()) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                // tear the socket down so the next write goes through the connect path
                self.note_failure();
                self.close();
                Err(e).with_context(|| format!("sending {} bytes to {}", bytes.len(), self.address))
            }
        }
    }

    /// idempotent: closing an already-closed channel is a no-op
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing connection to {}", self.address);
            drop(stream);
        }
    }

    async fn ensure_connected(&mut self) -> anyhow::Result<()> {
        while self.stream.is_none() {
            if self.consecutive_failures >= self.max_failures {
                self.broken = true;
                bail!("giving up on {} after {} consecutive failed connect attempts",
                      self.address, self.consecutive_failures);
            }

            match timeout(self.connect_timeout, TcpStream::connect(self.address)).await {
                Ok(Ok(stream)) => {
                    debug!("connected to {}", self.address);
                    self.stream = Some(stream);
                    self.consecutive_failures = 0;
                }
                Ok(Err(e)) => {
                    warn!("connect to {} failed: {} - attempt {} of {}",
                          self.address, e, self.consecutive_failures + 1, self.max_failures);
                    self.note_failure();
                    self.backoff().await;
                }
                Err(_) => {
                    warn!("connect to {} timed out after {:?} - attempt {} of {}",
                          self.address, self.connect_timeout, self.consecutive_failures + 1, self.max_failures);
                    self.note_failure();
                    self.backoff().await;
                }
            }
        }
        Ok(())
    }

    fn note_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    /// base delay plus random jitter, so restarting peers do not retry in lockstep
    async fn backoff(&self) {
        let base = self.retry_backoff.as_millis() as u64;
        let jitter = if base > 0 { rand::rng().random_range(0..base) } else { 0 };
        sleep(Duration::from_millis(base + jitter)).await;
    }
}
