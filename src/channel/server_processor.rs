use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::buffers::buffer_pool::{BufferPool, PooledBuffer};
use crate::config::WireConfig;

/// Receives the bytes one connection had available at probe time. Responses go through
///  the [Responder], which may be cloned and used after the callback returns.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestConsumer: Send + Sync + 'static {
    async fn consume(&self, responder: Arc<Responder>, bytes: &[u8]) -> anyhow::Result<()>;
}

/// The write-side facet of a connection context: a FIFO of pending response buffers
///  plus the close-after-response flag.
///
/// Connections are kept alive by default; a response created with
///  `close_following = true` arms deferred teardown, which happens once the write queue
///  has fully drained.
pub struct Responder {
    id: u64,
    pool: Arc<BufferPool>,
    queue: Mutex<VecDeque<PooledBuffer>>,
    close_after_response: AtomicBool,
}

impl Responder {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn respond_with(&self, bytes: &[u8], close_following: bool) {
        let mut buffer = self.pool.acquire();
        buffer.put_slice(bytes);
        buffer.flip();
        self.queue.lock().unwrap().push_back(buffer);

        if close_following {
            self.close_after_response.store(true, Ordering::Release);
        }
    }

    fn next_pending(&self) -> Option<PooledBuffer> {
        self.queue.lock().unwrap().pop_front()
    }

    fn put_back_first(&self, buffer: PooledBuffer) {
        self.queue.lock().unwrap().push_front(buffer);
    }

    fn is_drained(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    fn should_close(&self) -> bool {
        self.close_after_response.load(Ordering::Acquire)
    }
}

/// Per-connection state: the socket, a dedicated pooled request buffer, and the
///  responder. Created on accept, destroyed on explicit close or peer disconnect;
///  dropping it releases the buffers and closes the socket.
struct Context {
    stream: TcpStream,
    request_buffer: PooledBuffer,
    responder: Arc<Responder>,
}

/// Accepts connections and multiplexes reads and writes across all of them on a
///  timer-driven probe.
///
/// Accepting happens in a small spawned task (accepting is inherently a wait); accepted
///  sockets are adopted into the context map at the start of the next probe. Everything
///  else is non-blocking: per context and tick, either the available request bytes are
///  read and handed to the consumer, or the pending write queue is drained.
pub struct ServerProcessor {
    name: String,
    pool: Arc<BufferPool>,
    consumer: Arc<dyn RequestConsumer>,
    accept_rx: mpsc::UnboundedReceiver<(TcpStream, SocketAddr)>,
    contexts: FxHashMap<u64, Context>,
    next_context_id: u64,
}

impl ServerProcessor {
    /// Bind and return the processor plus the address actually bound (port 0 resolves
    ///  to an ephemeral port). The probe loop is NOT started; drive [ServerProcessor::probe]
    ///  directly or hand the processor to [ServerProcessor::start].
    pub async fn bind(
        name: &str,
        bind_addr: SocketAddr,
        config: &WireConfig,
        consumer: Arc<dyn RequestConsumer>,
    ) -> anyhow::Result<(ServerProcessor, SocketAddr)> {
        config.validate()?;

        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        debug!("{}: listening on {}", name, local_addr);

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let accept_name = name.to_string();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        trace!("{}: accepted connection from {}", accept_name, peer);
                        if accept_tx.send((stream, peer)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("{}: accept failed: {}", accept_name, e);
                    }
                }
            }
        });

        let processor = ServerProcessor {
            name: name.to_string(),
            pool: Arc::new(BufferPool::new(config.max_frame_size, config.buffer_pool_max)),
            consumer,
            accept_rx,
            contexts: FxHashMap::default(),
            next_context_id: 0,
        };
        Ok((processor, local_addr))
    }

    pub fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// one timer tick: adopt new connections, then read or write once per context
    pub async fn probe(&mut self) {
        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "server_probe", ?correlation_id);
        self.do_probe().instrument(span).await
    }

    async fn do_probe(&mut self) {
        while let Ok((stream, peer)) = self.accept_rx.try_recv() {
            let id = self.next_context_id;
            self.next_context_id += 1;

            debug!("{}: new context {} for peer {}", self.name, id, peer);
            self.contexts.insert(id, Context {
                stream,
                request_buffer: self.pool.acquire(),
                responder: Arc::new(Responder {
                    id,
                    pool: self.pool.clone(),
                    queue: Mutex::new(VecDeque::new()),
                    close_after_response: AtomicBool::new(false),
                }),
            });
        }

        let mut closing = Vec::new();
        for (&id, context) in self.contexts.iter_mut() {
            match Self::probe_context(context, &self.consumer).await {
                Ok(true) => {}
                Ok(false) => {
                    closing.push(id);
                }
                Err(e) => {
                    warn!("{}: context {} failed: {:#} - closing it", self.name, id, e);
                    closing.push(id);
                }
            }
        }

        for id in closing {
            debug!("{}: tearing down context {}", self.name, id);
            self.contexts.remove(&id);
        }
    }

    /// returns Ok(false) when the context should be torn down (peer disconnect or
    ///  completed close-after-response)
    async fn probe_context(context: &mut Context, consumer: &Arc<dyn RequestConsumer>) -> anyhow::Result<bool> {
        let mut read_any = false;

        loop {
            if !context.request_buffer.has_remaining() {
                // request larger than the buffer: deliver this part, read on next tick
                break;
            }
            match context.stream.try_read(context.request_buffer.writable()) {
                Ok(0) => {
                    trace!("context {}: zero-byte read - peer disconnected", context.responder.id());
                    return Ok(false);
                }
                Ok(n) => {
                    trace!("context {}: read {} request bytes", context.responder.id(), n);
                    context.request_buffer.advance(n);
                    read_any = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    return Err(e.into());
                }
            }
        }

        if read_any {
            context.request_buffer.flip();
            if let Err(e) = consumer.consume(context.responder.clone(), context.request_buffer.content()).await {
                error!("request consumer failed for context {}: {:#}", context.responder.id(), e);
            }
            context.request_buffer.clear();
            return Ok(true);
        }

        // nothing to read: drain pending writes instead
        while let Some(mut buffer) = context.responder.next_pending() {
            while buffer.has_remaining() {
                match context.stream.try_write(buffer.content()) {
                    Ok(0) => {
                        return Ok(false);
                    }
                    Ok(n) => {
                        trace!("context {}: wrote {} response bytes", context.responder.id(), n);
                        buffer.advance(n);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        // keep the remainder first in line for the next tick
                        context.responder.put_back_first(buffer);
                        return Ok(true);
                    }
                    Err(e) => {
                        return Err(e.into());
                    }
                }
            }
            buffer.release();
        }

        if context.responder.should_close() && context.responder.is_drained() {
            debug!("context {}: close-after-response completed", context.responder.id());
            return Ok(false);
        }
        Ok(true)
    }

    /// hand the processor over to a spawned probe loop
    pub fn start(mut self, probe_interval: Duration) -> ServerHandle {
        let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                select! {
                    _ = stop_rx.recv() => {
                        debug!("{}: stopping", self.name);
                        break;
                    }
                    _ = ticker.tick() => {
                        self.probe().await;
                    }
                }
            }
        });

        ServerHandle { stop_tx }
    }
}

/// Front for a started [ServerProcessor] loop.
pub struct ServerHandle {
    stop_tx: mpsc::UnboundedSender<()>,
}

impl ServerHandle {
    /// idempotent: repeated stops are no-ops
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}
