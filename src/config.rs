use std::time::Duration;
use anyhow::bail;

pub struct WireConfig {
    /// The largest frame payload this node accepts or produces. A peer declaring a bigger
    ///  length in a frame header is treated as a corrupted stream, and the connection is
    ///  closed rather than resynchronized.
    ///
    /// All reusable frames and pooled buffers are allocated at this size, so choosing it
    ///  too big wastes memory per connection while choosing it too small rejects legitimate
    ///  traffic. There is no fragmentation layer on top.
    pub max_frame_size: usize,

    /// The number of buffers the pool may create before acquisition has to wait for a
    ///  release. Buffers are created lazily, so this is a ceiling rather than an up-front
    ///  allocation.
    pub buffer_pool_max: usize,

    /// Interval at which channel processors look for newly available bytes or pending
    ///  writes. Each probe does a bounded amount of non-blocking work, so this interval
    ///  bounds added latency, not throughput.
    pub probe_interval: Duration,

    /// Timeout for a single connect attempt. Expiry is reported separately from outright
    ///  connection refusal.
    pub connect_timeout: Duration,

    /// Number of consecutive connect/send failures after which an outbound channel marks
    ///  itself broken and stops retrying. The owner must recreate the channel explicitly
    ///  to resume.
    pub max_failures: u32,

    /// Base delay between reconnect attempts; actual delays add random jitter of up to
    ///  the same amount to avoid retry storms from restarting peers.
    pub retry_backoff: Duration,
}

impl WireConfig {
    pub fn default_for_node() -> WireConfig {
        WireConfig {
            max_frame_size: 64 * 1024,
            buffer_pool_max: 128,
            probe_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
            max_failures: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_frame_size < 100 {
            bail!("max frame size is too small");
        }
        if self.buffer_pool_max == 0 {
            bail!("buffer pool must allow at least one buffer");
        }
        if self.max_failures == 0 {
            bail!("at least one send attempt must be allowed");
        }
        Ok(())
    }
}
