//! Socket transport for a distributed actor runtime: TCP and UDP byte streams are
//!  multiplexed into discrete, length-prefixed messages, with reusable pooled buffers so
//!  the receive hot path allocates nothing per message.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *frames* (defined-length chunks of opaque
//!   bytes) over plain sockets - serialization of the payload is the application's
//!   business
//! * No thread ever blocks waiting for network data: all components are driven by
//!   periodic probe ticks that do a bounded amount of non-blocking work (check for
//!   available bytes, read or write once, return). Backpressure is "try again next
//!   tick", never a blocking wait
//! * Receiving reuses one pre-allocated frame and work buffer per connection; response
//!   and request buffers come from an elastic pool and are returned once the OS has
//!   taken the bytes
//! * Frames of one connection reach their consumer in receipt order; when one socket
//!   read carries several complete frames, all of them are dispatched, in stream order,
//!   before the next wait. No ordering exists across connections
//! * Outbound connections (re)connect on demand with bounded retries; a peer that stays
//!   unreachable leaves a channel marked broken rather than retrying forever
//! * Node discovery is a thin multicast broadcast reusing the same framing, plus a TCP
//!   side channel for point-to-point replies
//!
//! ## Frame layout
//!
//! Every framed message starts with a fixed-width header - all fields little-endian:
//!
//! ```ascii
//!  0: magic (i16) - protocol version tag; a mismatch is unrecoverable corruption
//!  2: node id (i16) - the sending node
//!  4: kind (i16) - frame discriminator (data, availability, ...)
//!  6: payload length (i32) - bytes following the header
//! 10: reserved (i16)
//! 12: reserved (i16)
//! ```
//!
//! TCP delivers a byte stream, so a frame may arrive split across many reads, or many
//!  frames may arrive in one read; [frame_assembler::FrameAssembler] reassembles them
//!  incrementally and [frame_dispatcher::FrameDispatcher] delivers every completed
//!  frame. UDP datagrams carry exactly one frame and are parsed in place.
//!
//! ## Discovery micro-protocol
//!
//! Availability broadcasts are line-based text carried as a regular frame payload
//!  (kind `Availability`):
//!
//! ```ascii
//! PUB
//! nm=<publisher-name> addr=<host>:<port>
//! ```
//!
//! Parsing is tolerant: a multicast group sees foreign traffic, so anything malformed
//!  is skipped rather than treated as an error. The same applies to the node address
//!  record format `id=<n> nm=<name> op=<host:port> app=<host:port>`, which this layer
//!  carries untouched.
//!
//! ## Roles
//!
//! * [channel::server_processor::ServerProcessor] - accepts connections and multiplexes
//!   reads / pending writes across all of them on a timer-driven probe; connections are
//!   kept alive by default and closed only when a response asks for it or the peer
//!   disconnects
//! * [channel::client_channel::ClientChannel] - sends requests and probes for response
//!   bytes once primed by the first successful send
//! * [multicast::publisher::MulticastPublisher] / [multicast::subscriber::MulticastSubscriber] -
//!   availability broadcast and group membership

pub mod buffers;
pub mod channel;
pub mod config;
pub mod frame;
pub mod frame_assembler;
pub mod frame_dispatcher;
pub mod frame_header;
pub mod multicast;
pub mod node_record;
pub mod safe_converter;
pub mod scheduler;
