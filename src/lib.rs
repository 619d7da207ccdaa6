//! Message delivery over UDP datagrams, from best-effort to confirmed: payloads are framed
//!  into single datagrams and sent to a unicast destination or fanned out to a multicast
//!  group, and an optional application-level acknowledgment scheme turns the fire-and-forget
//!  send into a bounded wait for confirmation by one or several receivers.
//!
//! ## Design goals
//!
//! * One payload, one datagram - no chunking, no streams, no connection state
//! * Fire-and-forget sends return as soon as the datagram left the socket
//! * Acknowledged sends block until confirmed, but never unboundedly: the ack timeout is
//!   the worst case, and stopping the handler wakes every blocked send immediately
//! * For multicast, success is a configurable quorum of *distinct* acknowledging members -
//!   the group membership itself stays unknown to the sender
//! * Acknowledgments are correlated strictly by id, so concurrent sends on one handler
//!   never resolve each other
//! * Listening sockets are shared process-wide by local address and closed when the last
//!   user is gone
//! * Explicitly *not* a reliable transport: no retransmission, no congestion control, no
//!   encryption. A lost datagram surfaces as an ack timeout at worst
//!
//! ## Wire format
//!
//! All numbers in network byte order (BE):
//!
//! ```ascii
//! 0: length (u32) - number of bytes after this field. Present only when the length check
//!     is enabled; receivers then reject datagrams whose size disagrees with it.
//! *: ack block - present only when acknowledgments are enabled:
//!     0:  ack id (16 bytes) - correlation id, fresh per send
//!     16: ack host length (u8)
//!     17: ack host (UTF-8) - where the receiver should acknowledge
//!     *:  ack port (u16)
//! *: payload - all remaining bytes (possibly none)
//! ```
//!
//! Neither optional part is self-describing - which of them are present is configuration
//!  shared by both endpoints. The payload is always the trailing bytes of the frame, so a
//!  receiver can check payload bytes without caring about the rest.
//!
//! ## Acknowledgment flow
//!
//! ```ascii
//! sender                                   receiver
//!   |  frame [len][ack id, host, port][payload]  |
//!   |------------------------------------------->|
//!   |                                            | decodes, processes payload
//!   |       ack datagram: textual ack id         |
//!   |<-------------------------------------------|  (from any socket, to host:port)
//!   |
//!   | counts distinct repliers; send returns once the quorum is met
//! ```
//!
//! The ack datagram is not framed: its entire payload is the textual form of the ack id.
//!  Sending it is the receiving application's job - this crate transports and correlates,
//!  it does not auto-reply.

pub mod ack_listener;
pub mod config;
pub mod error;
pub mod frame;
pub mod multicast;
mod send_socket;
pub mod socket_registry;
pub mod unicast;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            // .with_max_level(Level::DEBUG)
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
