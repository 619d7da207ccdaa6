use crate::ack_listener::{AckListener, ListenerState};
use crate::config::SenderConfig;
use crate::error::SendError;
use crate::frame::{AckHeader, AckId, Frame};
use crate::send_socket::SendSocket;
use crate::socket_registry::{SocketHandle, SocketRegistry};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Sends payloads as single UDP datagrams to one destination.
///
/// Without acknowledgments a send is fire-and-forget: it returns as soon as the datagram
///  left the socket, whether or not anybody listens. With acknowledgments enabled, every
///  frame carries a fresh correlation id plus the ack return address, and the send blocks
///  until the receiver echoed the id back or the timeout passed.
///
/// The outbound socket is acquired lazily from the [SocketRegistry] on first send, and the
///  ack listener comes up lazily with the first acknowledged send (or eagerly via
///  [UnicastSender::start]). After [UnicastSender::stop] the sender is reusable - the next
///  send re-acquires its resources.
pub struct UnicastSender {
    config: SenderConfig,
    registry: Arc<SocketRegistry>,
    listener: AckListener,
    outbound: Mutex<Option<Arc<SocketHandle>>>,
}

impl UnicastSender {
    /// Creates a sender using the process-wide socket registry.
    pub fn new(config: SenderConfig) -> anyhow::Result<UnicastSender> {
        Self::with_registry(config, SocketRegistry::shared())
    }

    pub fn with_registry(
        config: SenderConfig,
        registry: Arc<SocketRegistry>,
    ) -> anyhow::Result<UnicastSender> {
        config.validate()?;

        // the ack listener binds in the sender's address family
        let ack_bind: SocketAddr = if config.local_address.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, config.ack_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, config.ack_port).into()
        };
        let listener = AckListener::new(ack_bind, registry.clone());
        Ok(UnicastSender {
            config,
            registry,
            listener,
            outbound: Mutex::new(None),
        })
    }

    /// Sends one payload. Blocking behavior and error cases depend on the configuration,
    ///  see [UnicastSender]. The payload may be empty - an empty datagram is legal.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_requiring(payload, 1).await
    }

    /// Brings up the ack listener eagerly so that [UnicastSender::ack_port] is valid before
    ///  the first send. Without acknowledgments configured this does nothing.
    pub async fn start(&self) -> Result<(), SendError> {
        if self.config.acknowledge {
            self.listener.start().await?;
        }
        Ok(())
    }

    /// Stops the ack listener - waking all sends still blocked on acknowledgment with
    ///  [SendError::Stopped] - and releases the outbound socket.
    pub async fn stop(&self) {
        self.listener.stop().await;

        let outbound = self.outbound.lock().await.take();
        if let Some(handle) = outbound {
            self.registry.release(&handle).await;
        }
    }

    /// The ack listener's port, 0 while it is not listening. With `ack_port` 0 in the
    ///  configuration this is the way to learn the ephemeral port receivers reply to.
    pub fn ack_port(&self) -> u16 {
        self.listener.port()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub(crate) async fn send_requiring(
        &self,
        payload: &[u8],
        required_acks: usize,
    ) -> Result<(), SendError> {
        let socket = self.outbound_socket().await?;
        self.send_on(socket.as_ref(), payload, required_acks).await
    }

    /// The actual send path, with the socket abstracted away for testability.
    async fn send_on(
        &self,
        socket: &dyn SendSocket,
        payload: &[u8],
        required_acks: usize,
    ) -> Result<(), SendError> {
        let to = self.resolve_destination().await?;

        if !self.config.acknowledge {
            let frame = Frame::new(None, Bytes::copy_from_slice(payload));
            let buf = self.encode(&frame)?;
            socket.send_packet(to, &buf).await?;
            trace!("sent {:?} to {:?}", frame, to);
            return Ok(());
        }

        self.listener.start().await?;

        let ack_host = self
            .config
            .ack_host
            .as_deref()
            .expect("validated at construction: ack_host is present when acknowledge is set");
        let id = AckId::new();
        let ack = AckHeader::new(id, ack_host, self.listener.port());
        let frame = Frame::new(Some(ack), Bytes::copy_from_slice(payload));
        let buf = self.encode(&frame)?;

        let rx = self.listener.register(id, required_acks).await;
        trace!("sending {:?} to {:?}, awaiting {} ack(s)", frame, to, required_acks);
        if let Err(e) = socket.send_packet(to, &buf).await {
            // the frame never left, nobody can ever ack it
            self.listener.forget(&id).await;
            return Err(e.into());
        }

        self.listener
            .await_quorum(id, rx, self.config.ack_timeout, required_acks)
            .await
    }

    fn encode(&self, frame: &Frame) -> Result<BytesMut, SendError> {
        let mut buf = BytesMut::with_capacity(frame.serialized_len(self.config.length_check));
        frame.ser(self.config.length_check, &mut buf)?;
        Ok(buf)
    }

    /// Destination resolution happens per send; only addresses of the outbound socket's
    ///  family are candidates.
    async fn resolve_destination(&self) -> Result<SocketAddr, SendError> {
        let host = self.config.destination_host.as_str();
        let port = self.config.destination_port;
        let local_is_v4 = self.config.local_address.is_ipv4();

        lookup_host((host, port))
            .await?
            .find(|addr| addr.is_ipv4() == local_is_v4)
            .ok_or_else(|| {
                SendError::Transport(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("destination {}:{} did not resolve for the local address family", host, port),
                ))
            })
    }

    async fn outbound_socket(&self) -> Result<Arc<SocketHandle>, SendError> {
        let mut lock = self.outbound.lock().await;
        if let Some(handle) = lock.as_ref() {
            return Ok(handle.clone());
        }

        let handle = Arc::new(self.registry.acquire(self.config.local_address).await?);
        if let Some(ttl) = self.config.time_to_live {
            handle.socket()?.set_multicast_ttl_v4(ttl)?;
        }
        debug!("outbound socket bound to {:?}", handle.local_addr());
        *lock = Some(handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_socket::MockSendSocket;
    use std::str::FromStr;
    use std::time::Duration;

    fn isolated(config: SenderConfig) -> UnicastSender {
        UnicastSender::with_registry(config, Arc::new(SocketRegistry::new())).unwrap()
    }

    #[tokio::test]
    async fn test_fire_and_forget_sends_exact_payload_bytes() {
        let sender = isolated(SenderConfig::fire_and_forget("127.0.0.1", 9999));

        let mut socket = MockSendSocket::new();
        socket
            .expect_send_packet()
            .withf(|to, buf| {
                *to == SocketAddr::from_str("127.0.0.1:9999").unwrap() && buf == b"foo".as_slice()
            })
            .times(1)
            .returning(|_, _| Ok(()));

        sender.send_on(&socket, b"foo", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_fire_and_forget_prepends_length_field_when_configured() {
        let mut config = SenderConfig::fire_and_forget("127.0.0.1", 9999);
        config.length_check = true;
        let sender = isolated(config);

        let mut socket = MockSendSocket::new();
        socket
            .expect_send_packet()
            .withf(|_, buf| buf == [0, 0, 0, 3, b'f', b'o', b'o'].as_slice())
            .times(1)
            .returning(|_, _| Ok(()));

        sender.send_on(&socket, b"foo", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_errors_propagate_to_the_caller() {
        let sender = isolated(SenderConfig::fire_and_forget("127.0.0.1", 9999));

        let mut socket = MockSendSocket::new();
        socket
            .expect_send_packet()
            .times(1)
            .returning(|_, _| Err(io::Error::other("no route")));

        let result = sender.send_on(&socket, b"foo", 1).await;
        assert!(matches!(result, Err(SendError::Transport(_))));
    }

    #[tokio::test]
    async fn test_acked_send_embeds_listener_address_and_times_out_unacked() {
        let sender = isolated(SenderConfig::acknowledged(
            "127.0.0.1",
            9999,
            "127.0.0.1",
            0,
            Duration::from_millis(50),
        ));

        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut socket = MockSendSocket::new();
        let seen_in_mock = seen.clone();
        socket
            .expect_send_packet()
            .withf(move |_, buf| {
                let mut b = buf;
                let frame = Frame::try_deser(&mut b, true, true).unwrap();
                *seen_in_mock.lock().unwrap() = Some(frame);
                true
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let result = sender.send_on(&socket, b"foobar", 1).await;
        match result {
            Err(SendError::AckTimeout { required, received, .. }) => {
                assert_eq!(required, 1);
                assert_eq!(received, 0);
            }
            other => panic!("expected AckTimeout, got {:?}", other),
        }

        let frame = seen.lock().unwrap().take().unwrap();
        let ack = frame.ack.unwrap();
        assert_eq!(ack.host, "127.0.0.1");
        assert_ne!(ack.port, 0);
        assert_eq!(ack.port, sender.ack_port());
        assert_eq!(frame.payload.as_ref(), b"foobar");

        sender.stop().await;
    }

    #[tokio::test]
    async fn test_failed_send_withdraws_the_pending_entry() {
        let sender = isolated(SenderConfig::acknowledged(
            "127.0.0.1",
            9999,
            "127.0.0.1",
            0,
            Duration::from_secs(5),
        ));

        let mut socket = MockSendSocket::new();
        socket
            .expect_send_packet()
            .times(1)
            .returning(|_, _| Err(io::Error::other("no route")));

        // fails fast - no waiting out the 5s ack timeout for a frame that never left
        let result = sender.send_on(&socket, b"foo", 1).await;
        assert!(matches!(result, Err(SendError::Transport(_))));

        sender.stop().await;
    }
}
