use crate::ack_listener::ListenerState;
use crate::config::SenderConfig;
use crate::error::SendError;
use crate::socket_registry::SocketRegistry;
use crate::unicast::UnicastSender;
use anyhow::bail;
use std::net::IpAddr;
use std::sync::Arc;

/// Sends each payload to a multicast group.
///
/// Framing, acknowledgment wiring and the socket lifecycle are exactly the unicast
///  machinery - the group address fans the datagram out, and the quorum makes the
///  difference: an acknowledged multicast send succeeds once `min_acks_for_success`
///  distinct group members echoed the ack id, and fails with an ack timeout otherwise,
///  even if some (but too few) acks arrived. Group membership is unknown to the sender,
///  which is why the quorum is explicit configuration.
pub struct MulticastSender {
    inner: UnicastSender,
    min_acks: usize,
}

impl MulticastSender {
    /// Creates a sender using the process-wide socket registry. The destination must be a
    ///  literal multicast group address.
    pub fn new(config: SenderConfig) -> anyhow::Result<MulticastSender> {
        Self::with_registry(config, SocketRegistry::shared())
    }

    pub fn with_registry(
        config: SenderConfig,
        registry: Arc<SocketRegistry>,
    ) -> anyhow::Result<MulticastSender> {
        match config.destination_host.parse::<IpAddr>() {
            Ok(addr) if addr.is_multicast() => {}
            Ok(addr) => bail!("destination {} is not a multicast group address", addr),
            Err(_) => bail!("multicast destination must be a literal group address, not a host name"),
        }

        let min_acks = config.min_acks_for_success;
        Ok(MulticastSender {
            inner: UnicastSender::with_registry(config, registry)?,
            min_acks,
        })
    }

    /// Adjusts the quorum for subsequent sends. Values below 1 are treated as 1.
    pub fn set_min_acks_for_success(&mut self, min_acks: usize) {
        self.min_acks = min_acks.max(1);
    }

    /// Sends one payload to the group, waiting for the configured quorum of distinct
    ///  repliers when acknowledgments are enabled.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        self.inner.send_requiring(payload, self.min_acks).await
    }

    pub async fn start(&self) -> Result<(), SendError> {
        self.inner.start().await
    }

    pub async fn stop(&self) {
        self.inner.stop().await
    }

    pub fn ack_port(&self) -> u16 {
        self.inner.ack_port()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.inner.listener_state()
    }
}
