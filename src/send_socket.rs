use crate::socket_registry::SocketHandle;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::io;
use std::net::SocketAddr;
use tracing::trace;

/// Abstraction for writing one datagram to a UDP socket, so that unit tests can mock the
///  actual I/O away. Unlike the raw socket, a failed send surfaces to the caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> io::Result<()>;

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for SocketHandle {
    async fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> io::Result<()> {
        let socket = self.socket()?;
        trace!("UDP socket: sending {} bytes to {:?}", packet_buf.len(), to);
        socket.send_to(packet_buf, to).await?;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        SocketHandle::local_addr(self)
    }
}
