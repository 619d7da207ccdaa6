//! Process-wide sharing of bound UDP sockets. Several sending handlers may be configured
//!  with the same local address; the registry makes sure there is exactly one bind per
//!  address and closes the socket once the last user released it.

use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, trace};

struct SharedSocket {
    socket: Arc<UdpSocket>,
    use_count: usize,
}

/// Hands out shared UDP sockets keyed by the requested bind address.
///
/// A request for port 0 is a request for a private ephemeral socket: those are deliberately
///  not shared, since two ack listeners reading one socket would consume each other's
///  datagrams. Shared handles must be released through the registry or the socket stays
///  bound for the process lifetime; private ones also close when the handle is dropped.
pub struct SocketRegistry {
    sockets: Mutex<FxHashMap<SocketAddr, SharedSocket>>,
}

impl SocketRegistry {
    pub fn new() -> SocketRegistry {
        SocketRegistry {
            sockets: Mutex::new(FxHashMap::default()),
        }
    }

    /// The process-wide registry used by the convenience constructors of the senders.
    pub fn shared() -> Arc<SocketRegistry> {
        static SHARED: OnceLock<Arc<SocketRegistry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(SocketRegistry::new())).clone()
    }

    /// Returns a socket bound to `bind_addr`, binding it on first use. Concurrent acquires
    ///  of the same explicit address share one underlying socket.
    pub async fn acquire(&self, bind_addr: SocketAddr) -> io::Result<SocketHandle> {
        if bind_addr.port() == 0 {
            let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
            let local_addr = socket.local_addr()?;
            debug!("bound private socket to {:?}", local_addr);
            return Ok(SocketHandle {
                requested_addr: bind_addr,
                local_addr,
                socket: std::sync::Mutex::new(Some(socket)),
                shared: false,
            });
        }

        let mut lock = self.sockets.lock().await;
        let shared = match lock.entry(bind_addr) {
            Entry::Occupied(e) => {
                let shared = e.into_mut();
                shared.use_count += 1;
                trace!("sharing socket {:?}, now {} users", bind_addr, shared.use_count);
                shared
            }
            Entry::Vacant(e) => {
                let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
                debug!("bound shared socket to {:?}", bind_addr);
                e.insert(SharedSocket {
                    socket,
                    use_count: 1,
                })
            }
        };

        let socket = shared.socket.clone();
        let local_addr = socket.local_addr()?;
        Ok(SocketHandle {
            requested_addr: bind_addr,
            local_addr,
            socket: std::sync::Mutex::new(Some(socket)),
            shared: true,
        })
    }

    /// Gives up one use of the socket, closing it when the last user is gone. The handle's
    ///  own socket reference is severed immediately, so a released handle does not keep the
    ///  address bound. Releasing a handle twice is a no-op.
    pub async fn release(&self, handle: &SocketHandle) {
        if handle.sever().is_none() {
            return;
        }
        if !handle.shared {
            return;
        }

        let mut lock = self.sockets.lock().await;
        if let Some(shared) = lock.get_mut(&handle.requested_addr) {
            shared.use_count -= 1;
            trace!("released socket {:?}, {} users left", handle.requested_addr, shared.use_count);
            if shared.use_count == 0 {
                lock.remove(&handle.requested_addr);
                debug!("closing socket {:?}", handle.requested_addr);
            }
        }
    }

    #[cfg(test)]
    async fn resident_count(&self) -> usize {
        self.sockets.lock().await.len()
    }
}

impl Default for SocketRegistry {
    fn default() -> Self {
        SocketRegistry::new()
    }
}

/// One user's claim on a registry socket.
///
/// `release` severs the handle's socket reference: a released handle can no longer send,
///  and the address becomes rebindable as soon as the last claim is gone. Operations that
///  are in flight at that moment finish on their own clone of the socket.
pub struct SocketHandle {
    requested_addr: SocketAddr,
    local_addr: SocketAddr,
    socket: std::sync::Mutex<Option<Arc<UdpSocket>>>,
    shared: bool,
}

impl SocketHandle {
    /// The address the socket is actually bound to. For a port-0 request this carries the
    ///  ephemeral port the OS picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The underlying socket, for sending and for setting socket options. Fails once the
    ///  handle was released.
    pub fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket handle was released"))
    }

    fn sever(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().unwrap().take()
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SocketHandle({})", self.local_addr)
    }
}
