//! The receiving half of the acknowledgment scheme: a background task that reads ack
//!  datagrams off a UDP socket and resolves the pending sends waiting for them.

use crate::error::SendError;
use crate::frame::AckId;
use crate::socket_registry::{SocketHandle, SocketRegistry};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustc_hash::{FxHashMap, FxHashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of an [AckListener]. Fully observable so that application code can wait for
///  the listener to come up before provoking acknowledgments.
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ListenerState {
    Stopped = 0,
    Starting = 1,
    Listening = 2,
    Stopping = 3,
}

/// How the pending table handled one incoming ack.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum AckDisposition {
    /// No pending send with this id - dropped.
    Unknown,
    /// This replier was already counted for this id - dropped.
    Duplicate,
    /// Counted, quorum not reached yet.
    Counted,
    /// This ack completed the quorum and resolved the pending send.
    Completed,
}

struct PendingSend {
    required: usize,
    repliers: FxHashSet<SocketAddr>,
    done: Option<oneshot::Sender<()>>,
}

/// The table of sends that are currently blocked waiting for acknowledgment, keyed by
///  correlation id. Dispatch is strictly by id, so concurrent sends never cross-resolve.
struct PendingAcks {
    pending: Mutex<FxHashMap<AckId, PendingSend>>,
}

impl PendingAcks {
    fn new() -> PendingAcks {
        PendingAcks {
            pending: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers a send awaiting `required` distinct repliers, returning the completion signal.
    async fn register(&self, id: AckId, required: usize) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingSend {
                required,
                repliers: FxHashSet::default(),
                done: Some(done),
            },
        );
        rx
    }

    /// Counts one ack towards its pending send. The replier's full socket address is the
    ///  identity for deduplication: a second ack from the same address changes nothing.
    async fn on_ack(&self, id: AckId, from: SocketAddr) -> AckDisposition {
        let mut lock = self.pending.lock().await;
        let quorum_met = match lock.get_mut(&id) {
            None => return AckDisposition::Unknown,
            Some(pending) => {
                if !pending.repliers.insert(from) {
                    return AckDisposition::Duplicate;
                }
                pending.repliers.len() >= pending.required
            }
        };
        if !quorum_met {
            return AckDisposition::Counted;
        }

        if let Some(mut pending) = lock.remove(&id) {
            if let Some(done) = pending.done.take() {
                // the waiter may have timed out in this very moment
                done.send(()).ok();
            }
        }
        AckDisposition::Completed
    }

    /// Withdraws a pending send, returning how many distinct repliers it had seen.
    ///  `None` if the send is not pending (anymore).
    async fn remove(&self, id: &AckId) -> Option<usize> {
        self.pending
            .lock()
            .await
            .remove(id)
            .map(|pending| pending.repliers.len())
    }

    /// Drops all pending sends. Their waiters observe the closed channel as [SendError::Stopped].
    async fn fail_all(&self) {
        let mut lock = self.pending.lock().await;
        if !lock.is_empty() {
            debug!("dropping {} in-flight pending sends on shutdown", lock.len());
        }
        lock.clear();
    }
}

struct ListenTask {
    handle: JoinHandle<()>,
    socket_handle: SocketHandle,
}

/// Listens for acknowledgment datagrams on a UDP socket acquired from the [SocketRegistry].
///
/// The listener is restartable: after [AckListener::stop] a fresh [AckListener::start] binds
///  again (with a new ephemeral port if the configured port is 0).
///
/// NB: each listener should have its own port. Two listeners reading one shared socket would
///  split the ack stream between them, each seeing only part of the acks.
pub struct AckListener {
    registry: Arc<SocketRegistry>,
    bind_addr: SocketAddr,
    state: AtomicU8,
    bound_port: AtomicU16,
    pending: Arc<PendingAcks>,
    shutdown: Arc<Notify>,
    active: Mutex<Option<ListenTask>>,
}

impl AckListener {
    pub fn new(bind_addr: SocketAddr, registry: Arc<SocketRegistry>) -> AckListener {
        AckListener {
            registry,
            bind_addr,
            state: AtomicU8::new(ListenerState::Stopped.into()),
            bound_port: AtomicU16::new(0),
            pending: Arc::new(PendingAcks::new()),
            shutdown: Arc::new(Notify::new()),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ListenerState {
        ListenerState::try_from(self.state.load(Ordering::SeqCst))
            .expect("listener state is only ever written from ListenerState values")
    }

    fn set_state(&self, state: ListenerState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    /// The port the listener is bound to, 0 while it is not listening. Callers that need to
    ///  hand the port to remote receivers can poll this after a lazy start.
    pub fn port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }

    /// Binds the socket and brings up the receive loop. Returns once the loop is accepting
    ///  reads - after this, [AckListener::port] is the actual bound port. Calling `start` on
    ///  a listener that is already running is a no-op.
    pub async fn start(&self) -> std::io::Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }
        self.set_state(ListenerState::Starting);

        let socket_handle = match self.registry.acquire(self.bind_addr).await {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(ListenerState::Stopped);
                return Err(e);
            }
        };
        let local_addr = socket_handle.local_addr();
        self.bound_port.store(local_addr.port(), Ordering::SeqCst);
        info!("ack listener bound to {:?}", local_addr);

        let (ready_tx, ready_rx) = oneshot::channel();
        let socket = socket_handle
            .socket()
            .expect("freshly acquired handle has its socket");
        let handle = tokio::spawn(Self::recv_loop(
            socket,
            self.pending.clone(),
            self.shutdown.clone(),
            ready_tx,
        ));
        *active = Some(ListenTask {
            handle,
            socket_handle,
        });

        ready_rx.await.ok();
        self.set_state(ListenerState::Listening);
        Ok(())
    }

    /// Shuts the receive loop down, releases the socket and fails all pending sends with
    ///  [SendError::Stopped]. Idempotent; safe to call from any task.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(task) = active.take() else {
            return;
        };
        self.set_state(ListenerState::Stopping);

        self.shutdown.notify_one();
        if let Err(e) = task.handle.await {
            error!("ack listener task failed: {}", e);
        }
        self.registry.release(&task.socket_handle).await;
        self.pending.fail_all().await;

        self.bound_port.store(0, Ordering::SeqCst);
        self.set_state(ListenerState::Stopped);
    }

    pub(crate) async fn register(&self, id: AckId, required: usize) -> oneshot::Receiver<()> {
        self.pending.register(id, required).await
    }

    /// Withdraws a pending send that will never be waited on, e.g. because the datagram
    ///  never left the socket.
    pub(crate) async fn forget(&self, id: &AckId) {
        self.pending.remove(id).await;
    }

    /// Waits for the pending send `id` to be resolved, bounded by `ack_timeout`.
    pub(crate) async fn await_quorum(
        &self,
        id: AckId,
        mut rx: oneshot::Receiver<()>,
        ack_timeout: Duration,
        required: usize,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(ack_timeout, &mut rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Stopped),
            Err(_) => {
                // the deadline and the final ack may race; the channel is the tie breaker
                match rx.try_recv() {
                    Ok(()) => Ok(()),
                    Err(TryRecvError::Closed) => Err(SendError::Stopped),
                    Err(TryRecvError::Empty) => match self.pending.remove(&id).await {
                        // gone from the table means resolved or failed in the last moment;
                        //  the channel says which
                        None => match rx.try_recv() {
                            Ok(()) => Ok(()),
                            Err(_) => Err(SendError::Stopped),
                        },
                        Some(received) => Err(SendError::AckTimeout {
                            timeout: ack_timeout,
                            required,
                            received,
                        }),
                    },
                }
            }
        }
    }

    async fn recv_loop(
        socket: Arc<UdpSocket>,
        pending: Arc<PendingAcks>,
        shutdown: Arc<Notify>,
        ready: oneshot::Sender<()>,
    ) {
        debug!("starting ack receive loop");
        ready.send(()).ok();

        // acks are textual UUIDs, 36 bytes; anything bigger is malformed anyway
        let mut buf = [0u8; 64];
        loop {
            let (num_read, from) = select! {
                r = socket.recv_from(&mut buf) => match r {
                    Ok(x) => x,
                    Err(e) => {
                        error!("ack socket error: {}", e);
                        continue;
                    }
                },
                _ = shutdown.notified() => {
                    debug!("ack receive loop shutting down");
                    break;
                }
            };

            let Some(id) = AckId::from_reply_payload(&buf[..num_read]) else {
                warn!("malformed ack datagram from {:?}: {} bytes", from, num_read);
                continue;
            };

            match pending.on_ack(id, from).await {
                AckDisposition::Completed => trace!("ack from {:?} completed quorum for {}", from, id),
                AckDisposition::Counted => trace!("ack from {:?} counted towards quorum for {}", from, id),
                AckDisposition::Duplicate => trace!("ignoring duplicate ack from {:?} for {}", from, id),
                AckDisposition::Unknown => trace!("ignoring ack from {:?} for unknown id {}", from, id),
            }
        }
    }
}

impl Drop for AckListener {
    fn drop(&mut self) {
        if let Ok(mut lock) = self.active.try_lock() {
            if let Some(task) = lock.take() {
                task.handle.abort();
            }
        }
    }
}
