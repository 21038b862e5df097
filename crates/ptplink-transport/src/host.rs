//! Host network stack over tokio UDP sockets
//!
//! Each bound endpoint gets a background receive task that feeds a bounded
//! channel; `recv` drains the channel without blocking, so the dispatch loop
//! keeps its non-blocking contract. Sends block only for the duration of the
//! socket write.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ptplink_core::MAX_DATAGRAM_SIZE;

use crate::{NetworkStack, StackError};

/// Pause after a failed socket read before trying again
const RECV_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Endpoint handle issued by [`TokioStack`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostEndpoint(u32);

struct Slot {
    socket: Option<Arc<UdpSocket>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

/// [`NetworkStack`] backed by an owned tokio runtime
pub struct TokioStack {
    runtime: Runtime,
    interface: Ipv4Addr,
    slots: HashMap<HostEndpoint, Slot>,
    next_id: u32,
    /// Groups joined on the interface; applied to every bound socket
    groups: Vec<Ipv4Addr>,
    queue_depth: usize,
}

impl TokioStack {
    /// Stack using `interface` for multicast membership
    pub fn new(interface: Ipv4Addr) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ptplink-net")
            .enable_all()
            .build()?;

        Ok(TokioStack {
            runtime,
            interface,
            slots: HashMap::new(),
            next_id: 0,
            groups: Vec::new(),
            queue_depth: 256,
        })
    }

    /// Set how many datagrams each endpoint buffers before the receive task
    /// waits for the dispatch loop to catch up
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Local address an endpoint is bound to
    pub fn local_addr(&self, endpoint: HostEndpoint) -> Option<SocketAddr> {
        self.slots
            .get(&endpoint)?
            .socket
            .as_ref()?
            .local_addr()
            .ok()
    }

    /// Number of endpoints currently allocated
    pub fn endpoint_count(&self) -> usize {
        self.slots.len()
    }

    fn join_on(socket: &UdpSocket, group: Ipv4Addr, interface: Ipv4Addr) -> Result<(), StackError> {
        socket
            .join_multicast_v4(group, interface)
            .map_err(|e| StackError::Interface(e.to_string()))
    }
}

/// Join every target in order. If one fails, leave the ones already joined
/// and return the error, so membership is all or nothing.
fn join_all<T>(
    targets: &[T],
    mut join: impl FnMut(&T) -> Result<(), StackError>,
    mut leave: impl FnMut(&T),
) -> Result<(), StackError> {
    for (joined, target) in targets.iter().enumerate() {
        if let Err(e) = join(target) {
            targets[..joined].iter().for_each(&mut leave);
            return Err(e);
        }
    }
    Ok(())
}

/// Whether a failed socket read is worth retrying
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

/// Forward datagrams from `socket` into `tx` until the receiver is dropped
/// or the socket fails for good
async fn receive_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, addr)) => {
                tracing::trace!(%addr, len, "host datagram");
                if tx.send(buf[..len].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) if is_transient(e.kind()) => {
                tracing::warn!("UDP receive error: {}", e);
                tokio::time::sleep(RECV_RETRY_DELAY).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "UDP receive failed, endpoint stops receiving");
                break;
            }
        }
    }
}

fn io_error(e: io::Error) -> StackError {
    match e.kind() {
        io::ErrorKind::AddrInUse => StackError::AddrInUse,
        io::ErrorKind::OutOfMemory => StackError::OutOfMemory,
        _ => StackError::Io(e.to_string()),
    }
}

impl NetworkStack for TokioStack {
    type Endpoint = HostEndpoint;
    type Datagram = Vec<u8>;
    type TxBuffer = Vec<u8>;

    fn create_endpoint(&mut self) -> Result<HostEndpoint, StackError> {
        self.next_id += 1;
        let endpoint = HostEndpoint(self.next_id);
        self.slots.insert(
            endpoint,
            Slot {
                socket: None,
                rx: None,
                task: None,
            },
        );
        Ok(endpoint)
    }

    fn bind(&mut self, endpoint: HostEndpoint, addr: SocketAddrV4) -> Result<(), StackError> {
        let slot = self
            .slots
            .get_mut(&endpoint)
            .ok_or(StackError::UnknownEndpoint)?;
        if slot.socket.is_some() {
            return Err(StackError::AddrInUse);
        }

        let socket = self
            .runtime
            .block_on(UdpSocket::bind(SocketAddr::V4(addr)))
            .map_err(io_error)?;
        socket.set_multicast_loop_v4(true).map_err(io_error)?;
        for group in &self.groups {
            if let Err(e) = Self::join_on(&socket, *group, self.interface) {
                tracing::warn!(%group, error = %e, "could not apply membership to new endpoint");
            }
        }

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let task = self.runtime.spawn(receive_loop(Arc::clone(&socket), tx));

        slot.socket = Some(socket);
        slot.rx = Some(rx);
        slot.task = Some(task);
        Ok(())
    }

    fn release_endpoint(&mut self, endpoint: HostEndpoint) {
        if let Some(slot) = self.slots.remove(&endpoint) {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
    }

    fn default_interface(&self) -> Ipv4Addr {
        self.interface
    }

    fn join_group(&mut self, interface: Ipv4Addr, group: Ipv4Addr) -> Result<(), StackError> {
        if self.groups.contains(&group) {
            return Ok(());
        }
        let sockets: Vec<Arc<UdpSocket>> = self
            .slots
            .values()
            .filter_map(|slot| slot.socket.clone())
            .collect();
        join_all(
            &sockets,
            |socket| Self::join_on(socket, group, interface),
            |socket| {
                if let Err(e) = socket.leave_multicast_v4(group, interface) {
                    tracing::warn!(%group, error = %e, "could not undo partial membership");
                }
            },
        )?;
        self.groups.push(group);
        Ok(())
    }

    fn alloc_tx(&mut self, len: usize) -> Result<Vec<u8>, StackError> {
        if len > MAX_DATAGRAM_SIZE {
            return Err(StackError::OutOfMemory);
        }
        Ok(vec![0; len])
    }

    fn send_to(
        &mut self,
        endpoint: HostEndpoint,
        buffer: &Vec<u8>,
        dest: SocketAddrV4,
    ) -> Result<(), StackError> {
        let socket = self
            .slots
            .get(&endpoint)
            .and_then(|slot| slot.socket.clone())
            .ok_or(StackError::UnknownEndpoint)?;

        let sent = self
            .runtime
            .block_on(socket.send_to(buffer, SocketAddr::V4(dest)))
            .map_err(io_error)?;
        if sent != buffer.len() {
            return Err(StackError::Io(format!(
                "short send: {} of {} bytes",
                sent,
                buffer.len()
            )));
        }
        Ok(())
    }

    fn free_tx(&mut self, _buffer: Vec<u8>) {}

    fn poll_input(&mut self) {}

    fn recv(&mut self, endpoint: HostEndpoint) -> Option<Vec<u8>> {
        self.slots.get_mut(&endpoint)?.rx.as_mut()?.try_recv().ok()
    }

    fn release_datagram(&mut self, _datagram: Vec<u8>) {}
}

impl Drop for TokioStack {
    fn drop(&mut self) {
        for (_, slot) in self.slots.drain() {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
    }
}
