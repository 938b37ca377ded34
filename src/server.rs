use std::collections::HashMap;
use std::io;
use std::net;
#[cfg(unix)]
use std::time;

use tracing::info;

use super::channel::{ChannelCore, LinkStats};
use super::config::Config;
use super::socket;

#[cfg(unix)]
use super::channel::WAIT_TIMEOUT;
#[cfg(unix)]
use super::error::Result;
#[cfg(unix)]
use super::port::LocalPort;

struct PeerTable {
    // Mapping from sender address to link index
    peers: HashMap<net::SocketAddr, usize>,
}

impl PeerTable {
    fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    fn find(&self, addr: &net::SocketAddr) -> Option<usize> {
        self.peers.get(addr).copied()
    }

    fn insert(&mut self, addr: net::SocketAddr, index: usize) {
        let prev = self.peers.insert(addr, index);
        debug_assert!(prev.is_none());
    }

    fn count(&self) -> usize {
        self.peers.len()
    }
}

struct ServerCore {
    channel: ChannelCore,
    // Socket send handle, shared by every link
    socket_tx: socket::SocketTx,
    peer_table: PeerTable,
}

/// The server end of an aggregate channel. Every remote address which sends to the bound socket
/// becomes a link of the same channel.
pub struct ChannelServer {
    // Interesting server data
    core: ServerCore,
    // Socket receive handle
    socket_rx: socket::SocketRx,
    readiness: socket::Readiness,
}

impl ServerCore {
    fn link_for(&mut self, addr: &net::SocketAddr) -> usize {
        if let Some(index) = self.peer_table.find(addr) {
            return index;
        }

        let transport = self.socket_tx.transport_to(*addr);
        let index = self.channel.add_link(transport);
        self.peer_table.insert(*addr, index);

        info!(peer = %addr, link = index, "new peer");

        index
    }

    fn handle_frame(&mut self, frame_bytes: &[u8], sender_addr: &net::SocketAddr) {
        let index = self.link_for(sender_addr);

        self.channel.handle_frame(index, frame_bytes);
    }

    /// Reads and processes as many frames as possible from socket_rx without blocking.
    fn handle_frames(&mut self, socket_rx: &mut socket::SocketRx) -> io::Result<()> {
        while let Some((frame_bytes, sender_addr)) = socket_rx.try_read_frame()? {
            self.handle_frame(frame_bytes, &sender_addr);
        }

        Ok(())
    }
}

impl ChannelServer {
    /// Equivalent to calling [`ChannelServer::bind_with_config`] with default configuration.
    pub fn bind<A>(bind_addr: A) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::bind_with_config(bind_addr, Default::default())
    }

    /// Binds a UDP socket to the provided address, and returns a new server object with no links.
    /// Errors encountered during socket initialization are forwarded to the caller. Panics if
    /// the configuration is invalid.
    pub fn bind_with_config<A>(bind_addr: A, config: Config) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let channel = ChannelCore::new(config);

        let (socket_tx, socket_rx) = socket::new(bind_addr, channel.config().frame_size_max)?;

        let readiness = socket::Readiness::new()?;
        readiness.add_socket(&socket_rx, 1)?;

        info!(local = %socket_rx.local_addr(), "listening");

        Ok(Self {
            core: ServerCore {
                channel,
                socket_tx,
                peer_table: PeerTable::new(),
            },
            socket_rx,
            readiness,
        })
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.socket_rx.local_addr()
    }

    pub fn link_count(&self) -> usize {
        debug_assert_eq!(self.core.peer_table.count(), self.core.channel.link_count());
        self.core.channel.link_count()
    }

    pub fn link_stats(&mut self) -> Vec<LinkStats> {
        self.core.channel.link_stats()
    }

    /// Sends a payload over whichever link is currently best. Payloads are dropped until the
    /// first peer has been heard from.
    pub fn send(&mut self, payload: &[u8]) {
        self.core.channel.send(payload);
    }

    /// Returns the next payload received over any link, if any.
    pub fn poll_receive(&mut self) -> Option<Box<[u8]>> {
        self.core.channel.poll_receive()
    }

    /// Number of received payloads dropped so far because the receive queue was full.
    pub fn receive_dropped(&self) -> u64 {
        self.core.channel.receive_dropped()
    }

    /// Reads and processes as many frames as possible without blocking.
    pub fn handle_frames(&mut self) -> io::Result<()> {
        self.core.handle_frames(&mut self.socket_rx)
    }

    /// Sends any measurement requests which have come due.
    pub fn tick(&mut self) {
        self.core.channel.tick();
    }

    /// Equivalent to [`Channel::step`](crate::Channel::step).
    #[cfg(unix)]
    pub fn step<P>(&mut self, port: &mut P, timeout: time::Duration) -> Result<()>
    where
        P: LocalPort,
    {
        self.readiness.arm_socket(&self.socket_rx, 1)?;
        self.readiness.arm_port(port)?;

        self.readiness.wait(timeout)?;

        self.handle_frames()?;

        if self.readiness.port_ready() {
            self.core.channel.read_port(port)?;
        }

        self.core.channel.flush_port(port)?;
        self.core.channel.tick();

        Ok(())
    }

    /// Steps forever. Returns only on I/O failure.
    #[cfg(unix)]
    pub fn run<P>(&mut self, port: &mut P) -> Result<()>
    where
        P: LocalPort,
    {
        loop {
            self.step(port, WAIT_TIMEOUT)?;
        }
    }
}
