use std::io;
use std::net;
use std::sync::Arc;
use std::time;

use tracing::debug;
use tracing::trace;

/// Send half of one datagram path. Several transports may share a single server socket.
pub struct Transport {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    peer_addr: net::SocketAddr,
    // Whether the socket has been connected to peer_addr
    connected: bool,
}

/// Send handle of a shared socket, from which per-peer transports are made.
pub struct SocketTx {
    // Reference to non-blocking server socket
    socket: Arc<net::UdpSocket>,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
}

/// Receive half of a non-blocking socket.
pub struct SocketRx {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
}

impl Transport {
    /// Sends a frame to the peer. Failures are indistinguishable from datagram loss to the
    /// remote, and are treated as such.
    pub fn send(&self, frame: &[u8]) {
        let result = if self.connected {
            self.socket.send(frame)
        } else {
            self.socket.send_to(frame, self.peer_addr)
        };

        if let Err(err) = result {
            debug!(peer = %self.peer_addr, %err, "send failed");
        }
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }
}

impl SocketTx {
    /// Returns a transport which sends to `peer_addr` through this socket.
    pub fn transport_to(&self, peer_addr: net::SocketAddr) -> Transport {
        Transport {
            socket: Arc::clone(&self.socket),
            local_addr: self.local_addr,
            peer_addr,
            connected: false,
        }
    }
}

impl SocketRx {
    /// If a frame can be read from the socket, returns the frame and its sender. Returns
    /// Ok(None) otherwise.
    pub fn try_read_frame(&mut self) -> io::Result<Option<(&[u8], net::SocketAddr)>> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((frame_len, sender_addr)) => {
                    return Ok(Some((&self.recv_buffer[..frame_len], sender_addr)));
                }
                Err(err) => match err.kind() {
                    // No more datagrams for now
                    io::ErrorKind::WouldBlock => return Ok(None),
                    // ICMP feedback about an earlier send, the peer is not listening (yet)
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                        trace!(local = %self.local_addr, %err, "ignoring receive error");
                    }
                    _ => return Err(err),
                },
            }
        }
    }

    pub(crate) fn socket(&self) -> &net::UdpSocket {
        &self.socket
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }
}

/// Binds a shared, non-blocking socket which accepts datagrams from any peer.
pub fn new<A>(bind_address: A, frame_size_max: usize) -> io::Result<(SocketTx, SocketRx)>
where
    A: net::ToSocketAddrs,
{
    let socket = net::UdpSocket::bind(bind_address)?;
    socket.set_nonblocking(true)?;

    let local_addr = socket.local_addr()?;

    let socket_rc = Arc::new(socket);

    let tx = SocketTx {
        socket: Arc::clone(&socket_rc),
        local_addr,
    };

    let rx = SocketRx {
        socket: socket_rc,
        local_addr,
        recv_buffer: vec![0; frame_size_max].into_boxed_slice(),
    };

    Ok((tx, rx))
}

/// Binds a non-blocking socket to `bind_address` and connects it to `connect_address`, so that
/// only datagrams from that peer are received.
pub fn new_connected<A, B>(
    bind_address: A,
    connect_address: B,
    frame_size_max: usize,
) -> io::Result<(Transport, SocketRx)>
where
    A: net::ToSocketAddrs,
    B: net::ToSocketAddrs,
{
    let socket = net::UdpSocket::bind(bind_address)?;
    socket.set_nonblocking(true)?;
    socket.connect(connect_address)?;

    let local_addr = socket.local_addr()?;
    let peer_addr = socket.peer_addr()?;

    let socket_rc = Arc::new(socket);

    let tx = Transport {
        socket: Arc::clone(&socket_rc),
        local_addr,
        peer_addr,
        connected: true,
    };

    let rx = SocketRx {
        socket: socket_rc,
        local_addr,
        recv_buffer: vec![0; frame_size_max].into_boxed_slice(),
    };

    Ok((tx, rx))
}

const PORT_POLLING_KEY: usize = 0;

/// Waits for readability of a set of sockets plus the local port. Sources are registered in
/// oneshot mode, and must be re-armed before every wait.
pub(crate) struct Readiness {
    poller: polling::Poller,
    poller_events: polling::Events,
    port_registered: bool,
}

impl Readiness {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: polling::Poller::new()?,
            poller_events: polling::Events::new(),
            port_registered: false,
        })
    }

    /// Socket keys start at 1; key 0 belongs to the local port.
    pub fn add_socket(&self, socket_rx: &SocketRx, key: usize) -> io::Result<()> {
        debug_assert_ne!(key, PORT_POLLING_KEY);

        unsafe {
            self.poller
                .add(socket_rx.socket(), polling::Event::readable(key))?;
        }

        Ok(())
    }

    pub fn arm_socket(&self, socket_rx: &SocketRx, key: usize) -> io::Result<()> {
        self.poller
            .modify(socket_rx.socket(), polling::Event::readable(key))
    }

    /// Registers the port on first use, re-arms it afterwards. Callers must pass the same port
    /// every time.
    #[cfg(unix)]
    pub fn arm_port<P>(&mut self, port: &P) -> io::Result<()>
    where
        P: std::os::fd::AsFd + std::os::fd::AsRawFd,
    {
        let event = polling::Event::readable(PORT_POLLING_KEY);

        if self.port_registered {
            self.poller.modify(port, event)
        } else {
            unsafe {
                self.poller.add(port.as_raw_fd(), event)?;
            }
            self.port_registered = true;
            Ok(())
        }
    }

    /// Blocks until a source is readable or `timeout` elapses. Spurious wakeups are possible.
    pub fn wait(&mut self, timeout: time::Duration) -> io::Result<()> {
        self.poller_events.clear();
        self.poller.wait(&mut self.poller_events, Some(timeout))?;
        Ok(())
    }

    pub fn port_ready(&self) -> bool {
        self.poller_events
            .iter()
            .any(|event| event.key == PORT_POLLING_KEY)
    }
}
