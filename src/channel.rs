use std::collections::VecDeque;
use std::io;
use std::net;
use std::time;

use tracing::{debug, info, trace, warn};

use super::config::Config;
use super::epoch::Epoch;
use super::link::{HostContext, Link};
use super::socket;

#[cfg(unix)]
use super::error::Result;
#[cfg(unix)]
use super::port::LocalPort;

/// Links whose offered load is below this share of their estimated capacity are preferred by
/// latency.
pub const SAFE_BANDWIDTH_PART: f64 = 0.8;

/// Readiness wait bound, so that measurement requests go out on time while idle.
pub const WAIT_TIMEOUT: time::Duration = time::Duration::from_millis(250);

/// Snapshot of a link's estimates.
#[derive(Clone, Debug)]
pub struct LinkStats {
    pub local_addr: net::SocketAddr,
    pub peer_addr: net::SocketAddr,
    /// Seconds.
    pub calc_ping: f64,
    /// Bytes per second.
    pub calc_bandwidth: f64,
    pub calc_quality: f64,
    /// Bytes per second.
    pub used_bandwidth: f64,
    pub packet_num: u64,
    pub stat_num: u64,
}

/// Picks the link for the next payload.
///
/// Links under `SAFE_BANDWIDTH_PART` of their estimated capacity are considered safe, and the
/// safe link with the lowest ping wins. If no link is safe, the one with the most headroom wins.
/// Ties go to the earlier link. Returns `None` if there are no links.
pub fn choose_link<'a, I>(links: I, now: f64) -> Option<usize>
where
    I: IntoIterator<Item = &'a mut Link>,
{
    let mut best_safe: Option<(usize, f64)> = None;
    let mut best_headroom: Option<(usize, f64)> = None;

    for (index, link) in links.into_iter().enumerate() {
        let used_bandwidth = link.used_bandwidth(now);
        let calc_bandwidth = link.calc_bandwidth();

        // NaN (nothing used of nothing) is not safe
        if used_bandwidth / calc_bandwidth < SAFE_BANDWIDTH_PART {
            let ping = link.calc_ping();
            if best_safe.map_or(true, |(_, best_ping)| ping < best_ping) {
                best_safe = Some((index, ping));
            }
        }

        let headroom = calc_bandwidth - used_bandwidth;
        if best_headroom.map_or(true, |(_, best)| headroom > best) {
            best_headroom = Some((index, headroom));
        }
    }

    best_safe.or(best_headroom).map(|(index, _)| index)
}

struct LinkEntry {
    link: Link,
    transport: socket::Transport,
}

/// Bounded FIFO of received payloads awaiting the local sink. Overflow drops the newest payload,
/// and is logged once per episode.
struct ReceiveQueue {
    packets: VecDeque<Box<[u8]>>,
    max_len: usize,
    // Drops since the queue last accepted a payload
    overflow_dropped: u64,
    dropped_total: u64,
}

impl ReceiveQueue {
    fn new(max_len: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            max_len,
            overflow_dropped: 0,
            dropped_total: 0,
        }
    }

    fn push(&mut self, packet_bytes: Box<[u8]>) {
        if self.packets.len() >= self.max_len {
            if self.overflow_dropped == 0 {
                warn!(max_len = self.max_len, "receive queue full, dropping payloads");
            }
            self.overflow_dropped += 1;
            self.dropped_total += 1;
            return;
        }

        if self.overflow_dropped > 0 {
            warn!(dropped = self.overflow_dropped, "receive queue accepting payloads again");
            self.overflow_dropped = 0;
        }

        self.packets.push_back(packet_bytes);
    }

    fn pop(&mut self) -> Option<Box<[u8]>> {
        self.packets.pop_front()
    }
}

struct LinkContext<'a> {
    transport: &'a socket::Transport,
    receive_queue: &'a mut ReceiveQueue,
}

impl<'a> HostContext for LinkContext<'a> {
    fn send_frame(&mut self, frame_bytes: &[u8]) {
        self.transport.send(frame_bytes);
    }

    fn on_receive(&mut self, packet_bytes: Box<[u8]>) {
        self.receive_queue.push(packet_bytes);
    }
}

/// Link set and receive queue shared by the client and server channels.
pub(crate) struct ChannelCore {
    config: Config,
    // Timestamps are computed relative to this
    epoch: Epoch,
    links: Vec<LinkEntry>,
    // Payloads awaiting the local sink
    receive_queue: ReceiveQueue,
    // Reused local port read buffer
    #[cfg(unix)]
    port_buffer: Box<[u8]>,
}

impl ChannelCore {
    pub fn new(config: Config) -> Self {
        config.validate();

        Self {
            #[cfg(unix)]
            port_buffer: vec![0; config.packet_size_max()].into_boxed_slice(),
            receive_queue: ReceiveQueue::new(config.receive_queue_max),
            config,
            epoch: Epoch::new(),
            links: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn add_link(&mut self, transport: socket::Transport) -> usize {
        let index = self.links.len();

        info!(
            link = index,
            local = %transport.local_addr(),
            peer = %transport.peer_addr(),
            "link added"
        );

        self.links.push(LinkEntry {
            link: Link::new(self.epoch.time_now()),
            transport,
        });

        index
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn send(&mut self, payload: &[u8]) {
        let now = self.epoch.time_now();

        let index = match choose_link(self.links.iter_mut().map(|entry| &mut entry.link), now) {
            Some(index) => index,
            None => {
                debug!(len = payload.len(), "no links, dropping payload");
                return;
            }
        };

        trace!(link = index, len = payload.len(), "send");

        let entry = &mut self.links[index];

        let ref mut ctx = LinkContext {
            transport: &entry.transport,
            receive_queue: &mut self.receive_queue,
        };

        entry.link.send(payload, now, ctx);
    }

    pub fn handle_frame(&mut self, index: usize, frame_bytes: &[u8]) {
        let now = self.epoch.time_now();

        let entry = &mut self.links[index];

        let ref mut ctx = LinkContext {
            transport: &entry.transport,
            receive_queue: &mut self.receive_queue,
        };

        entry.link.handle_frame(frame_bytes, now, ctx);
    }

    /// Sends any measurement requests which have come due.
    pub fn tick(&mut self) {
        let now = self.epoch.time_now();

        for entry in self.links.iter_mut() {
            let ref mut ctx = LinkContext {
                transport: &entry.transport,
                receive_queue: &mut self.receive_queue,
            };

            entry.link.maybe_send_req(now, ctx);
        }
    }

    pub fn poll_receive(&mut self) -> Option<Box<[u8]>> {
        self.receive_queue.pop()
    }

    /// Number of received payloads dropped because the receive queue was full.
    pub fn receive_dropped(&self) -> u64 {
        self.receive_queue.dropped_total
    }

    pub fn link_stats(&mut self) -> Vec<LinkStats> {
        let now = self.epoch.time_now();

        self.links
            .iter_mut()
            .map(|entry| LinkStats {
                local_addr: entry.transport.local_addr(),
                peer_addr: entry.transport.peer_addr(),
                calc_ping: entry.link.calc_ping(),
                calc_bandwidth: entry.link.calc_bandwidth(),
                calc_quality: entry.link.calc_quality(),
                used_bandwidth: entry.link.used_bandwidth(now),
                packet_num: entry.link.sender().packet_num(),
                stat_num: entry.link.sender().stat_num(),
            })
            .collect()
    }

    /// Reads one packet from a port which has been reported readable, and sends it.
    #[cfg(unix)]
    pub fn read_port<P>(&mut self, port: &mut P) -> io::Result<()>
    where
        P: LocalPort,
    {
        let mut buffer = std::mem::take(&mut self.port_buffer);

        let result = match port.read_packet(&mut buffer) {
            Ok(len) => {
                self.send(&buffer[..len]);
                Ok(())
            }
            Err(err) => match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(()),
                _ => Err(err),
            },
        };

        self.port_buffer = buffer;

        result
    }

    /// Writes every queued payload to the port.
    #[cfg(unix)]
    pub fn flush_port<P>(&mut self, port: &mut P) -> io::Result<()>
    where
        P: LocalPort,
    {
        while let Some(packet) = self.receive_queue.pop() {
            if let Err(err) = port.write_packet(&packet) {
                match err.kind() {
                    io::ErrorKind::WouldBlock => {
                        warn!(len = packet.len(), "local port full, dropping payload");
                    }
                    _ => return Err(err),
                }
            }
        }

        Ok(())
    }
}

/// The client end of an aggregate channel: one connected socket per link.
pub struct Channel {
    core: ChannelCore,
    // Receive halves, index-aligned with the core's links
    sockets: Vec<socket::SocketRx>,
    readiness: socket::Readiness,
}

impl Channel {
    /// Equivalent to calling [`Channel::with_config`] with default configuration.
    pub fn new() -> io::Result<Self> {
        Self::with_config(Default::default())
    }

    /// Returns a channel with no links. Panics if the configuration is invalid.
    pub fn with_config(config: Config) -> io::Result<Self> {
        Ok(Self {
            core: ChannelCore::new(config),
            sockets: Vec::new(),
            readiness: socket::Readiness::new()?,
        })
    }

    /// Binds a socket to `local`, connects it to `remote`, and adds a link over it. Returns the
    /// link's index.
    pub fn add_link<A, B>(&mut self, local: A, remote: B) -> io::Result<usize>
    where
        A: net::ToSocketAddrs,
        B: net::ToSocketAddrs,
    {
        let (transport, socket_rx) =
            socket::new_connected(local, remote, self.core.config().frame_size_max)?;

        let key = self.sockets.len() + 1;
        self.readiness.add_socket(&socket_rx, key)?;

        let index = self.core.add_link(transport);
        debug_assert_eq!(index + 1, key);

        self.sockets.push(socket_rx);

        Ok(index)
    }

    pub fn link_count(&self) -> usize {
        self.core.link_count()
    }

    pub fn link_stats(&mut self) -> Vec<LinkStats> {
        self.core.link_stats()
    }

    /// Sends a payload over whichever link is currently best. Payloads are dropped if there are
    /// no links.
    pub fn send(&mut self, payload: &[u8]) {
        self.core.send(payload);
    }

    /// Returns the next payload received over any link, if any.
    pub fn poll_receive(&mut self) -> Option<Box<[u8]>> {
        self.core.poll_receive()
    }

    /// Number of received payloads dropped so far because the receive queue was full.
    pub fn receive_dropped(&self) -> u64 {
        self.core.receive_dropped()
    }

    /// Reads and processes as many frames as possible from every socket without blocking.
    pub fn handle_frames(&mut self) -> io::Result<()> {
        for (index, socket_rx) in self.sockets.iter_mut().enumerate() {
            while let Some((frame_bytes, _)) = socket_rx.try_read_frame()? {
                self.core.handle_frame(index, frame_bytes);
            }
        }

        Ok(())
    }

    /// Sends any measurement requests which have come due.
    pub fn tick(&mut self) {
        self.core.tick();
    }

    /// Waits up to `timeout` for the sockets or the port to become readable, then processes
    /// inbound frames, forwards at most one packet from the port, writes received payloads to
    /// the port, and sends due measurement requests.
    #[cfg(unix)]
    pub fn step<P>(&mut self, port: &mut P, timeout: time::Duration) -> Result<()>
    where
        P: LocalPort,
    {
        for (index, socket_rx) in self.sockets.iter().enumerate() {
            self.readiness.arm_socket(socket_rx, index + 1)?;
        }
        self.readiness.arm_port(port)?;

        self.readiness.wait(timeout)?;

        self.handle_frames()?;

        if self.readiness.port_ready() {
            self.core.read_port(port)?;
        }

        self.core.flush_port(port)?;
        self.core.tick();

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use crate::frame::serial::SimpleFrame;
    use crate::frame::serial::SimpleFrameWrite;
    use crate::link;
    use crate::link::tests::MockHostContext;

    // Gives the link a single measurement with the given round trip time
    fn measured_link(ping: f64) -> Link {
        let mut ctx = MockHostContext::new();
        let mut link = Link::new(0.0);

        link.maybe_send_req(0.0, &mut ctx);

        let stat = frame::StatFrame {
            stat_num: 0,
            quality: 1.0,
            send_time: 0.0,
        };
        let ref mut buffer = [0u8; frame::StatFrame::FRAME_SIZE];
        link.handle_frame(stat.write(buffer), ping, &mut ctx);

        link
    }

    fn load(link: &mut Link, bytes: usize, now: f64) {
        let mut ctx = MockHostContext::new();
        let payload = vec![0u8; 1000];
        for _ in 0..bytes / 1000 {
            link.send(&payload, now, &mut ctx);
        }
    }

    #[test]
    fn no_links() {
        let mut links: Vec<Link> = Vec::new();
        assert_eq!(choose_link(links.iter_mut(), 0.0), None);
    }

    #[test]
    fn single_link() {
        let mut links = vec![measured_link(0.3)];
        assert_eq!(choose_link(links.iter_mut(), 0.5), Some(0));

        // Even when saturated
        load(&mut links[0], 500_000, 0.5);
        assert_eq!(choose_link(links.iter_mut(), 0.5), Some(0));
    }

    #[test]
    fn safe_links_by_ping() {
        let mut links = vec![measured_link(0.2), measured_link(0.05), measured_link(0.1)];
        assert_eq!(choose_link(links.iter_mut(), 0.5), Some(1));

        // Equal pings go to the earlier link
        let mut links = vec![measured_link(0.2), measured_link(0.1), measured_link(0.1)];
        assert_eq!(choose_link(links.iter_mut(), 0.5), Some(1));

        // Fresh links share the same initial estimates
        let mut links = vec![Link::new(0.0), Link::new(0.0)];
        assert_eq!(choose_link(links.iter_mut(), 0.0), Some(0));
    }

    #[test]
    fn saturated_link_skipped() {
        let mut links = vec![measured_link(0.05), measured_link(0.2)];

        // 90 KB/s against an estimate of 100 KB/s
        load(&mut links[0], 90_000, 0.5);
        assert_eq!(links[0].calc_bandwidth(), 100_000.0);

        assert_eq!(choose_link(links.iter_mut(), 0.5), Some(1));
    }

    #[test]
    fn unsafe_links_by_headroom() {
        let mut links = vec![measured_link(0.05), measured_link(0.2), measured_link(0.1)];

        load(&mut links[0], 95_000, 0.5);
        load(&mut links[1], 85_000, 0.5);
        load(&mut links[2], 90_000, 0.5);

        // Throughput stays below the estimate at full quality, so the estimates hold
        for link in links.iter() {
            assert_eq!(link.calc_bandwidth(), 100_000.0);
        }

        assert_eq!(choose_link(links.iter_mut(), 0.5), Some(1));
    }

    #[test]
    fn receive_queue_overflow() {
        let mut queue = ReceiveQueue::new(2);

        for i in 0..5u8 {
            queue.push(vec![i].into_boxed_slice());
        }

        // The newest payloads are the ones dropped
        assert_eq!(queue.dropped_total, 3);
        assert_eq!(queue.overflow_dropped, 3);
        assert_eq!(queue.packets.len(), 2);

        assert_eq!(queue.pop().as_deref(), Some(&[0u8][..]));

        // Accepting a payload ends the overflow run
        queue.push(vec![5].into_boxed_slice());
        assert_eq!(queue.overflow_dropped, 0);
        assert_eq!(queue.dropped_total, 3);

        queue.push(vec![6].into_boxed_slice());
        assert_eq!(queue.overflow_dropped, 1);
        assert_eq!(queue.dropped_total, 4);

        assert_eq!(queue.pop().as_deref(), Some(&[1u8][..]));
        assert_eq!(queue.pop().as_deref(), Some(&[5u8][..]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn receive_dropped_counts_overflow() {
        let mut core = ChannelCore::new(Config {
            receive_queue_max: 1,
            ..Default::default()
        });

        let (transport, _socket_rx) =
            socket::new_connected(("127.0.0.1", 0), ("127.0.0.1", 9), 1500).unwrap();
        let index = core.add_link(transport);

        let ref mut buffer = [0u8; 64];
        for packet_num in 0..4 {
            let frame_bytes = frame::serial::write_data(
                &frame::DataFrame {
                    packet_num,
                    payload: b"x",
                },
                buffer,
            );
            core.handle_frame(index, frame_bytes);
        }

        assert_eq!(core.receive_dropped(), 3);
        assert!(core.poll_receive().is_some());
        assert!(core.poll_receive().is_none());
    }

    #[test]
    fn dead_link_avoided() {
        let mut ctx = MockHostContext::new();
        let mut dead = measured_link(0.01);

        // Requests go unanswered until the history is empty
        for i in 1..=link::STAT_AVG_COUNT {
            dead.maybe_send_req(i as f64 * link::STAT_INTERVAL, &mut ctx);
        }
        dead.send(&[0; 10], 3.0, &mut ctx);
        assert_eq!(dead.calc_bandwidth(), 0.0);

        let mut links = vec![dead, measured_link(0.3)];
        assert_eq!(choose_link(links.iter_mut(), 3.0), Some(1));
    }
}
