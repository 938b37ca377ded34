use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixDatagram;

/// The local packet endpoint of a channel, e.g. a TUN device. Packets read from the port are sent
/// over the links; payloads received over the links are written to it.
///
/// The port is registered with the channel's poller, and `read_packet` is only called once the
/// port has been reported readable.
pub trait LocalPort: AsFd + AsRawFd {
    /// Reads a single packet into `buf`, returning its length.
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes a single packet.
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;
}

impl LocalPort for UnixDatagram {
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.send(packet).map(|_| ())
    }
}
