//! Linux TUN device as a channel's local port.
//!
//! Creating the device requires `CAP_NET_ADMIN`. Addresses and routes are left to the operator.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use tracing::info;

use crate::port::LocalPort;

pub const DEFAULT_MTU: u16 = 1400;

pub struct TunPort {
    device: tun_rs::SyncDevice,
    name: String,
}

impl TunPort {
    /// Creates a TUN device. If `name` is `None`, the kernel assigns one.
    pub fn new(name: Option<&str>, mtu: u16) -> io::Result<Self> {
        let mut builder = tun_rs::DeviceBuilder::new().mtu(mtu);

        if let Some(name) = name {
            builder = builder.name(name);
        }

        let device = builder.build_sync()?;
        let name = device.name()?;

        info!(%name, mtu, "created tun device");

        Ok(Self { device, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsRawFd for TunPort {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }
}

impl AsFd for TunPort {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // The descriptor is owned by the device, which outlives the borrow
        unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) }
    }
}

impl LocalPort for TunPort {
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.recv(buf)
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.device.send(packet).map(|_| ())
    }
}
