use std::net;
use std::str::FromStr;

use super::error::Error;
use super::frame::serial;

const FRAME_SIZE_MAX_DEFAULT: usize = 4096;
const FRAME_SIZE_MAX_MIN: usize = 64;

const RECEIVE_QUEUE_MAX_DEFAULT: usize = 1024;

/// Configuration for a [`Channel`](crate::Channel) or [`ChannelServer`](crate::ChannelServer).
#[derive(Clone, Debug)]
pub struct Config {
    /// Size of the receive buffer, and upper bound on any frame sent, in bytes.
    ///
    /// Minimum value: 64 \
    /// Default value: 4,096
    pub frame_size_max: usize,

    /// Number of received payloads that may wait for the local sink before newer ones are
    /// dropped.
    ///
    /// Minimum value: 1 \
    /// Default value: 1,024
    pub receive_queue_max: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_size_max: FRAME_SIZE_MAX_DEFAULT,
            receive_queue_max: RECEIVE_QUEUE_MAX_DEFAULT,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) {
        assert!(
            self.frame_size_max >= FRAME_SIZE_MAX_MIN,
            "invalid channel configuration: frame_size_max < {}",
            FRAME_SIZE_MAX_MIN
        );
        assert!(
            self.receive_queue_max >= 1,
            "invalid channel configuration: receive_queue_max < 1"
        );
    }

    /// Largest payload that fits in a data frame.
    pub fn packet_size_max(&self) -> usize {
        self.frame_size_max - serial::DATA_HEADER_SIZE
    }
}

/// A `LOCAL+REMOTE` address pair naming one path of a client channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSpec {
    pub local: net::SocketAddr,
    pub remote: net::SocketAddr,
}

fn parse_addr(s: &str) -> Result<net::SocketAddr, Error> {
    s.trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(s.to_string()))
}

impl FromStr for LinkSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, remote) = s
            .split_once('+')
            .ok_or_else(|| Error::InvalidLinkSpec(s.to_string()))?;

        Ok(Self {
            local: parse_addr(local)?,
            remote: parse_addr(remote)?,
        })
    }
}
