/*

A channel bonds several datagram paths (links) between two hosts into a single packet pipe. Each
packet read from the local port is sent whole over exactly one link; packets arriving over any
link are written to the local port in arrival order. Nothing is fragmented, resent, or reordered.

# Frames

  DATA      0x01 | packet_num: u64 | payload...
  STAT_REQ  0x02 | stat_num: u64 | send_time: f64 | end_num: u64 | start_num: u64
  STAT      0x03 | stat_num: u64 | quality: f64 | send_time: f64

All integers and floats are big-endian. Frames with an unknown type byte or a short body are
dropped.

# Measurement

Every link numbers its outgoing DATA frames. Every STAT_INTERVAL seconds the sender asks the
remote receiver how many of the sequence numbers sent since the previous request arrived. The
request occupies a sequence number of its own, and counts as received. The receiver answers with
the delivered fraction of the window, and clears its record:

  quality <- |received ∩ [start_num, end_num]| / (end_num - start_num)

Windows spanning fewer than QUALITY_MIN_WINDOW numbers report a quality of 1. The reply echoes the
request's send time, so the sender measures the round trip against its own clock:

  ping <- now - send_time

The sender keeps the replies of the last STAT_AVG_COUNT request cycles and averages ping and
quality over them. If every kept reply ages out, the link is presumed dead: bandwidth 0, ping
infinite, quality 0.

# Bandwidth estimate

Offered load (used bandwidth) is the number of payload bytes sent in the trailing
BANDWIDTH_PROBE_TIME seconds. The estimate is recomputed on every send and reply:

  bandwidth <- bandwidth * BANDWIDTH_SCALE ^ whole_seconds_elapsed
  throughput <- quality * used

  if throughput > bandwidth or used > bandwidth:
    bandwidth <- throughput

That is, the estimate follows any throughput above it, and is otherwise lowered only when the link
is loaded beyond it and losing frames. An outer flow control (e.g. TCP inside the tunnel) is
expected to push for more capacity every so often. While quality is above QUALITY_NEGLIGIBLE, the
estimate does not fall below BANDWIDTH_MIN.

# Link selection

A link is safe if used / bandwidth < SAFE_BANDWIDTH_PART. Each packet goes to the safe link with
the lowest ping. If no link is safe, it goes to the link with the most headroom (bandwidth - used).
Ties go to the link added first.

# Server

The server binds a single socket. Each new remote address it hears from becomes a link of the
server's only channel, and replies to it go out through the same socket.

*/

pub mod channel;
mod config;
mod epoch;
mod error;
pub mod frame;
pub mod link;
#[cfg(unix)]
pub mod port;
pub mod server;
mod socket;
#[cfg(target_os = "linux")]
pub mod tun;

pub use channel::Channel;
pub use channel::LinkStats;
pub use config::Config;
pub use config::LinkSpec;
pub use error::Error;
pub use error::Result;
pub use server::ChannelServer;
