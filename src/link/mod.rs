use tracing::warn;

use super::frame;

mod receiver;
mod sender;

pub use receiver::calc_quality;
pub use receiver::LinkReceiver;
pub use receiver::QUALITY_MIN_WINDOW;
pub use sender::LinkSender;
pub use sender::{BANDWIDTH_MIN, BANDWIDTH_PROBE_TIME, QUALITY_NEGLIGIBLE, STAT_AVG_COUNT};
pub use sender::STAT_INTERVAL;

pub const KB: f64 = 1000.0;

pub trait HostContext {
    // Called to send a frame over the link's transport.
    fn send_frame(&mut self, frame_bytes: &[u8]);

    // Called when a data payload has been received from the remote host
    fn on_receive(&mut self, packet_bytes: Box<[u8]>);
}

/// Protocol state bound to one transport: a sender and a receiver half.
pub struct Link {
    sender: LinkSender,
    receiver: LinkReceiver,
}

impl Link {
    pub fn new(now: f64) -> Self {
        Self {
            sender: LinkSender::new(now),
            receiver: LinkReceiver::new(),
        }
    }

    pub fn sender(&self) -> &LinkSender {
        &self.sender
    }

    pub fn calc_ping(&self) -> f64 {
        self.sender.calc_ping()
    }

    pub fn calc_bandwidth(&self) -> f64 {
        self.sender.calc_bandwidth()
    }

    pub fn calc_quality(&self) -> f64 {
        self.sender.calc_quality()
    }

    pub fn used_bandwidth(&mut self, now: f64) -> f64 {
        self.sender.used_bandwidth(now)
    }

    pub fn send(&mut self, payload: &[u8], now: f64, ctx: &mut impl HostContext) {
        self.sender.send(payload, now, ctx);
    }

    pub fn maybe_send_req(&mut self, now: f64, ctx: &mut impl HostContext) {
        self.sender.maybe_send_req(now, ctx);
    }

    /// Routes an inbound frame to the half responsible for it. Malformed frames are logged and
    /// dropped.
    pub fn handle_frame(&mut self, frame_bytes: &[u8], now: f64, ctx: &mut impl HostContext) {
        match frame::serial::read_frame(frame_bytes) {
            Ok(frame::Frame::Data(data)) => {
                self.receiver.recv_packet(&data, ctx);
            }
            Ok(frame::Frame::StatReq(req)) => {
                self.receiver.recv_req(&req, ctx);
            }
            Ok(frame::Frame::Stat(stat)) => {
                self.sender.recv_stat(&stat, now);
            }
            Err(err) => {
                warn!(%err, "dropping frame");
            }
        }
    }
}
