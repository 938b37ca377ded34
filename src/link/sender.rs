//          last_packet_num      packet_num
//          v                    v
// ---------[####################]-----> sequence slots
//          ^ start_num          ^ end_num (reserved by the request itself)
//
// Each measurement request covers the slots sent since the previous request and consumes one
// slot of its own. The receiver counts how many slots of the window it has seen; the reply echoes
// the request's send time so that the round trip can be measured without synchronized clocks.

use std::collections::VecDeque;

use tracing::debug;
use tracing::warn;

use super::HostContext;
use super::KB;
use crate::frame;
use crate::frame::serial;

pub const STAT_INTERVAL: f64 = 0.5;
pub const STAT_AVG_COUNT: u64 = 4;

pub const BANDWIDTH_PROBE_TIME: f64 = 1.0;
pub const BANDWIDTH_SCALE: f64 = 0.9;
pub const BANDWIDTH_SCALE_INTERVAL: f64 = 1.0;
pub const BANDWIDTH_MIN: f64 = 1.0 * KB;

// Below this quality a link is treated as dead and may decay to zero
pub const QUALITY_NEGLIGIBLE: f64 = 0.01;

const INITIAL_PING: f64 = 0.1;
const INITIAL_BANDWIDTH: f64 = 100.0 * KB;
const INITIAL_QUALITY: f64 = 1.0;

#[derive(Clone, Copy, Debug)]
struct Stat {
    num: u64,
    ping: f64,
    quality: f64,
}

/// Sending half of a link: frames outgoing data and estimates path capacity.
pub struct LinkSender {
    packet_num: u64,
    last_packet_num: u64,
    stat_num: u64,

    // (send time, length) of data sent within the bandwidth window
    samples: VecDeque<(f64, usize)>,
    // Sum of lengths in `samples`
    samples_total: usize,

    // Measurement replies, at most STAT_AVG_COUNT recent cycles
    stats: VecDeque<Stat>,

    calc_ping: f64,
    calc_bandwidth: f64,
    calc_quality: f64,

    last_bandwidth_scale: f64,
    last_req_time: Option<f64>,

    // Reused frame buffer
    frame_buffer: Vec<u8>,
}

fn avg<I>(values: I) -> f64
where
    I: Iterator<Item = f64>,
{
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    sum / count as f64
}

impl LinkSender {
    pub fn new(now: f64) -> Self {
        Self {
            packet_num: 0,
            last_packet_num: 0,
            stat_num: 0,

            samples: VecDeque::new(),
            samples_total: 0,

            stats: VecDeque::new(),

            calc_ping: INITIAL_PING,
            calc_bandwidth: INITIAL_BANDWIDTH,
            calc_quality: INITIAL_QUALITY,

            last_bandwidth_scale: now,
            last_req_time: None,

            frame_buffer: Vec::new(),
        }
    }

    pub fn packet_num(&self) -> u64 {
        self.packet_num
    }

    pub fn stat_num(&self) -> u64 {
        self.stat_num
    }

    /// Smoothed round-trip time, in seconds.
    pub fn calc_ping(&self) -> f64 {
        self.calc_ping
    }

    /// Estimated capacity, in bytes per second.
    pub fn calc_bandwidth(&self) -> f64 {
        self.calc_bandwidth
    }

    /// Smoothed fraction of frames delivered, in [0, 1].
    pub fn calc_quality(&self) -> f64 {
        self.calc_quality
    }

    /// Bytes per second sent over the trailing bandwidth window ending at `now`.
    pub fn used_bandwidth(&mut self, now: f64) -> f64 {
        let oldest_time = now - BANDWIDTH_PROBE_TIME;

        while let Some(&(time, len)) = self.samples.front() {
            if time > oldest_time {
                break;
            }

            self.samples.pop_front();
            self.samples_total -= len;
        }

        self.samples_total as f64 / BANDWIDTH_PROBE_TIME
    }

    pub fn send(&mut self, payload: &[u8], now: f64, ctx: &mut impl HostContext) {
        self.samples.push_back((now, payload.len()));
        self.samples_total += payload.len();

        let data_frame = frame::DataFrame {
            packet_num: self.packet_num,
            payload,
        };
        self.packet_num += 1;

        self.frame_buffer
            .resize(serial::DATA_HEADER_SIZE + payload.len(), 0);
        let frame_bytes = serial::write_data(&data_frame, &mut self.frame_buffer);
        ctx.send_frame(frame_bytes);

        self.recalc(now);
    }

    /// Sends a measurement request if none has been sent within the last `STAT_INTERVAL`.
    pub fn maybe_send_req(&mut self, now: f64, ctx: &mut impl HostContext) {
        let due = match self.last_req_time {
            Some(last_req_time) => now - last_req_time >= STAT_INTERVAL,
            None => true,
        };

        if due {
            self.send_req(now, ctx);
        }
    }

    pub fn send_req(&mut self, now: f64, ctx: &mut impl HostContext) {
        use serial::SimpleFrame;
        use serial::SimpleFrameWrite;

        let req = frame::StatReqFrame {
            stat_num: self.stat_num,
            send_time: now,
            end_num: self.packet_num,
            start_num: self.last_packet_num,
        };

        self.last_packet_num = self.packet_num;
        self.stat_num += 1;
        // The request occupies a sequence slot although it carries no data
        self.packet_num += 1;
        self.last_req_time = Some(now);

        let ref mut buffer = [0u8; frame::StatReqFrame::FRAME_SIZE];
        ctx.send_frame(req.write(buffer));
    }

    pub fn recv_stat(&mut self, stat: &frame::StatFrame, now: f64) {
        if !stat.quality.is_finite() || !stat.send_time.is_finite() {
            warn!(stat_num = stat.stat_num, "dropping non-finite measurement reply");
            return;
        }

        if stat.stat_num >= self.stat_num {
            warn!(stat_num = stat.stat_num, "dropping reply to a request never sent");
            return;
        }

        if self.stats.iter().any(|s| s.num == stat.stat_num) {
            warn!(stat_num = stat.stat_num, "dropping duplicate measurement reply");
            return;
        }

        if stat.stat_num.saturating_add(STAT_AVG_COUNT) < self.stat_num {
            debug!(stat_num = stat.stat_num, "dropping stale measurement reply");
            return;
        }

        let ping = now - stat.send_time;

        self.stats.push_back(Stat {
            num: stat.stat_num,
            ping,
            quality: stat.quality.clamp(0.0, 1.0),
        });

        self.recalc(now);

        debug!(
            stat_num = stat.stat_num,
            ping,
            quality = stat.quality,
            calc_ping = self.calc_ping,
            calc_bandwidth = self.calc_bandwidth,
            calc_quality = self.calc_quality,
            "measurement reply"
        );
    }

    fn recalc(&mut self, now: f64) {
        let stat_num = self.stat_num;
        self.stats
            .retain(|stat| stat.num.saturating_add(STAT_AVG_COUNT) >= stat_num);

        if self.stats.is_empty() {
            // A fresh link keeps its initial estimates until STAT_AVG_COUNT requests have gone
            // unanswered
            if stat_num > STAT_AVG_COUNT {
                self.calc_bandwidth = 0.0;
                self.calc_ping = f64::INFINITY;
                self.calc_quality = 0.0;
            }
        } else {
            self.calc_ping = avg(self.stats.iter().map(|stat| stat.ping));
            self.calc_quality = avg(self.stats.iter().map(|stat| stat.quality));
            self.recalc_bandwidth(now);
        }
    }

    fn recalc_bandwidth(&mut self, now: f64) {
        // Relies on an outer flow control (e.g. TCP) probing for more capacity every few seconds.
        // The estimate follows any throughput beyond it, and otherwise only shrinks through
        // scale_bandwidth, or when the link is both saturated and lossy.
        self.scale_bandwidth(now);

        let used_bandwidth = self.used_bandwidth(now);
        let throughput = self.calc_quality * used_bandwidth;

        // When saturated, the delivered share of the offered load is the best evidence available,
        // even if it is below the current estimate
        if throughput > self.calc_bandwidth || used_bandwidth > self.calc_bandwidth {
            self.calc_bandwidth = throughput;
        }

        self.clamp_bandwidth();
    }

    fn scale_bandwidth(&mut self, now: f64) {
        let elapsed = now - self.last_bandwidth_scale;
        let count = (elapsed / BANDWIDTH_SCALE_INTERVAL).floor();

        if count >= 1.0 {
            self.last_bandwidth_scale += count * BANDWIDTH_SCALE_INTERVAL;
            self.calc_bandwidth *= BANDWIDTH_SCALE.powf(count);
        }

        self.clamp_bandwidth();
    }

    fn clamp_bandwidth(&mut self) {
        if self.calc_quality > QUALITY_NEGLIGIBLE && self.calc_bandwidth < BANDWIDTH_MIN {
            self.calc_bandwidth = BANDWIDTH_MIN;
        }
    }
}
