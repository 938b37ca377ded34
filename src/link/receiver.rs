use std::collections::BTreeSet;

use super::HostContext;
use crate::frame;

// Windows spanning fewer sequence numbers than this report full quality
pub const QUALITY_MIN_WINDOW: u64 = 5;

/// Most sequence numbers remembered between measurement requests. Beyond this, the lowest are
/// forgotten.
pub const OBSERVED_MAX: usize = 1 << 16;

/// Fraction of the window `[start, end]` present in `packet_nums`, clamped to [0, 1].
pub fn calc_quality(packet_nums: &BTreeSet<u64>, start: u64, end: u64) -> f64 {
    let count = end.saturating_sub(start);

    if count < QUALITY_MIN_WINDOW {
        // Too little traffic to judge
        return 1.0;
    }

    let success = packet_nums.range(start..=end).count();

    (success as f64 / count as f64).min(1.0)
}

/// Receiving half of a link: tracks inbound sequence numbers and answers measurement requests.
#[derive(Default)]
pub struct LinkReceiver {
    // Sequence numbers seen since the last measurement reply
    packet_nums: BTreeSet<u64>,
}

impl LinkReceiver {
    pub fn new() -> Self {
        Self {
            packet_nums: BTreeSet::new(),
        }
    }

    pub fn observed_count(&self) -> usize {
        self.packet_nums.len()
    }

    pub fn recv_req(&mut self, req: &frame::StatReqFrame, ctx: &mut impl HostContext) {
        use frame::serial::SimpleFrame;
        use frame::serial::SimpleFrameWrite;

        // The request's own slot counts as delivered
        self.packet_nums.insert(req.end_num);

        let quality = calc_quality(&self.packet_nums, req.start_num, req.end_num);
        self.packet_nums.clear();

        let stat = frame::StatFrame {
            stat_num: req.stat_num,
            quality,
            send_time: req.send_time,
        };

        let ref mut buffer = [0u8; frame::StatFrame::FRAME_SIZE];
        ctx.send_frame(stat.write(buffer));
    }

    pub fn recv_packet(&mut self, data: &frame::DataFrame, ctx: &mut impl HostContext) {
        self.packet_nums.insert(data.packet_num);

        if self.packet_nums.len() > OBSERVED_MAX {
            // Requests are being lost
            self.packet_nums.pop_first();
        }

        ctx.on_receive(data.payload.into());
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::MockHostContext;
    use super::*;
    use crate::frame::serial;

    fn observed(nums: &[u64]) -> BTreeSet<u64> {
        nums.iter().copied().collect()
    }

    #[test]
    fn quality_partial_window() {
        let nums = observed(&[0, 1, 2, 3, 4, 9]);
        assert_eq!(calc_quality(&nums, 0, 10), 0.6);
    }

    #[test]
    fn quality_small_window() {
        assert_eq!(calc_quality(&observed(&[]), 0, 4), 1.0);
        assert_eq!(calc_quality(&observed(&[]), 100, 100), 1.0);
        // Reversed window
        assert_eq!(calc_quality(&observed(&[]), 10, 2), 1.0);
    }

    #[test]
    fn quality_ignores_outside_window() {
        let nums = observed(&[1, 2, 50, 51, 52, 53, 54, 55, 99]);
        assert_eq!(calc_quality(&nums, 50, 60), 0.6);
    }

    #[test]
    fn quality_never_exceeds_one() {
        let nums = (0..=10).collect();
        assert_eq!(calc_quality(&nums, 0, 10), 1.0);
    }

    #[test]
    fn recv_packet_delivers_payload() {
        let mut ctx = MockHostContext::new();
        let mut receiver = LinkReceiver::new();

        receiver.recv_packet(
            &frame::DataFrame {
                packet_num: 3,
                payload: b"one",
            },
            &mut ctx,
        );
        receiver.recv_packet(
            &frame::DataFrame {
                packet_num: 1,
                payload: b"two",
            },
            &mut ctx,
        );

        assert_eq!(receiver.observed_count(), 2);
        assert_eq!(ctx.received.len(), 2);
        assert_eq!(&*ctx.received[0], b"one");
        assert_eq!(&*ctx.received[1], b"two");
    }

    #[test]
    fn recv_req_replies_and_clears() {
        let mut ctx = MockHostContext::new();
        let mut receiver = LinkReceiver::new();

        for packet_num in [10, 11, 12, 14, 15, 17, 18, 19] {
            receiver.recv_packet(
                &frame::DataFrame {
                    packet_num,
                    payload: &[],
                },
                &mut ctx,
            );
        }

        let req = frame::StatReqFrame {
            stat_num: 5,
            send_time: 1.25,
            end_num: 20,
            start_num: 10,
        };

        receiver.recv_req(&req, &mut ctx);

        assert_eq!(receiver.observed_count(), 0);
        assert_eq!(ctx.sent.len(), 1);

        match serial::read_frame(&ctx.sent[0]) {
            Ok(frame::Frame::Stat(stat)) => {
                assert_eq!(stat.stat_num, 5);
                assert_eq!(stat.send_time, 1.25);
                // 8 data frames plus the request slot
                assert_eq!(stat.quality, 0.9);
            }
            other => panic!("expected stat reply, found {:?}", other),
        }
    }

    #[test]
    fn observed_set_bounded() {
        let mut ctx = MockHostContext::new();
        let mut receiver = LinkReceiver::new();

        let total = OBSERVED_MAX as u64 + 100;
        for packet_num in 0..total {
            receiver.recv_packet(
                &frame::DataFrame {
                    packet_num,
                    payload: &[],
                },
                &mut ctx,
            );
        }

        assert_eq!(receiver.observed_count(), OBSERVED_MAX);

        // The most recent window is still fully observed
        let req = frame::StatReqFrame {
            stat_num: 0,
            send_time: 0.0,
            end_num: total,
            start_num: total - 40,
        };

        receiver.recv_req(&req, &mut ctx);

        assert_eq!(receiver.observed_count(), 0);

        match serial::read_frame(ctx.sent.last().unwrap()) {
            Ok(frame::Frame::Stat(stat)) => assert_eq!(stat.quality, 1.0),
            other => panic!("expected stat reply, found {:?}", other),
        }
    }
}
