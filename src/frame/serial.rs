use thiserror::Error;

use super::*;

pub const FRAME_HEADER_SIZE: usize = 1;

pub const DATA_NUM_SIZE: usize = 8;
pub const DATA_HEADER_SIZE: usize = FRAME_HEADER_SIZE + DATA_NUM_SIZE;
pub const STAT_REQ_SIZE: usize = 32;
pub const STAT_SIZE: usize = 24;

const FRAME_TYPE_DATA: u8 = 0x01;
const FRAME_TYPE_STAT_REQ: u8 = 0x02;
const FRAME_TYPE_STAT: u8 = 0x03;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame type 0x{0:02X}")]
    UnknownType(u8),

    #[error("truncated {frame_type:?} frame ({len} bytes)")]
    Truncated { frame_type: FrameType, len: usize },
}

pub struct Reader<'a> {
    buffer: &'a [u8],
    bytes_read: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    // Callers verify the remaining length against BlockSerial::SIZE beforehand
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.bytes_read..self.bytes_read + N]);
        self.bytes_read += N;
        bytes
    }

    pub fn read_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    pub fn read_f64(&mut self) -> f64 {
        f64::from_be_bytes(self.take())
    }
}

pub struct Writer<'a> {
    buffer: &'a mut [u8],
    bytes_written: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        let end = self.bytes_written + bytes.len();
        self.buffer[self.bytes_written..end].copy_from_slice(bytes);
        self.bytes_written = end;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_slice(&[value]);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_slice(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_slice(&value.to_be_bytes());
    }
}

/// A fixed-size frame body.
pub trait BlockSerial {
    const SIZE: usize;

    fn read(rd: &mut Reader) -> Self
    where
        Self: Sized;

    fn write(wr: &mut Writer, obj: &Self);
}

impl BlockSerial for StatReqFrame {
    const SIZE: usize = STAT_REQ_SIZE;

    fn read(rd: &mut Reader) -> Self {
        let stat_num = rd.read_u64();
        let send_time = rd.read_f64();
        let end_num = rd.read_u64();
        let start_num = rd.read_u64();

        Self {
            stat_num,
            send_time,
            end_num,
            start_num,
        }
    }

    fn write(wr: &mut Writer, obj: &Self) {
        wr.write_u64(obj.stat_num);
        wr.write_f64(obj.send_time);
        wr.write_u64(obj.end_num);
        wr.write_u64(obj.start_num);
    }
}

impl BlockSerial for StatFrame {
    const SIZE: usize = STAT_SIZE;

    fn read(rd: &mut Reader) -> Self {
        let stat_num = rd.read_u64();
        let quality = rd.read_f64();
        let send_time = rd.read_f64();

        Self {
            stat_num,
            quality,
            send_time,
        }
    }

    fn write(wr: &mut Writer, obj: &Self) {
        wr.write_u64(obj.stat_num);
        wr.write_f64(obj.quality);
        wr.write_f64(obj.send_time);
    }
}

fn type_bits(frame_type: FrameType) -> u8 {
    match frame_type {
        FrameType::Data => FRAME_TYPE_DATA,
        FrameType::StatReq => FRAME_TYPE_STAT_REQ,
        FrameType::Stat => FRAME_TYPE_STAT,
    }
}

pub fn read_type(frame_bytes: &[u8]) -> Result<FrameType, FrameError> {
    let frame_type = match frame_bytes.first() {
        None => return Err(FrameError::Empty),
        Some(&FRAME_TYPE_DATA) => FrameType::Data,
        Some(&FRAME_TYPE_STAT_REQ) => FrameType::StatReq,
        Some(&FRAME_TYPE_STAT) => FrameType::Stat,
        Some(&other) => return Err(FrameError::UnknownType(other)),
    };

    Ok(frame_type)
}

fn read_block<T>(frame_type: FrameType, frame_bytes: &[u8]) -> Result<T, FrameError>
where
    T: BlockSerial,
{
    let payload = &frame_bytes[FRAME_HEADER_SIZE..];

    if payload.len() < T::SIZE {
        return Err(FrameError::Truncated {
            frame_type,
            len: frame_bytes.len(),
        });
    }

    let ref mut rd = Reader::new(payload);
    let obj = T::read(rd);

    debug_assert_eq!(rd.bytes_read(), T::SIZE);

    Ok(obj)
}

/// Decodes a complete frame. Data frames borrow their payload from `frame_bytes`.
pub fn read_frame(frame_bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    let frame_type = read_type(frame_bytes)?;

    match frame_type {
        FrameType::Data => {
            if frame_bytes.len() < DATA_HEADER_SIZE {
                return Err(FrameError::Truncated {
                    frame_type,
                    len: frame_bytes.len(),
                });
            }

            let mut rd = Reader::new(&frame_bytes[FRAME_HEADER_SIZE..]);
            let packet_num = rd.read_u64();

            Ok(Frame::Data(DataFrame {
                packet_num,
                payload: &frame_bytes[DATA_HEADER_SIZE..],
            }))
        }
        FrameType::StatReq => Ok(Frame::StatReq(read_block(frame_type, frame_bytes)?)),
        FrameType::Stat => Ok(Frame::Stat(read_block(frame_type, frame_bytes)?)),
    }
}

pub trait SimpleFrame {
    const FRAME_TYPE: FrameType;
    const FRAME_SIZE: usize;
}

impl SimpleFrame for StatReqFrame {
    const FRAME_TYPE: FrameType = FrameType::StatReq;
    const FRAME_SIZE: usize = FRAME_HEADER_SIZE + STAT_REQ_SIZE;
}

impl SimpleFrame for StatFrame {
    const FRAME_TYPE: FrameType = FrameType::Stat;
    const FRAME_SIZE: usize = FRAME_HEADER_SIZE + STAT_SIZE;
}

pub trait SimpleFrameWrite {
    fn write<'a>(&self, dst: &'a mut [u8]) -> &'a [u8];
}

impl<T> SimpleFrameWrite for T
where
    T: SimpleFrame + BlockSerial,
{
    fn write<'a>(&self, dst: &'a mut [u8]) -> &'a [u8] {
        debug_assert!(dst.len() >= Self::FRAME_SIZE);
        let mut wr = Writer::new(dst);
        wr.write_u8(type_bits(Self::FRAME_TYPE));
        <T as BlockSerial>::write(&mut wr, self);
        let size = wr.bytes_written();
        &dst[..size]
    }
}

/// Writes a data frame into `dst`, which must hold `DATA_HEADER_SIZE + payload.len()` bytes.
pub fn write_data<'a>(frame: &DataFrame, dst: &'a mut [u8]) -> &'a [u8] {
    let frame_size = DATA_HEADER_SIZE + frame.payload.len();
    debug_assert!(dst.len() >= frame_size);

    let mut wr = Writer::new(dst);
    wr.write_u8(FRAME_TYPE_DATA);
    wr.write_u64(frame.packet_num);
    wr.write_slice(frame.payload);

    debug_assert_eq!(wr.bytes_written(), frame_size);

    &dst[..frame_size]
}

pub fn write_data_boxed(frame: &DataFrame) -> Box<[u8]> {
    let mut buffer = vec![0; DATA_HEADER_SIZE + frame.payload.len()].into_boxed_slice();
    write_data(frame, &mut buffer);
    buffer
}
