pub mod serial;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameType {
    Data,
    StatReq,
    Stat,
}

/// Carries one chunk of payload, numbered by the sending link.
#[derive(Debug, PartialEq)]
pub struct DataFrame<'a> {
    pub packet_num: u64,
    pub payload: &'a [u8],
}

/// Asks the remote receiver for the delivery quality of `[start_num, end_num]`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatReqFrame {
    pub stat_num: u64,
    pub send_time: f64,
    pub end_num: u64,
    pub start_num: u64,
}

/// Answers a [`StatReqFrame`], echoing its `send_time`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatFrame {
    pub stat_num: u64,
    pub quality: f64,
    pub send_time: f64,
}

#[derive(Debug, PartialEq)]
pub enum Frame<'a> {
    Data(DataFrame<'a>),
    StatReq(StatReqFrame),
    Stat(StatFrame),
}
