//! Fixed-layout request and reply frames.
//!
//! All integers and floats are little-endian.

use stratus_model::Seconds;

use crate::MessengerError;

pub const REQUEST_LEN: usize = 4;
pub const CONN_COUNT_LEN: usize = 4;
pub const TIME_LOSS_LEN: usize = 16;
pub const UPDATE_COUNT_LEN: usize = 8;

pub fn encode_request(opcode: u32) -> [u8; REQUEST_LEN] {
    opcode.to_le_bytes()
}

/// Live connection count as reported by the coordinator.
///
/// The querying connection is one of them, so the worker count is `raw - 1`.
/// A raw count of zero cannot come from a live coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnCount {
    pub raw: u32,
}

impl ConnCount {
    pub fn decode(buf: [u8; CONN_COUNT_LEN]) -> Self {
        Self {
            raw: u32::from_le_bytes(buf),
        }
    }

    pub fn workers(self) -> Result<u32, MessengerError> {
        self.raw.checked_sub(1).ok_or_else(|| {
            MessengerError::Malformed("connection count of zero includes no querier".into())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeLoss {
    pub time: Seconds,
    pub loss: f64,
}

impl TimeLoss {
    pub fn decode(buf: &[u8]) -> Result<Self, MessengerError> {
        let frame: [u8; TIME_LOSS_LEN] =
            buf.try_into().map_err(|_| MessengerError::ShortReply {
                expected: TIME_LOSS_LEN,
                got: buf.len(),
            })?;
        let mut time = [0u8; 8];
        let mut loss = [0u8; 8];
        time.copy_from_slice(&frame[..8]);
        loss.copy_from_slice(&frame[8..]);
        Ok(Self {
            time: f64::from_le_bytes(time),
            loss: f64::from_le_bytes(loss),
        })
    }
}

pub fn decode_update_count(buf: [u8; UPDATE_COUNT_LEN]) -> u64 {
    u64::from_le_bytes(buf)
}
