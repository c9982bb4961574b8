use std::time::Instant;

/// Standard (11-bit) CAN identifier
pub type CanId = u16;

/// Mask applied to every identifier entering or leaving the bus
pub const STD_ID_MASK: u32 = 0x7FF;

/// Largest CAN FD payload in bytes
pub const MAX_FD_PAYLOAD: usize = 64;

/// Timestamp in milliseconds, wraps at `u32::MAX`
pub type Timestamp = u32;

/// Received frame as stored in the ingress ring.
///
/// Plain value data: it is copied out of the controller in interrupt context
/// and copied again when the poll context pops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub id: CanId,
    pub len: u8,
    pub data: [u8; MAX_FD_PAYLOAD],
}

impl RawFrame {
    pub const EMPTY: RawFrame = RawFrame {
        id: 0,
        len: 0,
        data: [0; MAX_FD_PAYLOAD],
    };

    /// Builds a frame from a payload slice, clamping to 64 bytes
    pub fn new(id: CanId, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_FD_PAYLOAD);
        let mut data = [0u8; MAX_FD_PAYLOAD];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id: id & STD_ID_MASK as CanId,
            len: len as u8,
            data,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Header of a frame read from the controller FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxHeader {
    /// Identifier as reported by the controller (may carry bits above 11)
    pub id: u32,
    /// DLC code, not a byte count
    pub dlc: u8,
}

/// Configuration trait that must be implemented by all configurations
pub trait Config {
    fn validate(&self) -> crate::error::Result<()>;
}

/// Monotonic millisecond time source
pub trait Clock {
    fn now_ms(&self) -> Timestamp;
}

/// `Clock` backed by `std::time::Instant`, counting from construction
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> Timestamp {
        // Truncation is the wrap-around
        self.start.elapsed().as_millis() as Timestamp
    }
}
