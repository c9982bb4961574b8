//! Physical layer: the boundary to the CAN FD controller.
//!
//! This module provides:
//! - The [`CanFdDriver`] trait the transport consumes
//! - The CAN FD DLC/length codec ([`canfd`])
//! - An in-memory driver for tests (`mock`, with the `mock` feature)
//!
//! # Examples
//!
//! ```rust
//! use canfd_link::physical::canfd;
//!
//! let wire_len = canfd::round_up_fd_len(10);
//! assert_eq!(wire_len, 12);
//! assert_eq!(canfd::len_to_dlc(wire_len), Ok(9));
//! ```

pub mod canfd;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use crate::error::Result;
use crate::types::{CanId, RxHeader, MAX_FD_PAYLOAD};

/// Hardware CAN FD controller as seen by the transport.
///
/// `transmit` and `enable_rx_notifications` are called from the poll
/// context. `frames_available` and `receive_next` are called from the
/// receive interrupt.
pub trait CanFdDriver {
    /// Queues one data frame. `data.len()` is the wire length and `dlc`
    /// its code. Fails with `HardwareFailure` if the controller refuses it.
    fn transmit(&mut self, id: CanId, dlc: u8, data: &[u8]) -> Result<()>;

    /// Number of frames waiting in the receive FIFO
    fn frames_available(&self) -> usize;

    /// Reads the next frame from the receive FIFO into `data`
    fn receive_next(&mut self, data: &mut [u8; MAX_FD_PAYLOAD]) -> Option<RxHeader>;

    /// Arms the "new frame" interrupt
    fn enable_rx_notifications(&mut self) -> Result<()>;
}

impl<D: CanFdDriver + ?Sized> CanFdDriver for &mut D {
    fn transmit(&mut self, id: CanId, dlc: u8, data: &[u8]) -> Result<()> {
        (**self).transmit(id, dlc, data)
    }

    fn frames_available(&self) -> usize {
        (**self).frames_available()
    }

    fn receive_next(&mut self, data: &mut [u8; MAX_FD_PAYLOAD]) -> Option<RxHeader> {
        (**self).receive_next(data)
    }

    fn enable_rx_notifications(&mut self) -> Result<()> {
        (**self).enable_rx_notifications()
    }
}
