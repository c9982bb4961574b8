//! Data link layer: moving raw frames out of the controller.
//!
//! The receive interrupt drains the controller FIFO into an [`RxRing`]
//! through its [`RxProducer`]; the poll context reads them back through the
//! matching [`RxConsumer`].

pub mod ring;

pub use ring::{RxConsumer, RxProducer, RxRing, DEFAULT_RX_RING_DEPTH};

use crate::physical::{canfd, CanFdDriver};
use crate::types::{CanId, RawFrame, MAX_FD_PAYLOAD, STD_ID_MASK};

impl<const N: usize> RxProducer<'_, N> {
    /// Receive interrupt body: moves every frame the controller holds into
    /// the ring. Only standard identifiers are kept, extended bits are
    /// masked off.
    ///
    /// Returns the number of frames drained.
    pub fn on_rx_interrupt<D: CanFdDriver + ?Sized>(&mut self, driver: &mut D) -> usize {
        let mut drained = 0;
        let mut data = [0u8; MAX_FD_PAYLOAD];

        while driver.frames_available() > 0 {
            let Some(header) = driver.receive_next(&mut data) else {
                break;
            };

            let len = canfd::dlc_to_len(header.dlc).min(MAX_FD_PAYLOAD);
            let frame = RawFrame {
                id: (header.id & STD_ID_MASK) as CanId,
                len: len as u8,
                data,
            };
            self.push(&frame);
            drained += 1;
        }

        drained
    }
}
