use super::{canfd, CanFdDriver};
use crate::error::{CanBusError, Result};
use crate::types::{CanId, Clock, RxHeader, Timestamp, MAX_FD_PAYLOAD};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A frame handed to `transmit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub id: CanId,
    pub dlc: u8,
    pub data: Vec<u8>,
}

/// Mock transmit handler function type
pub type MockTxHandler = Box<dyn Fn(&SentFrame) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct MockState {
    sent: Vec<SentFrame>,
    rx_fifo: VecDeque<(RxHeader, [u8; MAX_FD_PAYLOAD])>,
    tx_handler: Option<MockTxHandler>,
    loopback: bool,
    rx_enabled: bool,
}

/// In-memory CAN FD controller.
///
/// Clones share the same state, so a test can hand one clone to the bus and
/// keep another for the interrupt side and for assertions.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transmitted frame is also placed in the receive FIFO
    pub fn new_loopback() -> Self {
        let driver = Self::default();
        driver.lock().loopback = true;
        driver
    }

    /// Every transmit fails with `HardwareFailure(code)`
    pub fn new_error(code: u32) -> Self {
        let driver = Self::default();
        driver.set_tx_handler(Some(Box::new(move |_: &SentFrame| {
            Err(CanBusError::HardwareFailure(code))
        })));
        driver
    }

    /// Sets a handler that decides the outcome of each transmit
    pub fn set_tx_handler(&self, handler: Option<MockTxHandler>) {
        self.lock().tx_handler = handler;
    }

    /// Queues a frame as if it had arrived on the bus
    pub fn inject(&self, id: u32, payload: &[u8]) {
        let wire_len = canfd::round_up_fd_len(payload.len());
        let dlc = canfd::len_to_dlc(wire_len).unwrap_or(0x0F);
        let mut data = [0u8; MAX_FD_PAYLOAD];
        let take = payload.len().min(MAX_FD_PAYLOAD);
        data[..take].copy_from_slice(&payload[..take]);
        self.lock().rx_fifo.push_back((RxHeader { id, dlc }, data));
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn rx_enabled(&self) -> bool {
        self.lock().rx_enabled
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test must not cascade into the others sharing state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CanFdDriver for MockDriver {
    fn transmit(&mut self, id: CanId, dlc: u8, data: &[u8]) -> Result<()> {
        let frame = SentFrame {
            id,
            dlc,
            data: data.to_vec(),
        };
        let mut state = self.lock();
        if let Some(handler) = &state.tx_handler {
            handler(&frame)?;
        }
        if state.loopback {
            let mut buf = [0u8; MAX_FD_PAYLOAD];
            buf[..data.len()].copy_from_slice(data);
            state.rx_fifo.push_back((
                RxHeader {
                    id: id as u32,
                    dlc,
                },
                buf,
            ));
        }
        state.sent.push(frame);
        Ok(())
    }

    fn frames_available(&self) -> usize {
        self.lock().rx_fifo.len()
    }

    fn receive_next(&mut self, data: &mut [u8; MAX_FD_PAYLOAD]) -> Option<RxHeader> {
        let (header, buf) = self.lock().rx_fifo.pop_front()?;
        *data = buf;
        Some(header)
    }

    fn enable_rx_notifications(&mut self) -> Result<()> {
        self.lock().rx_enabled = true;
        Ok(())
    }
}

/// Hand-driven `Clock`; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: Timestamp) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: Timestamp) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
