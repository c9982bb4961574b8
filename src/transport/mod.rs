//! Transport layer: fragmentation, reassembly and subscriber fanout on top
//! of raw CAN FD frames.
//!
//! [`CanBus`] is the per-bus context object. It is driven from a single
//! poll context; the receive interrupt only ever touches the
//! [`RxProducer`](crate::data_link::RxProducer) half of the ingress ring.

pub mod fanout;
pub mod fragment;
pub mod reassembly;


use crate::data_link::{RxConsumer, DEFAULT_RX_RING_DEPTH};
use crate::error::{CanBusError, Result};
use crate::physical::{canfd, CanFdDriver};
use crate::types::{CanId, Clock, Config, Timestamp, MAX_FD_PAYLOAD, STD_ID_MASK};
use fanout::{RxCallback, Subscribers, MAX_SUBSCRIBERS};
use fragment::{FragmentHeader, DEFAULT_FRAG_WIRE_LEN};
use log::{debug, warn};
use reassembly::{
    Reassembler, DEFAULT_REASM_MAX_BYTES, DEFAULT_REASM_MAX_FRAGS, DEFAULT_REASM_SLOTS,
    DEFAULT_REASM_TIMEOUT_MS,
};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct CanBusConfig {
    /// Partial messages idle for longer than this are discarded
    pub reassembly_timeout_ms: u32,
    /// Payload size of every fragment frame; must be an exact CAN FD size
    pub frag_wire_len: usize,
}

impl Default for CanBusConfig {
    fn default() -> Self {
        Self {
            reassembly_timeout_ms: DEFAULT_REASM_TIMEOUT_MS,
            frag_wire_len: DEFAULT_FRAG_WIRE_LEN,
        }
    }
}

impl Config for CanBusConfig {
    fn validate(&self) -> Result<()> {
        if self.frag_wire_len > MAX_FD_PAYLOAD || self.frag_wire_len <= FragmentHeader::SIZE {
            return Err(CanBusError::InvalidArgument);
        }
        // A padded fragment would change the receiver's idea of data_cap
        if !canfd::is_valid_fd_len(self.frag_wire_len) {
            return Err(CanBusError::InvalidArgument);
        }
        Ok(())
    }
}

/// Receive-side counters, all monotonically increasing (wrapping)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    /// Frames popped from the ingress ring
    pub frames: u32,
    /// Frames the interrupt dropped because the ring was full
    pub overflows: u32,
    /// Fragments discarded by reassembly
    pub dropped: u32,
    /// Partial messages evicted under pool pressure
    pub evicted: u32,
    /// Partial messages discarded after the reassembly timeout
    pub expired: u32,
    /// Messages handed to subscribers
    pub delivered: u32,
}

/// One CAN FD bus: transmit path, reassembly pool and subscriber table.
///
/// Capacities are fixed at build time:
/// - `N`: depth of the ingress ring the consumer half belongs to
/// - `SLOTS`: messages reassembled concurrently
/// - `MAX_BYTES`: largest message accepted from a peer
/// - `MAX_FRAGS`: most fragments accepted per message
/// - `SUBS`: subscriber table size
pub struct CanBus<
    'r,
    D: CanFdDriver,
    C: Clock,
    const N: usize = DEFAULT_RX_RING_DEPTH,
    const SLOTS: usize = DEFAULT_REASM_SLOTS,
    const MAX_BYTES: usize = DEFAULT_REASM_MAX_BYTES,
    const MAX_FRAGS: usize = DEFAULT_REASM_MAX_FRAGS,
    const SUBS: usize = MAX_SUBSCRIBERS,
> {
    config: CanBusConfig,
    driver: D,
    clock: C,
    rx: RxConsumer<'r, N>,
    reassembler: Reassembler<SLOTS, MAX_BYTES, MAX_FRAGS>,
    subscribers: Subscribers<SUBS>,
    tx_seq: u8,
    rx_frames: u32,
    overflows_seen: u32,
}

impl<'r, D: CanFdDriver, C: Clock, const N: usize> CanBus<'r, D, C, N> {
    /// Validates `config`, arms receive notifications and takes ownership of
    /// the poll-side half of the ingress ring.
    ///
    /// Uses the default pool and subscriber capacities; see
    /// [`CanBus::init_sized`] for other sizes.
    pub fn init(config: CanBusConfig, driver: D, clock: C, rx: RxConsumer<'r, N>) -> Result<Self> {
        Self::init_sized(config, driver, clock, rx)
    }
}

impl<
        'r,
        D: CanFdDriver,
        C: Clock,
        const N: usize,
        const SLOTS: usize,
        const MAX_BYTES: usize,
        const MAX_FRAGS: usize,
        const SUBS: usize,
    > CanBus<'r, D, C, N, SLOTS, MAX_BYTES, MAX_FRAGS, SUBS>
{
    /// Same as [`CanBus::init`], with the capacities taken from the type,
    /// e.g. `CanBus<'_, D, C, 64, 2, 8192, 160>` for two 8 KiB slots.
    pub fn init_sized(config: CanBusConfig, mut driver: D, clock: C, rx: RxConsumer<'r, N>) -> Result<Self> {
        config.validate()?;
        driver.enable_rx_notifications()?;

        debug!(
            "CAN FD transport up: {}-byte fragment frames, {} ms reassembly timeout",
            config.frag_wire_len, config.reassembly_timeout_ms
        );

        let overflows_seen = rx.overflows();
        Ok(Self {
            reassembler: Reassembler::new(config.reassembly_timeout_ms),
            config,
            driver,
            clock,
            rx,
            subscribers: Subscribers::new(),
            tx_seq: 0,
            rx_frames: 0,
            overflows_seen,
        })
    }

    pub fn config(&self) -> &CanBusConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Sends up to 64 bytes as one frame, zero-padded to the next valid
    /// CAN FD size. Longer input is truncated.
    pub fn send_bytes(&mut self, payload: &[u8], id: CanId) -> Result<()> {
        transmit_frame(&mut self.driver, payload, id)
    }

    /// Sends `payload` as a sequence of fragment frames.
    ///
    /// Length and configuration problems are reported before anything is
    /// sent. A driver failure aborts the remaining fragments; the ones
    /// already queued are not recalled.
    pub fn send_large(&mut self, payload: &[u8], id: CanId) -> Result<()> {
        let wire_len = self.config.frag_wire_len;
        let data_cap = fragment::data_capacity(wire_len)?;
        fragment::fragment_count(payload.len(), data_cap)?;

        let seq = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);

        let driver = &mut self.driver;
        fragment::encode_fragments(payload, seq, wire_len, |frame| {
            transmit_frame(&mut *driver, frame, id)
        })
    }

    /// Sends any buffer through the fragmented path, so the receiver sees
    /// the exact length even for short messages.
    pub fn send(&mut self, payload: &[u8], id: CanId) -> Result<()> {
        self.send_large(payload, id)
    }

    pub fn subscribe(&mut self, callback: RxCallback, context: usize) -> Result<()> {
        self.subscribers.subscribe(callback, context)
    }

    pub fn unsubscribe(&mut self, callback: RxCallback, context: usize) -> Result<()> {
        self.subscribers.unsubscribe(callback, context)
    }

    /// Drains the ingress ring: expires stale partial messages, reassembles
    /// and notifies subscribers. Must be called periodically from the one
    /// poll context.
    ///
    /// Returns the number of frames processed.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.poll_at(now)
    }

    fn poll_at(&mut self, now: Timestamp) -> usize {
        self.reassembler.expire_stale(now);

        let overflows = self.rx.overflows();
        if overflows != self.overflows_seen {
            warn!(
                "rx ring overflow: {} oldest frames dropped since last poll",
                overflows.wrapping_sub(self.overflows_seen)
            );
            self.overflows_seen = overflows;
        }

        let subscribers = &self.subscribers;
        let mut processed = 0;
        while let Some(frame) = self.rx.pop() {
            self.reassembler
                .handle_frame(&frame, now, |message| subscribers.notify(message));
            processed += 1;
        }

        self.rx_frames = self.rx_frames.wrapping_add(processed as u32);
        processed
    }

    /// Frames waiting in the ingress ring
    pub fn rx_pending(&self) -> usize {
        self.rx.pending()
    }

    /// Partial messages currently held by the reassembly pool
    pub fn reassembly_in_progress(&self) -> usize {
        self.reassembler.active_slots()
    }

    pub fn stats(&self) -> RxStats {
        let reasm = self.reassembler.stats();
        RxStats {
            frames: self.rx_frames,
            overflows: self.rx.overflows(),
            dropped: reasm.dropped,
            evicted: reasm.evicted,
            expired: reasm.expired,
            delivered: reasm.delivered,
        }
    }
}

/// Submits one frame: clamp to 64 bytes, round up to a CAN FD size, pad
/// with zeros.
fn transmit_frame<D: CanFdDriver>(driver: &mut D, payload: &[u8], id: CanId) -> Result<()> {
    if payload.is_empty() {
        return Err(CanBusError::InvalidArgument);
    }

    let len = payload.len().min(MAX_FD_PAYLOAD);
    let wire_len = canfd::round_up_fd_len(len);
    let dlc = canfd::len_to_dlc(wire_len)?;

    let mut frame = [0u8; MAX_FD_PAYLOAD];
    frame[..len].copy_from_slice(&payload[..len]);

    driver.transmit(id & STD_ID_MASK as CanId, dlc, &frame[..wire_len])
}
