//! Reassembly of fragmented messages.
//!
//! A fixed pool of slots, addressed by index, each holding one in-flight
//! message. At most one slot is active per source identifier. Fragments may
//! arrive in any order; duplicates are ignored. Any protocol inconsistency
//! drops the frame (and possibly the partial message) without reporting an
//! error, the transport is best-effort.

use super::fragment::FragmentHeader;
use crate::types::{CanId, RawFrame, Timestamp};
use log::{debug, trace};

pub const DEFAULT_REASM_SLOTS: usize = 4;
pub const DEFAULT_REASM_MAX_BYTES: usize = 2048;
pub const DEFAULT_REASM_MAX_FRAGS: usize = 64;
pub const DEFAULT_REASM_TIMEOUT_MS: u32 = 250;

/// What happened to a frame handed to [`Reassembler::handle_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A message (single-frame or just completed) was delivered
    Delivered,
    /// Fragment stored, message still incomplete
    Buffered,
    /// Fragment index already received
    Duplicate,
    /// Frame discarded
    Dropped,
}

/// Counters kept by the reassembly engine. They wrap on overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub dropped: u32,
    pub evicted: u32,
    pub expired: u32,
    pub restarted: u32,
    pub delivered: u32,
}

#[derive(Debug)]
struct Slot<const MAX_BYTES: usize> {
    active: bool,
    id: CanId,
    seq: u8,
    frag_cnt: u8,
    total_len: u16,
    // Fixed by the first fragment received for the message
    data_cap: u8,
    last_update: Timestamp,
    received: [u64; 4],
    received_count: u16,
    buf: [u8; MAX_BYTES],
}

impl<const MAX_BYTES: usize> Slot<MAX_BYTES> {
    fn new() -> Self {
        Self {
            active: false,
            id: 0,
            seq: 0,
            frag_cnt: 0,
            total_len: 0,
            data_cap: 0,
            last_update: 0,
            received: [0; 4],
            received_count: 0,
            buf: [0; MAX_BYTES],
        }
    }

    // Buffer contents are left stale, nothing reads past what was written
    fn reset(&mut self) {
        self.active = false;
        self.id = 0;
        self.seq = 0;
        self.frag_cnt = 0;
        self.total_len = 0;
        self.data_cap = 0;
        self.last_update = 0;
        self.received = [0; 4];
        self.received_count = 0;
    }

    fn begin(&mut self, id: CanId, seq: u8, now: Timestamp) {
        self.reset();
        self.active = true;
        self.id = id;
        self.seq = seq;
        self.last_update = now;
    }

    fn age(&self, now: Timestamp) -> u32 {
        now.wrapping_sub(self.last_update)
    }

    fn is_received(&self, idx: u8) -> bool {
        let (word, bit) = (idx as usize / 64, idx as usize % 64);
        (self.received[word] >> bit) & 1 != 0
    }

    fn mark_received(&mut self, idx: u8) {
        let (word, bit) = (idx as usize / 64, idx as usize % 64);
        self.received[word] |= 1u64 << bit;
        self.received_count += 1;
    }
}

/// Reassembly engine with `SLOTS` slots of `MAX_BYTES` bytes, accepting
/// messages of at most `MAX_FRAGS` fragments.
pub struct Reassembler<
    const SLOTS: usize = DEFAULT_REASM_SLOTS,
    const MAX_BYTES: usize = DEFAULT_REASM_MAX_BYTES,
    const MAX_FRAGS: usize = DEFAULT_REASM_MAX_FRAGS,
> {
    slots: [Slot<MAX_BYTES>; SLOTS],
    timeout_ms: u32,
    stats: ReassemblyStats,
}

impl<const SLOTS: usize, const MAX_BYTES: usize, const MAX_FRAGS: usize>
    Reassembler<SLOTS, MAX_BYTES, MAX_FRAGS>
{
    const POOL_OK: () = assert!(SLOTS > 0, "reassembly pool needs at least one slot");

    pub fn new(timeout_ms: u32) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::POOL_OK;
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
            timeout_ms,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Number of messages currently being reassembled
    pub fn active_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Discards every partial message older than the timeout.
    ///
    /// Returns the number of slots freed. Subscribers are not told.
    pub fn expire_stale(&mut self, now: Timestamp) -> usize {
        let mut expired = 0;
        for slot in self.slots.iter_mut().filter(|s| s.active) {
            if slot.age(now) > self.timeout_ms {
                debug!(
                    "reassembly of id {:#05x} seq {} timed out ({}/{} fragments)",
                    slot.id, slot.seq, slot.received_count, slot.frag_cnt
                );
                slot.reset();
                expired += 1;
            }
        }
        self.stats.expired = self.stats.expired.wrapping_add(expired as u32);
        expired
    }

    /// Feeds one received frame through the fragmentation protocol.
    ///
    /// Frames without a fragment header are delivered as they are. A
    /// fragment that completes its message causes the whole message to be
    /// delivered. `deliver` runs synchronously and at most once.
    ///
    /// The first fragment received for a message fixes its `data_cap`, and
    /// fragment `i` lands at `i * data_cap`. Each copy is clipped to
    /// `data_cap` as well as to `total_len`, so a later fragment carrying
    /// more payload than the first cannot overwrite its neighbour's range.
    pub fn handle_frame<F>(&mut self, frame: &RawFrame, now: Timestamp, mut deliver: F) -> Disposition
    where
        F: FnMut(&[u8]),
    {
        let Some(header) = FragmentHeader::decode(frame.payload()) else {
            deliver(frame.payload());
            self.stats.delivered = self.stats.delivered.wrapping_add(1);
            return Disposition::Delivered;
        };

        if !Self::header_valid(&header) {
            trace!("dropping malformed fragment from {:#05x}: {:?}", frame.id, header);
            return self.drop_frame();
        }

        let payload = &frame.payload()[FragmentHeader::SIZE..];
        let idx = self.claim_slot(frame.id, header.seq, now);
        let slot = &mut self.slots[idx];

        if slot.frag_cnt == 0 {
            if payload.is_empty() {
                slot.reset();
                trace!("dropping empty first fragment from {:#05x}", frame.id);
                return self.drop_frame();
            }
            slot.frag_cnt = header.frag_cnt;
            slot.total_len = header.total_len;
            slot.data_cap = payload.len() as u8;
        } else if slot.frag_cnt != header.frag_cnt || slot.total_len != header.total_len {
            debug!(
                "fragment of id {:#05x} seq {} disagrees with message ({}/{} vs {}/{}), abandoning",
                frame.id, header.seq, header.frag_cnt, header.total_len, slot.frag_cnt, slot.total_len
            );
            slot.reset();
            return self.drop_frame();
        }

        let total = slot.total_len as usize;
        let offset = header.frag_idx as usize * slot.data_cap as usize;
        if offset >= total {
            trace!("fragment {} of {:#05x} lands past the message end", header.frag_idx, frame.id);
            return self.drop_frame();
        }

        slot.last_update = now;
        if slot.is_received(header.frag_idx) {
            return Disposition::Duplicate;
        }

        let take = payload.len().min(slot.data_cap as usize).min(total - offset);
        slot.buf[offset..offset + take].copy_from_slice(&payload[..take]);
        slot.mark_received(header.frag_idx);

        if slot.received_count == slot.frag_cnt as u16 {
            deliver(&slot.buf[..total]);
            slot.reset();
            self.stats.delivered = self.stats.delivered.wrapping_add(1);
            Disposition::Delivered
        } else {
            Disposition::Buffered
        }
    }

    fn header_valid(header: &FragmentHeader) -> bool {
        header.frag_cnt != 0
            && header.frag_idx < header.frag_cnt
            && header.frag_cnt as usize <= MAX_FRAGS
            && header.total_len != 0
            && header.total_len as usize <= MAX_BYTES
    }

    fn drop_frame(&mut self) -> Disposition {
        self.stats.dropped = self.stats.dropped.wrapping_add(1);
        Disposition::Dropped
    }

    /// Finds the slot for `(id, seq)`, starting a new message if needed.
    ///
    /// Order: the active slot for `id` (restarted if `seq` moved on), then
    /// the first free slot, then the least recently updated slot.
    fn claim_slot(&mut self, id: CanId, seq: u8, now: Timestamp) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| s.active && s.id == id) {
            let slot = &mut self.slots[idx];
            if slot.seq != seq {
                debug!(
                    "id {:#05x} moved to seq {} with seq {} incomplete ({}/{}), restarting",
                    id, seq, slot.seq, slot.received_count, slot.frag_cnt
                );
                slot.begin(id, seq, now);
                self.stats.restarted = self.stats.restarted.wrapping_add(1);
            } else {
                slot.last_update = now;
            }
            return idx;
        }

        if let Some(idx) = self.slots.iter().position(|s| !s.active) {
            self.slots[idx].begin(id, seq, now);
            return idx;
        }

        // Ties go to the highest index
        let idx = (0..SLOTS)
            .max_by_key(|&i| self.slots[i].age(now))
            .unwrap_or(0);
        debug!(
            "reassembly pool full, evicting id {:#05x} seq {} for id {:#05x}",
            self.slots[idx].id, self.slots[idx].seq, id
        );
        self.slots[idx].begin(id, seq, now);
        self.stats.evicted = self.stats.evicted.wrapping_add(1);
        idx
    }
}
