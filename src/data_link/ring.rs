//! Single-producer single-consumer ingress ring for received frames.
//!
//! The producer is the receive interrupt, the consumer is the poll context.
//! When the ring is full the producer drops the oldest unread frame so the
//! newest data always gets in.
//!
//! Protocol:
//! - Empty: `head == tail`
//! - Full: `next(head) == tail` (one slot is always left unused)
//! - Producer: write slot at `head`, release fence, publish `head`
//! - Consumer: observe `head`, acquire fence, copy slot at `tail`, release
//!   fence, advance `tail`
//!
//! The producer also advances `tail` on overflow. Both sides advance `tail`
//! with a compare-exchange, so a consumer that was copying a slot the
//! producer just dropped sees its exchange fail, discards the copy and
//! tries the next one.

use crate::types::RawFrame;
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};

pub const DEFAULT_RX_RING_DEPTH: usize = 64;

pub struct RxRing<const N: usize = DEFAULT_RX_RING_DEPTH> {
    slots: [UnsafeCell<RawFrame>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    overflows: AtomicU32,
}

// SAFETY: slot access is partitioned by the SPSC protocol above. The only
// handles that touch slots are one `RxProducer` and one `RxConsumer`, and
// `split` hands them out against an exclusive borrow.
unsafe impl<const N: usize> Sync for RxRing<N> {}

#[inline]
const fn next<const N: usize>(idx: usize) -> usize {
    if idx + 1 >= N {
        0
    } else {
        idx + 1
    }
}

impl<const N: usize> RxRing<N> {
    const DEPTH_OK: () = assert!(N >= 2, "ring depth must be at least 2");

    /// Creates an empty ring.
    ///
    /// `const`, so the storage can be placed statically. [`split`](Self::split)
    /// needs exclusive access, so an interrupt handler that must own a
    /// `'static` [`RxProducer`] splits a `&'static mut RxRing` (a leaked box,
    /// or a once-initialised static cell).
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::DEPTH_OK;
        Self {
            slots: [const { UnsafeCell::new(RawFrame::EMPTY) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    /// Usable capacity (`N - 1`)
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Resets the ring and hands out its two endpoints
    pub fn split(&mut self) -> (RxProducer<'_, N>, RxConsumer<'_, N>) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.overflows.get_mut() = 0;

        let ring: &RxRing<N> = self;
        (RxProducer { ring }, RxConsumer { ring })
    }

    fn pending(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }
}

impl<const N: usize> Default for RxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-side endpoint
pub struct RxProducer<'a, const N: usize = DEFAULT_RX_RING_DEPTH> {
    ring: &'a RxRing<N>,
}

impl<const N: usize> RxProducer<'_, N> {
    /// Pushes a frame, dropping the oldest unread one if the ring is full.
    ///
    /// Never blocks and never fails.
    pub fn push(&mut self, frame: &RawFrame) {
        let ring = self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let next_head = next::<N>(head);

        let tail = ring.tail.load(Ordering::Acquire);
        if next_head == tail {
            // If this fails the consumer freed the slot in the meantime
            if ring
                .tail
                .compare_exchange(tail, next::<N>(tail), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                ring.overflows.fetch_add(1, Ordering::Relaxed);
            }
        }

        // SAFETY: the slot at `head` is outside `[tail, head)`, so no
        // consumer copy of it can complete its tail exchange.
        unsafe { ring.slots[head].get().write_volatile(*frame) };

        fence(Ordering::Release);
        ring.head.store(next_head, Ordering::Relaxed);
    }

    /// Frames dropped on overflow since `split`
    pub fn overflows(&self) -> u32 {
        self.ring.overflows.load(Ordering::Relaxed)
    }
}

/// Poll-side endpoint
pub struct RxConsumer<'a, const N: usize = DEFAULT_RX_RING_DEPTH> {
    ring: &'a RxRing<N>,
}

impl<const N: usize> RxConsumer<'_, N> {
    /// Pops the oldest frame, or `None` if the ring is empty
    pub fn pop(&mut self) -> Option<RawFrame> {
        let ring = self.ring;
        loop {
            let tail = ring.tail.load(Ordering::Acquire);
            let head = ring.head.load(Ordering::Relaxed);
            if head == tail {
                return None;
            }

            fence(Ordering::Acquire);

            // SAFETY: `tail` was published by the producer (acquire fence
            // above). A concurrent overwrite implies the producer moved
            // `tail` first, which the exchange below detects.
            let frame = unsafe { ring.slots[tail].get().read_volatile() };

            fence(Ordering::Release);
            if ring
                .tail
                .compare_exchange(tail, next::<N>(tail), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(frame);
            }
        }
    }

    /// Frames waiting to be popped
    pub fn pending(&self) -> usize {
        self.ring.pending()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Frames dropped on overflow since `split`
    pub fn overflows(&self) -> u32 {
        self.ring.overflows.load(Ordering::Relaxed)
    }
}
