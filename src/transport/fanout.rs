//! Subscriber fanout for received messages.

use crate::error::{CanBusError, Result};

pub const MAX_SUBSCRIBERS: usize = 8;

/// Receive callback: `(payload, context)`.
///
/// Runs inside `poll()`, so it must neither block nor allocate. The payload
/// view is only valid for the duration of the call.
pub type RxCallback = fn(&[u8], usize);

#[derive(Debug, Clone, Copy)]
struct Subscriber {
    callback: RxCallback,
    context: usize,
}

impl Subscriber {
    fn matches(&self, callback: RxCallback, context: usize) -> bool {
        self.callback as usize == callback as usize && self.context == context
    }
}

/// Fixed-capacity registry of `(callback, context)` pairs
#[derive(Debug)]
pub struct Subscribers<const N: usize = MAX_SUBSCRIBERS> {
    entries: [Option<Subscriber>; N],
}

impl<const N: usize> Subscribers<N> {
    pub const fn new() -> Self {
        Self { entries: [None; N] }
    }

    /// Registers a pair in the first free entry
    pub fn subscribe(&mut self, callback: RxCallback, context: usize) -> Result<()> {
        if self.contains(callback, context) {
            return Err(CanBusError::Duplicate);
        }
        let free = self
            .entries
            .iter_mut()
            .find(|e| e.is_none())
            .ok_or(CanBusError::CapacityExceeded)?;
        *free = Some(Subscriber { callback, context });
        Ok(())
    }

    /// Removes the exact pair
    pub fn unsubscribe(&mut self, callback: RxCallback, context: usize) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.is_some_and(|s| s.matches(callback, context)))
            .ok_or(CanBusError::NotFound)?;
        *entry = None;
        Ok(())
    }

    pub fn contains(&self, callback: RxCallback, context: usize) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|s| s.matches(callback, context))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every registered callback, in table order, with `payload`
    pub fn notify(&self, payload: &[u8]) {
        for sub in self.entries.iter().flatten() {
            (sub.callback)(payload, sub.context);
        }
    }
}

impl<const N: usize> Default for Subscribers<N> {
    fn default() -> Self {
        Self::new()
    }
}
