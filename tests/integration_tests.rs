use canfd_link::canfd;
use canfd_link::error::{CanBusError, Result};
use canfd_link::physical::CanFdDriver;
use canfd_link::transport::{CanBus, CanBusConfig};
use canfd_link::types::{CanId, Clock, RxHeader, Timestamp, MAX_FD_PAYLOAD};
use canfd_link::{RxProducer, RxRing};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

type WireFrame = (RxHeader, [u8; MAX_FD_PAYLOAD]);

/// Shared medium: whatever one node transmits, any clone can receive
#[derive(Clone, Default)]
struct Wire {
    frames: Arc<Mutex<VecDeque<WireFrame>>>,
}

impl Wire {
    fn take_all(&self) -> Vec<WireFrame> {
        self.frames.lock().unwrap().drain(..).collect()
    }

    fn put(&self, frame: WireFrame) {
        self.frames.lock().unwrap().push_back(frame);
    }
}

impl CanFdDriver for Wire {
    fn transmit(&mut self, id: CanId, dlc: u8, data: &[u8]) -> Result<()> {
        assert_eq!(canfd::dlc_to_len(dlc), data.len());
        let mut buf = [0u8; MAX_FD_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        self.put((RxHeader { id: id as u32, dlc }, buf));
        Ok(())
    }

    fn frames_available(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn receive_next(&mut self, data: &mut [u8; MAX_FD_PAYLOAD]) -> Option<RxHeader> {
        let (header, buf) = self.frames.lock().unwrap().pop_front()?;
        *data = buf;
        Some(header)
    }

    fn enable_rx_notifications(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct TestClock(Arc<AtomicU32>);

impl TestClock {
    fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

static RECEIVED: Mutex<Vec<(usize, Vec<u8>)>> = Mutex::new(Vec::new());

fn on_message(payload: &[u8], context: usize) {
    RECEIVED
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((context, payload.to_vec()));
}

fn received(context: usize) -> Vec<Vec<u8>> {
    RECEIVED
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter(|(ctx, _)| *ctx == context)
        .map(|(_, msg)| msg.clone())
        .collect()
}

#[test]
fn test_two_nodes_exchange_messages() {
    let wire = Wire::default();

    let mut tx_ring: RxRing = RxRing::new();
    let (_tx_isr, tx_rx) = tx_ring.split();
    let mut sender = CanBus::init(CanBusConfig::default(), wire.clone(), TestClock::default(), tx_rx).unwrap();

    let mut rx_ring: RxRing = RxRing::new();
    let (mut isr, rx) = rx_ring.split();
    let mut receiver = CanBus::init(CanBusConfig::default(), wire.clone(), TestClock::default(), rx).unwrap();
    receiver.subscribe(on_message, 1).unwrap();

    let sizes = [1usize, 55, 56, 57, 112, 113, 1000, 2048];
    let messages: Vec<Vec<u8>> = sizes
        .iter()
        .map(|&len| (0..len).map(|i| (i % 251) as u8).collect())
        .collect();

    for message in &messages {
        sender.send_large(message, 0x3).unwrap();
        isr.on_rx_interrupt(&mut wire.clone());
        receiver.poll();
    }
    sender.send_bytes(b"raw", 0x3).unwrap();
    isr.on_rx_interrupt(&mut wire.clone());
    receiver.poll();

    let mut expected = messages.clone();
    expected.push(b"raw".to_vec());
    assert_eq!(received(1), expected);
    assert_eq!(receiver.stats().delivered as usize, expected.len());
}

/// Puts one frame on the receiver's wire, runs its interrupt and polls one
/// millisecond later than the previous step
fn step(
    frame: &WireFrame,
    inbound: &Wire,
    isr: &mut RxProducer<'_>,
    clock: &TestClock,
    now: &mut Timestamp,
    receiver: &mut CanBus<'_, Wire, TestClock>,
) {
    inbound.put(*frame);
    isr.on_rx_interrupt(&mut inbound.clone());
    clock.set(*now);
    *now += 1;
    receiver.poll();
}

#[test]
fn test_pool_pressure_evicts_least_recent_source() {
    const SOURCES: usize = 5;

    let mut rings: Vec<RxRing> = (0..SOURCES).map(|_| RxRing::new()).collect();
    let mut outboxes = Vec::new();
    let mut senders = Vec::new();
    for ring in rings.iter_mut() {
        let (_isr, rx) = ring.split();
        let wire = Wire::default();
        outboxes.push(wire.clone());
        senders.push(CanBus::init(CanBusConfig::default(), wire, TestClock::default(), rx).unwrap());
    }

    // Each source queues one 3-fragment message
    let fragments: Vec<Vec<WireFrame>> = senders
        .iter_mut()
        .zip(&outboxes)
        .enumerate()
        .map(|(i, (bus, outbox))| {
            bus.send_large(&[i as u8 + 1; 150], 0x100 + i as CanId).unwrap();
            outbox.take_all()
        })
        .collect();
    assert!(fragments.iter().all(|f| f.len() == 3));

    let inbound = Wire::default();
    let clock = TestClock::default();
    let mut ring: RxRing = RxRing::new();
    let (mut isr, rx) = ring.split();
    let mut receiver = CanBus::init(CanBusConfig::default(), inbound.clone(), clock.clone(), rx).unwrap();
    receiver.subscribe(on_message, 2).unwrap();

    let mut now = 0;
    for per_source in &fragments {
        step(&per_source[0], &inbound, &mut isr, &clock, &mut now, &mut receiver);
    }
    // First fragments of all five: the fifth evicted source 0
    assert_eq!(receiver.stats().evicted, 1);

    for per_source in fragments.iter().skip(1) {
        step(&per_source[1], &inbound, &mut isr, &clock, &mut now, &mut receiver);
        step(&per_source[2], &inbound, &mut isr, &clock, &mut now, &mut receiver);
    }
    step(&fragments[0][1], &inbound, &mut isr, &clock, &mut now, &mut receiver);
    step(&fragments[0][2], &inbound, &mut isr, &clock, &mut now, &mut receiver);

    let firsts: Vec<u8> = received(2).iter().map(|m| m[0]).collect();
    assert_eq!(firsts, vec![2, 3, 4, 5]);
    assert!(received(2).iter().all(|m| m.len() == 150));
    assert_eq!(receiver.reassembly_in_progress(), 1);
}

#[test]
fn test_lost_fragment_times_out() {
    let wire = Wire::default();
    let clock = TestClock::default();

    let mut tx_ring: RxRing = RxRing::new();
    let (_tx_isr, tx_rx) = tx_ring.split();
    let mut sender = CanBus::init(CanBusConfig::default(), wire.clone(), TestClock::default(), tx_rx).unwrap();

    let mut rx_ring: RxRing = RxRing::new();
    let (mut isr, rx) = rx_ring.split();
    let mut receiver = CanBus::init(CanBusConfig::default(), wire.clone(), clock.clone(), rx).unwrap();
    receiver.subscribe(on_message, 3).unwrap();

    sender.send_large(&[0xAB; 300], 0x7).unwrap();
    let mut frames = wire.take_all();
    frames.remove(2);
    for frame in frames {
        wire.put(frame);
    }
    isr.on_rx_interrupt(&mut wire.clone());
    receiver.poll();
    assert_eq!(receiver.reassembly_in_progress(), 1);

    clock.set(251);
    receiver.poll();
    assert_eq!(receiver.reassembly_in_progress(), 0);
    assert_eq!(receiver.stats().expired, 1);

    // The next message from the same source is unaffected
    sender.send_large(&[0xCD; 300], 0x7).unwrap();
    isr.on_rx_interrupt(&mut wire.clone());
    receiver.poll();
    assert_eq!(received(3), vec![vec![0xCD; 300]]);
}

#[test]
fn test_subscription_errors() {
    let mut ring: RxRing = RxRing::new();
    let (_isr, rx) = ring.split();
    let mut bus = CanBus::init(CanBusConfig::default(), Wire::default(), TestClock::default(), rx).unwrap();

    for ctx in 100..108 {
        bus.subscribe(on_message, ctx).unwrap();
    }
    assert_eq!(bus.subscribe(on_message, 100), Err(CanBusError::Duplicate));
    assert_eq!(
        bus.subscribe(on_message, 200),
        Err(CanBusError::CapacityExceeded)
    );
    assert_eq!(bus.unsubscribe(on_message, 200), Err(CanBusError::NotFound));
    assert_eq!(bus.unsubscribe(on_message, 100), Ok(()));
    assert_eq!(bus.subscribe(on_message, 200), Ok(()));
}
