//! CAN FD transport for telemetry nodes.
//!
//! Moves byte buffers between a receive interrupt and a cooperative poll
//! context, fragmenting buffers larger than one frame and reassembling them
//! on the receiving side. All storage is fixed-size; nothing on the receive
//! path allocates.
//!
//! ```rust,no_run
//! use canfd_link::data_link::RxRing;
//! use canfd_link::transport::{CanBus, CanBusConfig};
//! use canfd_link::types::StdClock;
//! # use canfd_link::physical::CanFdDriver;
//! # fn run<D: CanFdDriver + Clone>(driver: D) -> canfd_link::error::Result<()> {
//!
//! fn on_message(payload: &[u8], _context: usize) {
//!     println!("{} bytes", payload.len());
//! }
//!
//! let mut ring: RxRing = RxRing::new();
//! let (mut isr, rx) = ring.split();
//! let mut bus = CanBus::init(CanBusConfig::default(), driver.clone(), StdClock::new(), rx)?;
//! bus.subscribe(on_message, 0)?;
//! bus.send_large(&[0u8; 500], 0x123)?;
//!
//! // From the receive interrupt:
//! isr.on_rx_interrupt(&mut driver.clone());
//! // From the poll loop:
//! bus.poll();
//! # Ok(())
//! # }
//! ```

// OSI Layer modules
pub mod data_link; // Interrupt-to-poll frame ring
pub mod physical; // Controller interface, CAN FD length codec
pub mod transport; // Fragmentation, reassembly, fanout

// Re-exports for convenience
pub use data_link::{RxConsumer, RxProducer, RxRing};
pub use physical::{canfd, CanFdDriver};
pub use transport::{CanBus, CanBusConfig};

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
