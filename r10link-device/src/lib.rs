//! # r10link-device
//!
//! Launch monitor connection built on [`r10link_protocol`].
//!
//! This crate provides:
//! - [`Transport`]: the capability a BLE link must offer, plus an in-memory
//!   implementation for loopback use
//! - [`Device`]: handshake, correlated protobuf requests and the reader,
//!   processor and writer workers
//! - [`LaunchMonitor`]: the service sequence run after connecting, device
//!   state tracking and alert handling
//! - [`EventBus`]: typed events for observers
//!
//! # Example
//!
//! ```ignore
//! use r10link_device::{Config, LaunchMonitor};
//!
//! let config = Config::load()?;
//! let monitor = LaunchMonitor::connect(transport, codec, &config).await?;
//! let mut events = monitor.events().subscribe().unwrap();
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! ```

pub mod config;
pub mod correlator;
pub mod device;
pub mod error;
pub mod events;
pub mod log;
pub mod memory;
pub mod monitor;
mod pipeline;
pub mod service;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError};
pub use correlator::{Correlation, Correlator};
pub use device::{Device, DeviceDriver, DeviceInfo};
pub use error::{DeviceError, TransportError};
pub use events::{spawn_observer, DeviceEvent, EventBus, EventObserver, EventSubscription};
pub use log::{ComponentLog, LogKind};
pub use memory::{MemoryPeer, MemoryTransport};
pub use monitor::LaunchMonitor;
pub use service::{
    Alert, DeviceFault, DeviceState, ServiceCodec, ServiceRequest, ServiceResponse, Severity,
    ShotConditions, Tilt, WakeStatus,
};
pub use session::Session;
pub use transport::{Characteristic, Transport};
