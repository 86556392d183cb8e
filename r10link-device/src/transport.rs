//! Transport capability.
//!
//! Connecting and pairing happen outside this crate. A transport hands the
//! device an already-connected link that can write chunks to the interface
//! writer, forward notifications, read characteristics and disconnect.

use crate::error::TransportError;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

/// GATT characteristics used by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Device-interface notifier; carries inbound chunks.
    InterfaceNotifier,
    /// Device-interface writer; receives outbound chunks.
    InterfaceWriter,
    Battery,
    Model,
    Firmware,
    Serial,
}

impl Characteristic {
    /// Returns the characteristic UUID.
    pub fn uuid(&self) -> &'static str {
        match self {
            Characteristic::InterfaceNotifier => "6a4e2812-667b-11e3-949a-0800200c9a66",
            Characteristic::InterfaceWriter => "6a4e2822-667b-11e3-949a-0800200c9a66",
            Characteristic::Battery => "00002a19-0000-1000-8000-00805f9b34fb",
            Characteristic::Model => "00002a24-0000-1000-8000-00805f9b34fb",
            Characteristic::Firmware => "00002a28-0000-1000-8000-00805f9b34fb",
            Characteristic::Serial => "00002a25-0000-1000-8000-00805f9b34fb",
        }
    }

    /// Returns the UUID of the service owning the characteristic.
    pub fn service_uuid(&self) -> &'static str {
        match self {
            Characteristic::InterfaceNotifier | Characteristic::InterfaceWriter => {
                "6a4e2800-667b-11e3-949a-0800200c9a66"
            }
            Characteristic::Battery => "0000180f-0000-1000-8000-00805f9b34fb",
            Characteristic::Model | Characteristic::Firmware | Characteristic::Serial => {
                "0000180a-0000-1000-8000-00805f9b34fb"
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Characteristic::InterfaceNotifier => "interface-notifier",
            Characteristic::InterfaceWriter => "interface-writer",
            Characteristic::Battery => "battery",
            Characteristic::Model => "model",
            Characteristic::Firmware => "firmware",
            Characteristic::Serial => "serial",
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected BLE link.
///
/// Implementations resolve each [`Characteristic`] through
/// [`Characteristic::service_uuid`] and [`Characteristic::uuid`].
pub trait Transport: Send + Sync + 'static {
    /// Writes one chunk to the interface writer.
    fn write(&self, chunk: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Starts notifications on `characteristic`, forwarding each value to
    /// `sink` in arrival order.
    fn subscribe(
        &self,
        characteristic: Characteristic,
        sink: mpsc::UnboundedSender<Bytes>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reads the current value of `characteristic`.
    fn read(
        &self,
        characteristic: Characteristic,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn is_connected(&self) -> bool;
}
