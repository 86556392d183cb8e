//! In-memory loopback transport.
//!
//! Chunks written by the device are delivered to a [`MemoryPeer`], which can
//! push notifications back and set readable characteristic values.

use crate::error::TransportError;
use crate::transport::{Characteristic, Transport};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Device side of an in-memory link.
pub struct MemoryTransport {
    writes: mpsc::UnboundedSender<Bytes>,
    subscribers: DashMap<Characteristic, mpsc::UnboundedSender<Bytes>>,
    values: DashMap<Characteristic, Bytes>,
    connected: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryTransport {
    /// Creates a connected transport and its peer.
    pub fn pair() -> (Arc<Self>, MemoryPeer) {
        let (writes, written) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            writes,
            subscribers: DashMap::new(),
            values: DashMap::new(),
            connected: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
        });
        let peer = MemoryPeer {
            transport: Arc::clone(&transport),
            written,
        };
        (transport, peer)
    }

    /// Sets the value returned by reads of `characteristic`.
    pub fn set_value(&self, characteristic: Characteristic, value: impl Into<Bytes>) {
        self.values.insert(characteristic, value.into());
    }

    /// Makes every following write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Transport for MemoryTransport {
    async fn write(&self, chunk: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("injected write failure".to_string()));
        }
        self.writes
            .send(chunk)
            .map_err(|_| TransportError::NotConnected)
    }

    async fn subscribe(
        &self,
        characteristic: Characteristic,
        sink: mpsc::UnboundedSender<Bytes>,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.subscribers.insert(characteristic, sink);
        Ok(())
    }

    async fn read(&self, characteristic: Characteristic) -> Result<Bytes, TransportError> {
        self.ensure_connected()?;
        self.values
            .get(&characteristic)
            .map(|v| v.clone())
            .ok_or(TransportError::Unavailable(characteristic))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Peripheral side of an in-memory link.
pub struct MemoryPeer {
    transport: Arc<MemoryTransport>,
    written: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Sends a notification on `characteristic`.
    ///
    /// Returns false if nobody subscribed to it.
    pub fn notify(&self, characteristic: Characteristic, value: impl Into<Bytes>) -> bool {
        match self.transport.subscribers.get(&characteristic) {
            Some(sink) => sink.send(value.into()).is_ok(),
            None => false,
        }
    }

    /// Returns true once the device subscribed to `characteristic`.
    pub fn is_subscribed(&self, characteristic: Characteristic) -> bool {
        self.transport.subscribers.contains_key(&characteristic)
    }

    /// Waits for the next chunk written by the device.
    pub async fn next_write(&mut self, timeout: Duration) -> Option<Bytes> {
        tokio::time::timeout(timeout, self.written.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns a chunk already written by the device, without waiting.
    pub fn try_next_write(&mut self) -> Option<Bytes> {
        self.written.try_recv().ok()
    }

    pub fn transport(&self) -> &Arc<MemoryTransport> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (transport, mut peer) = MemoryTransport::pair();
        transport.write(Bytes::from_static(&[0x01, 0x02])).await.unwrap();

        let chunk = peer.next_write(Duration::from_millis(100)).await.unwrap();
        assert_eq!(chunk.as_ref(), &[0x01, 0x02]);
        assert!(peer.try_next_write().is_none());
    }

    #[tokio::test]
    async fn test_notify_requires_subscription() {
        let (transport, peer) = MemoryTransport::pair();
        assert!(!peer.notify(Characteristic::Battery, vec![80u8]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(Characteristic::Battery, tx).await.unwrap();
        assert!(peer.is_subscribed(Characteristic::Battery));
        assert!(peer.notify(Characteristic::Battery, vec![80u8]));
        assert_eq!(rx.recv().await.unwrap().as_ref(), &[80]);
    }

    #[tokio::test]
    async fn test_read_values() {
        let (transport, _peer) = MemoryTransport::pair();
        assert!(matches!(
            transport.read(Characteristic::Model).await,
            Err(TransportError::Unavailable(Characteristic::Model))
        ));

        transport.set_value(Characteristic::Model, "Approach R10");
        let value = transport.read(Characteristic::Model).await.unwrap();
        assert_eq!(value.as_ref(), b"Approach R10");
    }

    #[tokio::test]
    async fn test_disconnect_and_failures() {
        let (transport, _peer) = MemoryTransport::pair();
        transport.set_fail_writes(true);
        assert!(matches!(
            transport.write(Bytes::from_static(&[0x00])).await,
            Err(TransportError::Write(_))
        ));

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.write(Bytes::from_static(&[0x00])).await,
            Err(TransportError::NotConnected)
        ));
    }
}
