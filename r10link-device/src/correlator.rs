//! Single-outstanding request correlation.
//!
//! A request installs a oneshot waiter tagged with the current counter. The
//! processor hands a response payload to the waiter only when the response
//! carries that counter; the counter advances on every delivered response.

use crate::error::DeviceError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of offering a response to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Delivered to the waiting request.
    Accepted,
    /// A request is outstanding with a different counter.
    Stale { outstanding: u16 },
    /// No request is outstanding.
    Unexpected,
}

struct Slot {
    counter: u16,
    waiter: Option<oneshot::Sender<Bytes>>,
}

pub struct Correlator {
    slot: Mutex<Slot>,
    exclusive: tokio::sync::Mutex<()>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_counter(0)
    }

    pub fn with_counter(counter: u16) -> Self {
        Self {
            slot: Mutex::new(Slot {
                counter,
                waiter: None,
            }),
            exclusive: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the counter the next request will carry.
    pub fn counter(&self) -> u16 {
        self.slot.lock().counter
    }

    /// Returns true while a request waits for its response.
    pub fn is_outstanding(&self) -> bool {
        self.slot.lock().waiter.is_some()
    }

    /// Runs one request/response exchange.
    ///
    /// Callers are serialized for the whole exchange. `send` receives the
    /// counter to embed and must enqueue the request. Returns `Ok(None)`
    /// when no matching response arrives within `timeout`; the counter is
    /// then left unchanged.
    pub async fn exchange<F>(&self, timeout: Duration, send: F) -> Result<Option<Bytes>, DeviceError>
    where
        F: FnOnce(u16) -> Result<(), DeviceError>,
    {
        let _turn = self.exclusive.lock().await;

        let (tx, rx) = oneshot::channel();
        let counter = {
            let mut slot = self.slot.lock();
            slot.waiter = Some(tx);
            slot.counter
        };

        if let Err(e) = send(counter) {
            self.abandon();
            return Err(e);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        match result {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(_)) => Err(DeviceError::ShutDown),
            Err(_) => {
                self.abandon();
                tracing::warn!(counter, "no response within {:?}", timeout);
                Ok(None)
            }
        }
    }

    /// Offers a response payload carrying `counter`.
    pub fn complete(&self, counter: u16, payload: Bytes) -> Correlation {
        let mut slot = self.slot.lock();
        if slot.waiter.is_none() {
            return Correlation::Unexpected;
        }
        if slot.counter != counter {
            return Correlation::Stale {
                outstanding: slot.counter,
            };
        }

        let delivered = slot
            .waiter
            .take()
            .is_some_and(|waiter| waiter.send(payload).is_ok());
        if delivered {
            slot.counter = slot.counter.wrapping_add(1);
            Correlation::Accepted
        } else {
            // The requester gave up between timing out and clearing the slot.
            Correlation::Unexpected
        }
    }

    /// Fails the outstanding request, if any.
    pub fn cancel(&self) {
        self.slot.lock().waiter = None;
    }

    fn abandon(&self) {
        self.slot.lock().waiter = None;
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_matching_response_completes_request() {
        let correlator = Arc::new(Correlator::with_counter(41));
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();

        let request = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .exchange(Duration::from_secs(2), |counter| {
                        sent_tx.send(counter).unwrap();
                        Ok(())
                    })
                    .await
            })
        };

        let counter = sent_rx.recv().await.unwrap();
        assert_eq!(counter, 41);
        assert_eq!(
            correlator.complete(41, Bytes::from_static(b"pong")),
            Correlation::Accepted
        );

        let payload = request.await.unwrap().unwrap();
        assert_eq!(payload, Some(Bytes::from_static(b"pong")));
        assert_eq!(correlator.counter(), 42);
        assert!(!correlator.is_outstanding());
    }

    #[tokio::test]
    async fn test_stale_response_dropped_then_timeout() {
        let correlator = Arc::new(Correlator::with_counter(7));
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();

        let request = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .exchange(Duration::from_millis(100), |counter| {
                        sent_tx.send(counter).unwrap();
                        Ok(())
                    })
                    .await
            })
        };

        sent_rx.recv().await.unwrap();
        assert_eq!(
            correlator.complete(6, Bytes::from_static(b"old")),
            Correlation::Stale { outstanding: 7 }
        );

        assert_eq!(request.await.unwrap().unwrap(), None);
        assert_eq!(correlator.counter(), 7);
        assert!(!correlator.is_outstanding());
    }

    #[test]
    fn test_response_without_request() {
        let correlator = Correlator::new();
        assert_eq!(
            correlator.complete(0, Bytes::from_static(b"x")),
            Correlation::Unexpected
        );
        assert_eq!(correlator.counter(), 0);
    }

    #[tokio::test]
    async fn test_counter_wraps() {
        let correlator = Arc::new(Correlator::with_counter(u16::MAX));
        let responder = Arc::clone(&correlator);

        let payload = correlator
            .exchange(Duration::from_secs(1), move |counter| {
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    responder.complete(counter, Bytes::from_static(b"ok"));
                });
                Ok(())
            })
            .await
            .unwrap();

        assert!(payload.is_some());
        assert_eq!(correlator.counter(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_clears_slot() {
        let correlator = Correlator::new();
        let result = correlator
            .exchange(Duration::from_secs(1), |_| Err(DeviceError::HandshakeIncomplete))
            .await;

        assert!(matches!(result, Err(DeviceError::HandshakeIncomplete)));
        assert!(!correlator.is_outstanding());
        assert_eq!(correlator.counter(), 0);
    }

    #[tokio::test]
    async fn test_cancel_fails_outstanding_request() {
        let correlator = Arc::new(Correlator::new());
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();

        let request = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .exchange(Duration::from_secs(5), |counter| {
                        sent_tx.send(counter).unwrap();
                        Ok(())
                    })
                    .await
            })
        };

        sent_rx.recv().await.unwrap();
        correlator.cancel();
        assert!(matches!(
            request.await.unwrap(),
            Err(DeviceError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_requests_are_serialized() {
        let correlator = Arc::new(Correlator::new());
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel::<u16>();

        let mut requests = Vec::new();
        for _ in 0..3 {
            let correlator = Arc::clone(&correlator);
            let sent_tx = sent_tx.clone();
            requests.push(tokio::spawn(async move {
                correlator
                    .exchange(Duration::from_secs(2), move |counter| {
                        sent_tx.send(counter).unwrap();
                        Ok(())
                    })
                    .await
            }));
        }

        for expected in 0..3u16 {
            let counter = sent_rx.recv().await.unwrap();
            assert_eq!(counter, expected);
            // Only one request is in flight at a time.
            assert!(sent_rx.try_recv().is_err());
            assert_eq!(
                correlator.complete(counter, Bytes::from(vec![counter as u8])),
                Correlation::Accepted
            );
        }

        for request in requests {
            assert!(request.await.unwrap().unwrap().is_some());
        }
        assert_eq!(correlator.counter(), 3);
    }
}
