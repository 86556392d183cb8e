//! Device handle.
//!
//! A [`Device`] owns the link to one launch monitor: the handshake session,
//! the request correlator, the event bus and the worker tasks that move
//! chunks between the transport and the protocol layer.

use crate::config::Config;
use crate::error::DeviceError;
use crate::events::{DeviceEvent, EventBus};
use crate::log::ComponentLog;
use crate::pipeline::{self, Link, Queues};
use crate::transport::{Characteristic, Transport};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use r10link_protocol::{message, Encoder, HandshakeState, MessageClass};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Device-specific logic driven by a [`Device`].
pub trait DeviceDriver: Send + Sync + 'static {
    /// Runs the connection setup sequence.
    fn setup(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Handles the payload of an unsolicited protobuf request. Runs on its
    /// own task; the acknowledgement has already been queued.
    fn handle_request(&self, payload: Bytes) -> impl Future<Output = ()> + Send;
}

/// Values read from the standard GATT services during setup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub serial: Option<String>,
    pub battery: Option<u8>,
}

/// Connection to one launch monitor.
pub struct Device<T: Transport> {
    link: Arc<Link<T>>,
    inbound: mpsc::UnboundedSender<Bytes>,
    battery: mpsc::UnboundedSender<Bytes>,
    queues: Mutex<Option<Queues>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    info: RwLock<DeviceInfo>,
    handshake_timeout: Duration,
    request_timeout: Duration,
    closed: AtomicBool,
    log: ComponentLog,
}

impl<T: Transport> Device<T> {
    /// Creates a device over an already-connected transport. Workers start
    /// with [`Device::start`].
    pub fn new(transport: Arc<T>, config: &Config) -> Self {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (battery, battery_rx) = mpsc::unbounded_channel();

        let link = Link::new(
            transport,
            Encoder::new(config.protocol.max_chunk_size),
            config.protocol.checksum_policy,
            config.timeouts.idle_wait(),
            outbound,
        );

        Self {
            link: Arc::new(link),
            inbound,
            battery,
            queues: Mutex::new(Some(Queues {
                inbound: inbound_rx,
                outbound: outbound_rx,
                battery: battery_rx,
            })),
            workers: Mutex::new(Vec::new()),
            info: RwLock::new(DeviceInfo::default()),
            handshake_timeout: config.timeouts.handshake(),
            request_timeout: config.timeouts.request(),
            closed: AtomicBool::new(false),
            log: ComponentLog::new("device"),
        }
    }

    /// Spawns the worker tasks. Unsolicited requests go to `driver` while it
    /// is alive. Calling this again has no effect.
    pub fn start<H: DeviceDriver>(&self, driver: Weak<H>) {
        let Some(queues) = self.queues.lock().take() else {
            return;
        };
        let handles = pipeline::spawn(Arc::clone(&self.link), queues, driver);
        self.workers.lock().extend(handles);
        self.log.info("workers started");
    }

    /// Reads device information, subscribes to notifications and performs
    /// the handshake.
    pub async fn setup(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.read_info().await;

        if let Err(e) = self
            .link
            .transport
            .subscribe(Characteristic::Battery, self.battery.clone())
            .await
        {
            self.log.error(format_args!(
                "battery notifications unavailable ({}): {}",
                Characteristic::Battery.uuid(),
                e
            ));
        }

        let notifier = Characteristic::InterfaceNotifier;
        if let Err(e) = self
            .link
            .transport
            .subscribe(notifier, self.inbound.clone())
            .await
        {
            self.log.error(format_args!(
                "cannot subscribe to {} ({} in service {}): {}",
                notifier,
                notifier.uuid(),
                notifier.service_uuid(),
                e
            ));
            return Err(e.into());
        }

        if !self.perform_handshake().await? {
            self.log.error("handshake timed out");
            return Err(DeviceError::HandshakeTimeout(self.handshake_timeout));
        }

        self.log.info(format_args!(
            "connected, session header {:#04x}",
            self.link.session.header()
        ));
        Ok(())
    }

    async fn read_info(&self) {
        let model = self.read_string(Characteristic::Model).await;
        let firmware = self.read_string(Characteristic::Firmware).await;
        let serial = self.read_string(Characteristic::Serial).await;
        let battery = match self.link.transport.read(Characteristic::Battery).await {
            Ok(value) => value.first().copied(),
            Err(e) => {
                self.log.error(format_args!(
                    "failed to read battery ({}): {}",
                    Characteristic::Battery.uuid(),
                    e
                ));
                None
            }
        };

        if battery.is_some() {
            *self.link.battery.lock() = battery;
        }

        let info = DeviceInfo {
            model,
            firmware,
            serial,
            battery,
        };
        self.log.info(format_args!(
            "model {}, firmware {}, serial {}",
            info.model.as_deref().unwrap_or("?"),
            info.firmware.as_deref().unwrap_or("?"),
            info.serial.as_deref().unwrap_or("?"),
        ));
        *self.info.write() = info;
    }

    async fn read_string(&self, characteristic: Characteristic) -> Option<String> {
        match self.link.transport.read(characteristic).await {
            Ok(value) => {
                let text = String::from_utf8_lossy(&value);
                Some(text.trim_end_matches('\0').trim().to_string())
            }
            Err(e) => {
                self.log.error(format_args!(
                    "failed to read {} ({}): {}",
                    characteristic,
                    characteristic.uuid(),
                    e
                ));
                None
            }
        }
    }

    /// Sends the handshake request and waits for the peer to assign a
    /// session header. Returns false on timeout.
    ///
    /// Workers must be running, since the reply arrives through the reader.
    pub async fn perform_handshake(&self) -> Result<bool, DeviceError> {
        self.ensure_open()?;
        let request = self.link.session.start();
        self.log.outgoing("handshake request");
        self.link.enqueue(vec![request])?;
        Ok(self.link.session.wait_complete(self.handshake_timeout).await)
    }

    /// Sends a protobuf request and waits for the response carrying the
    /// same counter.
    ///
    /// Requests are issued one at a time. Returns `Ok(None)` when no
    /// matching response arrives within the request timeout.
    pub async fn send_protobuf_request(&self, payload: &[u8]) -> Result<Option<Bytes>, DeviceError> {
        self.ensure_open()?;
        if !self.link.session.is_complete() {
            return Err(DeviceError::HandshakeIncomplete);
        }

        let link = &self.link;
        link.correlator
            .exchange(self.request_timeout, |counter| {
                link.write_message(&message::encode_protobuf_request(counter, payload))?;
                link.events.publish(DeviceEvent::MessageSent {
                    class: MessageClass::ProtobufRequest,
                    counter: Some(counter),
                    len: payload.len(),
                });
                Ok(())
            })
            .await
    }

    /// Frames and queues raw message bytes.
    pub fn write_message(&self, message: &[u8]) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.link.write_message(message)?;
        if message.len() >= 2 {
            self.link.events.publish(DeviceEvent::MessageSent {
                class: MessageClass::from_prefix([message[0], message[1]]),
                counter: None,
                len: message.len(),
            });
        }
        Ok(())
    }

    /// Queues `body` as a single chunk behind the session header, without
    /// framing.
    pub fn send_bytes(&self, body: &[u8]) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let mut chunk = BytesMut::with_capacity(body.len() + 1);
        chunk.put_u8(self.link.session.header());
        chunk.put_slice(body);
        self.link.enqueue(vec![chunk.freeze()])
    }

    pub fn info(&self) -> DeviceInfo {
        self.info.read().clone()
    }

    /// Returns the latest battery level, from setup or a notification.
    pub fn battery(&self) -> Option<u8> {
        *self.link.battery.lock()
    }

    pub fn events(&self) -> &EventBus {
        &self.link.events
    }

    /// Returns the negotiated session header.
    pub fn session_header(&self) -> Option<u8> {
        match self.link.session.state() {
            HandshakeState::Complete { header } => Some(header),
            _ => None,
        }
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.link.session.state()
    }

    /// Returns the counter the next protobuf request will carry.
    pub fn counter(&self) -> u16 {
        self.link.correlator.counter()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops the workers, fails any outstanding request, closes the event
    /// bus and disconnects. Calling this again has no effect.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.log.info("shutting down");
        self.link.stop.set();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                self.log.error(format_args!("worker failed: {}", e));
            }
        }

        self.link.correlator.cancel();
        self.link.events.close();
        self.link.session.invalidate();

        if let Err(e) = self.link.transport.disconnect().await {
            self.log.error(format_args!("disconnect failed: {}", e));
        }
        self.log.info("shut down");
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DeviceError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl<T: Transport> Drop for Device<T> {
    fn drop(&mut self) {
        self.link.stop.set();
        self.link.correlator.cancel();
        self.link.events.close();
    }
}
