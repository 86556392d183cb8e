//! Reader, processor and writer workers.
//!
//! ```text
//! transport ──chunks──> Reader ──messages──> Processor ──acks──┐
//!                                                 │            │
//!                              correlator / driver┘            v
//! transport <──────────── Writer <────────── outbound chunks ──┘
//! ```
//!
//! Each worker handles one queue in FIFO order. Idle waits are bounded and
//! also end when the stop signal fires; the stop flag is checked on every
//! iteration.

use crate::correlator::Correlation;
use crate::correlator::Correlator;
use crate::device::DeviceDriver;
use crate::error::DeviceError;
use crate::events::{DeviceEvent, EventBus};
use crate::log::{ComponentLog, LogKind};
use crate::session::Session;
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::Mutex;
use r10link_protocol::{ChecksumPolicy, Decoder, Encoder, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Cooperative cancellation shared by the workers.
pub(crate) struct Stop {
    flag: AtomicBool,
    notify: Notify,
}

impl Stop {
    fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// State shared by the device handle and its workers.
pub(crate) struct Link<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) session: Session,
    pub(crate) correlator: Correlator,
    pub(crate) events: EventBus,
    pub(crate) battery: Mutex<Option<u8>>,
    pub(crate) stop: Stop,
    encoder: Encoder,
    policy: ChecksumPolicy,
    idle_wait: Duration,
    outbound: Mutex<mpsc::UnboundedSender<Bytes>>,
    log: ComponentLog,
}

impl<T: Transport> Link<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        encoder: Encoder,
        policy: ChecksumPolicy,
        idle_wait: Duration,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            transport,
            session: Session::new(),
            correlator: Correlator::new(),
            events: EventBus::new(),
            battery: Mutex::new(None),
            stop: Stop::new(),
            encoder,
            policy,
            idle_wait,
            outbound: Mutex::new(outbound),
            log: ComponentLog::new("link"),
        }
    }

    /// Queues a chunk set for the writer. The set is never interleaved
    /// with another one.
    pub(crate) fn enqueue(&self, chunks: Vec<Bytes>) -> Result<(), DeviceError> {
        if self.stop.is_set() {
            return Err(DeviceError::ShutDown);
        }

        let outbound = self.outbound.lock();
        for chunk in chunks {
            outbound.send(chunk).map_err(|_| DeviceError::ShutDown)?;
        }
        Ok(())
    }

    /// Frames `message` with the session header and queues its chunks.
    pub(crate) fn write_message(&self, message: &[u8]) -> Result<(), DeviceError> {
        self.log.bytes(LogKind::Outgoing, "raw", message);
        let chunks = self.encoder.encode(message, self.session.header())?;
        self.enqueue(chunks)
    }

    /// Queues the acknowledgement for an inbound message.
    pub(crate) fn acknowledge(&self, message: &Message) -> Result<(), DeviceError> {
        let chunks = self.encoder.encode_ack(message, self.session.header())?;
        self.log.outgoing(format_args!("ack for {}", message.class()));
        self.enqueue(chunks)
    }
}

/// Receiving ends of the device queues, consumed when the workers start.
pub(crate) struct Queues {
    pub(crate) inbound: mpsc::UnboundedReceiver<Bytes>,
    pub(crate) outbound: mpsc::UnboundedReceiver<Bytes>,
    pub(crate) battery: mpsc::UnboundedReceiver<Bytes>,
}

/// Starts the reader, processor, writer and battery workers.
pub(crate) fn spawn<T: Transport, H: DeviceDriver>(
    link: Arc<Link<T>>,
    queues: Queues,
    driver: Weak<H>,
) -> Vec<JoinHandle<()>> {
    let (messages_tx, messages_rx) = mpsc::unbounded_channel();
    vec![
        tokio::spawn(run_reader(Arc::clone(&link), queues.inbound, messages_tx)),
        tokio::spawn(run_processor(Arc::clone(&link), messages_rx, driver)),
        tokio::spawn(run_writer(Arc::clone(&link), queues.outbound)),
        tokio::spawn(run_battery(link, queues.battery)),
    ]
}

enum Next<I> {
    Item(I),
    Idle,
    Closed,
}

async fn next_item<I>(
    stop: &Stop,
    rx: &mut mpsc::UnboundedReceiver<I>,
    idle_wait: Duration,
) -> Next<I> {
    tokio::select! {
        item = rx.recv() => match item {
            Some(item) => Next::Item(item),
            None => Next::Closed,
        },
        _ = stop.notify.notified() => Next::Idle,
        _ = tokio::time::sleep(idle_wait) => Next::Idle,
    }
}

async fn run_reader<T: Transport>(
    link: Arc<Link<T>>,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    messages: mpsc::UnboundedSender<Message>,
) {
    let log = ComponentLog::new("reader");
    let mut decoder = Decoder::with_policy(link.policy);

    while !link.stop.is_set() {
        match next_item(&link.stop, &mut inbound, link.idle_wait).await {
            Next::Item(chunk) => {
                if let Some(message) = read_chunk(&link, &log, &mut decoder, &chunk) {
                    if messages.send(message).is_err() {
                        break;
                    }
                }
            }
            Next::Idle => {}
            Next::Closed => break,
        }
    }

    tracing::debug!("reader stopped");
}

fn read_chunk<T: Transport>(
    link: &Link<T>,
    log: &ComponentLog,
    decoder: &mut Decoder,
    chunk: &[u8],
) -> Option<Message> {
    log.bytes(LogKind::Incoming, "ble read", chunk);
    let (&header, body) = chunk.split_first()?;

    if link.session.routes(header) {
        if let Some(confirm) = link.session.receive(body) {
            log.info(format_args!("handshake complete, header {:#04x}", confirm[0]));
            decoder.clear();
            if let Err(e) = link.enqueue(vec![confirm]) {
                log.error(format_args!("failed to confirm handshake: {}", e));
            }
        }
        return None;
    }

    let checked = match decoder.decode_frame(body) {
        Ok(Some(checked)) => checked,
        Ok(None) => return None,
        Err(e) => {
            log.error(format_args!("dropping frame: {}", e));
            return None;
        }
    };
    log.bytes(LogKind::Incoming, "decoded", &checked.frame.message);

    if !checked.is_valid() {
        log.error(format_args!(
            "CRC mismatch: expected {:#06x}, got {:#06x}",
            checked.expected_crc, checked.actual_crc
        ));
        if decoder.policy() == ChecksumPolicy::Drop {
            return None;
        }
    }
    if !checked.length_matches() {
        tracing::warn!(
            declared = checked.declared_len,
            actual = checked.frame.message.len(),
            "frame length prefix disagrees with frame size"
        );
    }

    match Message::parse(checked.frame.message) {
        Ok(message) => Some(message),
        Err(e) => {
            log.error(format_args!("dropping frame: {}", e));
            None
        }
    }
}

async fn run_processor<T: Transport, H: DeviceDriver>(
    link: Arc<Link<T>>,
    mut messages: mpsc::UnboundedReceiver<Message>,
    driver: Weak<H>,
) {
    let log = ComponentLog::new("processor");

    while !link.stop.is_set() {
        match next_item(&link.stop, &mut messages, link.idle_wait).await {
            Next::Item(message) => process_message(&link, &log, &driver, message),
            Next::Idle => {}
            Next::Closed => break,
        }
    }

    tracing::debug!("processor stopped");
}

fn process_message<T: Transport, H: DeviceDriver>(
    link: &Link<T>,
    log: &ComponentLog,
    driver: &Weak<H>,
    message: Message,
) {
    let class = message.class();
    let counter = message.counter();
    log.incoming(format_args!("{} message, counter {:?}", class, counter));

    // Acknowledgements from the peer need no reply.
    if let Message::Ack(_) = message {
        return;
    }

    let len = match &message {
        Message::DeviceInfo(body) | Message::Config(body) => body.len(),
        Message::ProtobufResponse { payload, .. } | Message::ProtobufRequest { payload, .. } => {
            payload.len()
        }
        Message::Ack(body) | Message::Unknown { body, .. } => body.len(),
    };
    link.events.publish(DeviceEvent::MessageReceived {
        class,
        counter,
        len,
    });

    if let Err(e) = link.acknowledge(&message) {
        log.error(format_args!("failed to acknowledge {}: {}", class, e));
    }

    match message {
        Message::DeviceInfo(body) | Message::Config(body) => {
            log.bytes(LogKind::Incoming, class.to_string().as_str(), &body);
        }
        Message::ProtobufResponse { counter, payload } => {
            match link.correlator.complete(counter, payload) {
                Correlation::Accepted => {}
                Correlation::Stale { outstanding } => log.info(format_args!(
                    "dropping stale response {} (outstanding {})",
                    counter, outstanding
                )),
                Correlation::Unexpected => {
                    log.info(format_args!("dropping unexpected response {}", counter))
                }
            }
        }
        Message::ProtobufRequest { payload, .. } => match driver.upgrade() {
            Some(driver) => {
                tokio::spawn(async move {
                    driver.handle_request(payload).await;
                });
            }
            None => log.info("no driver for unsolicited request"),
        },
        Message::Unknown { class, body } => {
            tracing::warn!(
                class = %hex::encode_upper(class),
                len = body.len(),
                "unknown message class"
            );
        }
        Message::Ack(_) => {}
    }
}

async fn run_writer<T: Transport>(link: Arc<Link<T>>, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
    let log = ComponentLog::new("writer");

    while !link.stop.is_set() {
        match next_item(&link.stop, &mut outbound, link.idle_wait).await {
            Next::Item(chunk) => {
                log.bytes(LogKind::Outgoing, "ble write", &chunk);
                if let Err(e) = link.transport.write(chunk).await {
                    log.error(format_args!("transport write failed: {}", e));
                    link.events.publish(DeviceEvent::TransportFailed {
                        reason: e.to_string(),
                    });
                }
            }
            Next::Idle => {}
            Next::Closed => break,
        }
    }

    tracing::debug!("writer stopped");
}

async fn run_battery<T: Transport>(link: Arc<Link<T>>, mut values: mpsc::UnboundedReceiver<Bytes>) {
    let log = ComponentLog::new("battery");

    while !link.stop.is_set() {
        match next_item(&link.stop, &mut values, link.idle_wait).await {
            Next::Item(value) => {
                let Some(&percent) = value.first() else {
                    continue;
                };
                *link.battery.lock() = Some(percent);
                log.info(format_args!("battery level {}%", percent));
                link.events.publish(DeviceEvent::BatteryUpdated { percent });
            }
            Next::Idle => {}
            Next::Closed => break,
        }
    }
}
