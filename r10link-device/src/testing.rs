//! Test doubles: a recording driver, a scripted peripheral and a compact
//! service codec.

use crate::config::Config;
use crate::device::{Device, DeviceDriver};
use crate::error::DeviceError;
use crate::memory::{MemoryPeer, MemoryTransport};
use crate::service::{
    Alert, DeviceFault, DeviceState, ServiceCodec, ServiceRequest, ServiceResponse, Severity,
    Tilt, WakeStatus,
};
use crate::transport::Characteristic;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use r10link_protocol::handshake::{HANDSHAKE_HEADER, HANDSHAKE_REPLY_PREFIX, HANDSHAKE_REQUEST};
use r10link_protocol::message::{encode_protobuf_request, encode_protobuf_response};
use r10link_protocol::{chunk, cobs, Decoder, Encoder, Frame, Message, DELIMITER, MAX_CHUNK_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

/// Short timeouts for tests.
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.timeouts.handshake_ms = 500;
    config.timeouts.request_ms = 500;
    config.timeouts.idle_wait_ms = 20;
    config
}

/// Driver that records unsolicited requests.
pub(crate) struct RecordingDriver {
    pub(crate) device: Device<MemoryTransport>,
    requests_tx: mpsc::UnboundedSender<Bytes>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl RecordingDriver {
    pub(crate) fn start(transport: Arc<MemoryTransport>, config: &Config) -> Arc<Self> {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let driver = Arc::new(Self {
            device: Device::new(transport, config),
            requests_tx,
            requests: tokio::sync::Mutex::new(requests),
        });
        driver.device.start(Arc::downgrade(&driver));
        driver
    }

    pub(crate) async fn next_request(&self, timeout: Duration) -> Option<Bytes> {
        let mut requests = self.requests.lock().await;
        tokio::time::timeout(timeout, requests.recv())
            .await
            .ok()
            .flatten()
    }
}

impl DeviceDriver for RecordingDriver {
    async fn setup(&self) -> Result<(), DeviceError> {
        self.device.setup().await
    }

    async fn handle_request(&self, payload: Bytes) {
        let _ = self.requests_tx.send(payload);
    }
}

/// Peripheral side that speaks the framed protocol.
pub(crate) struct ScriptedPeer {
    peer: MemoryPeer,
    decoder: Decoder,
    encoder: Encoder,
    header: u8,
    last_header: Option<u8>,
}

impl ScriptedPeer {
    pub(crate) fn new(peer: MemoryPeer) -> Self {
        Self {
            peer,
            decoder: Decoder::new(),
            encoder: Encoder::default(),
            header: HANDSHAKE_HEADER,
            last_header: None,
        }
    }

    /// Answers the next handshake request with `header` and checks the
    /// confirmation.
    pub(crate) async fn accept_handshake(&mut self, header: u8) {
        let request = self.peer.next_write(WAIT).await.unwrap();
        assert_eq!(request[0], HANDSHAKE_HEADER);
        assert_eq!(&request[1..], &HANDSHAKE_REQUEST);

        let mut reply = vec![HANDSHAKE_HEADER];
        reply.extend_from_slice(&HANDSHAKE_REPLY_PREFIX);
        reply.push(header);
        assert!(self.peer.notify(Characteristic::InterfaceNotifier, reply));

        let confirm = self.peer.next_write(WAIT).await.unwrap();
        assert_eq!(confirm.as_ref(), &[header, 0x00]);
        self.header = header;
    }

    /// Reads chunks written by the device until a message is complete.
    pub(crate) async fn next_message(&mut self) -> Option<Message> {
        loop {
            let chunk = self.peer.next_write(WAIT).await?;
            if let Some(message) = self.accept_chunk(&chunk) {
                return Some(message);
            }
        }
    }

    fn accept_chunk(&mut self, chunk: &[u8]) -> Option<Message> {
        let (&header, body) = chunk.split_first()?;
        self.last_header = Some(header);
        self.decoder.decode_message(body).unwrap()
    }

    /// Header byte of the last chunk read.
    pub(crate) fn last_header(&self) -> Option<u8> {
        self.last_header
    }

    pub(crate) fn send_message(&self, message: &[u8]) {
        for chunk in self.encoder.encode(message, self.header).unwrap() {
            assert!(self.peer.notify(Characteristic::InterfaceNotifier, chunk));
        }
    }

    pub(crate) fn send_response(&self, counter: u16, payload: &[u8]) {
        self.send_message(&encode_protobuf_response(counter, payload));
    }

    pub(crate) fn send_request(&self, counter: u16, payload: &[u8]) {
        self.send_message(&encode_protobuf_request(counter, payload));
    }

    /// Sends a frame whose CRC does not match its contents.
    pub(crate) fn send_corrupted(&self, message: &[u8]) {
        let mut raw = Frame::new(Bytes::copy_from_slice(message)).to_raw().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        let mut encoded = vec![DELIMITER];
        encoded.extend_from_slice(&cobs::encode(&raw));
        encoded.push(DELIMITER);
        for piece in chunk(&encoded, self.header, MAX_CHUNK_SIZE) {
            assert!(self.peer.notify(Characteristic::InterfaceNotifier, piece));
        }
    }

    pub(crate) async fn next_write(&mut self, timeout: Duration) -> Option<Bytes> {
        self.peer.next_write(timeout).await
    }

    pub(crate) fn notify(&self, characteristic: Characteristic, value: impl Into<Bytes>) -> bool {
        self.peer.notify(characteristic, value)
    }

    pub(crate) fn transport(&self) -> &Arc<MemoryTransport> {
        self.peer.transport()
    }

    /// Answers every protobuf request with `respond(payload)` on a task.
    ///
    /// Messages sent through the returned handle are delivered as-is, in
    /// order with the responses.
    pub(crate) fn serve<F>(mut self, respond: F) -> PeerHandle
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let seen = Arc::clone(&requests);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = self.peer.next_write(Duration::from_secs(60)) => {
                        let Some(chunk) = chunk else { break };
                        if let Some(Message::ProtobufRequest { counter, payload }) =
                            self.accept_chunk(&chunk)
                        {
                            seen.lock().push(payload.clone());
                            if let Some(response) = respond(&payload) {
                                self.send_response(counter, &response);
                            }
                        }
                    }
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        self.send_message(&message);
                    }
                }
            }
        });

        PeerHandle {
            requests,
            outbound,
            task,
        }
    }
}

/// Handle to a peer running [`ScriptedPeer::serve`].
pub(crate) struct PeerHandle {
    requests: Arc<Mutex<Vec<Bytes>>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Request payloads received so far.
    pub(crate) fn requests(&self) -> Vec<Bytes> {
        self.requests.lock().clone()
    }

    /// Sends an unsolicited protobuf request.
    pub(crate) fn send_request(&self, counter: u16, payload: &[u8]) {
        let _ = self
            .outbound
            .send(encode_protobuf_request(counter, payload));
    }

    /// Waits until `count` requests were received.
    pub(crate) async fn wait_requests(&self, count: usize) -> Vec<Bytes> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let requests = self.requests();
            if requests.len() >= count || tokio::time::Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Service codec with a one-byte tag per request.
///
/// Responses: wake `[status]`, status `[]` or `[state]`, tilt as two
/// little-endian `f32`, the rest `[accepted]`. Alerts start with a flag
/// byte, see [`TestCodec::encode_alert`].
pub(crate) struct TestCodec;

impl TestCodec {
    pub(crate) const WAKE_UP: u8 = 1;
    pub(crate) const STATUS: u8 = 2;
    pub(crate) const TILT: u8 = 3;
    pub(crate) const SUBSCRIBE_ALERTS: u8 = 4;
    pub(crate) const START_TILT_CALIBRATION: u8 = 5;
    pub(crate) const RESET_TILT_CALIBRATION: u8 = 6;
    pub(crate) const SHOT_CONFIG: u8 = 7;

    const STATE: u8 = 0x01;
    const ERROR: u8 = 0x02;
    const METRICS: u8 = 0x04;
    const TILT_CALIBRATION: u8 = 0x08;
    const NOT_AN_ALERT: u8 = 0x80;

    /// Alert layout: `flags ∥ state? ∥ severity code_len code? ∥ metrics?`.
    pub(crate) fn encode_alert(alert: &Alert) -> Vec<u8> {
        let mut flags = 0;
        let mut body = Vec::new();
        if let Some(state) = alert.state {
            flags |= Self::STATE;
            body.push(state.as_u8());
        }
        if let Some(fault) = &alert.error {
            flags |= Self::ERROR;
            body.push(match fault.severity {
                Severity::Warning => 0,
                Severity::Serious => 1,
                Severity::Fatal => 2,
            });
            let code = fault.code.clone().unwrap_or_default();
            body.push(code.len() as u8);
            body.extend_from_slice(code.as_bytes());
        }
        if let Some(metrics) = &alert.metrics {
            flags |= Self::METRICS;
            body.extend_from_slice(metrics);
        }
        if alert.tilt_calibration {
            flags |= Self::TILT_CALIBRATION;
        }

        let mut out = vec![flags];
        out.extend(body);
        out
    }

    /// A request payload the codec does not treat as an alert.
    pub(crate) fn other_request() -> Vec<u8> {
        vec![Self::NOT_AN_ALERT]
    }

    pub(crate) fn tilt_response(tilt: Tilt) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_f32_le(tilt.roll);
        buf.put_f32_le(tilt.pitch);
        buf.to_vec()
    }

    fn short(what: &str) -> DeviceError {
        DeviceError::Codec(format!("truncated {}", what))
    }
}

impl ServiceCodec for TestCodec {
    fn encode_request(&self, request: &ServiceRequest) -> Result<Vec<u8>, DeviceError> {
        Ok(match request {
            ServiceRequest::WakeUp => vec![Self::WAKE_UP],
            ServiceRequest::Status => vec![Self::STATUS],
            ServiceRequest::Tilt => vec![Self::TILT],
            ServiceRequest::SubscribeAlerts => vec![Self::SUBSCRIBE_ALERTS],
            ServiceRequest::StartTiltCalibration => vec![Self::START_TILT_CALIBRATION],
            ServiceRequest::ResetTiltCalibration { should_reset } => {
                vec![Self::RESET_TILT_CALIBRATION, *should_reset as u8]
            }
            ServiceRequest::ShotConfig(conditions) => {
                let mut buf = vec![Self::SHOT_CONFIG];
                buf.extend_from_slice(&conditions.tee_range().to_le_bytes());
                buf
            }
        })
    }

    fn decode_response(
        &self,
        request: &ServiceRequest,
        payload: &[u8],
    ) -> Result<ServiceResponse, DeviceError> {
        let flag = || payload.first().map(|b| *b == 1).ok_or_else(|| Self::short(request.name()));
        Ok(match request {
            ServiceRequest::WakeUp => ServiceResponse::WakeUp(match payload.first() {
                Some(0) => WakeStatus::Success,
                Some(1) => WakeStatus::AlreadyAwake,
                _ => WakeStatus::Unknown,
            }),
            ServiceRequest::Status => {
                ServiceResponse::Status(payload.first().map(|b| DeviceState::from_u8(*b)))
            }
            ServiceRequest::Tilt => {
                if payload.len() < 8 {
                    return Err(Self::short("tilt"));
                }
                let roll = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let pitch = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
                ServiceResponse::Tilt(Tilt { roll, pitch })
            }
            ServiceRequest::SubscribeAlerts => ServiceResponse::SubscribeAlerts { accepted: flag()? },
            ServiceRequest::StartTiltCalibration => {
                ServiceResponse::StartTiltCalibration { accepted: flag()? }
            }
            ServiceRequest::ResetTiltCalibration { .. } => {
                ServiceResponse::ResetTiltCalibration { accepted: flag()? }
            }
            ServiceRequest::ShotConfig(_) => ServiceResponse::ShotConfig { success: flag()? },
        })
    }

    fn decode_alert(&self, payload: &[u8]) -> Result<Option<Alert>, DeviceError> {
        let Some((&flags, mut rest)) = payload.split_first() else {
            return Err(Self::short("alert"));
        };
        if flags & Self::NOT_AN_ALERT != 0 {
            return Ok(None);
        }

        let mut alert = Alert::default();
        if flags & Self::STATE != 0 {
            let (&state, tail) = rest.split_first().ok_or_else(|| Self::short("state"))?;
            alert.state = Some(DeviceState::from_u8(state));
            rest = tail;
        }
        if flags & Self::ERROR != 0 {
            if rest.len() < 2 {
                return Err(Self::short("error"));
            }
            let severity = match rest[0] {
                0 => Severity::Warning,
                1 => Severity::Serious,
                _ => Severity::Fatal,
            };
            let len = rest[1] as usize;
            let code = rest.get(2..2 + len).ok_or_else(|| Self::short("error code"))?;
            alert.error = Some(DeviceFault {
                code: (!code.is_empty()).then(|| String::from_utf8_lossy(code).into_owned()),
                severity,
                detail: None,
            });
            rest = &rest[2 + len..];
        }
        if flags & Self::METRICS != 0 {
            alert.metrics = Some(Bytes::copy_from_slice(rest));
        }
        alert.tilt_calibration = flags & Self::TILT_CALIBRATION != 0;
        Ok(Some(alert))
    }
}
