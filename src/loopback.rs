//! Loopback session against an in-memory peripheral.

use bytes::Bytes;
use colored::Colorize;
use r10link_device::{
    Characteristic, Config, Device, DeviceDriver, DeviceError, DeviceEvent, MemoryPeer,
    MemoryTransport,
};
use r10link_protocol::handshake::{HANDSHAKE_HEADER, HANDSHAKE_REPLY_PREFIX, HANDSHAKE_REQUEST};
use r10link_protocol::{message, Decoder, Encoder, Message};
use std::sync::Arc;
use std::time::Duration;

/// Driver that only logs unsolicited requests.
struct Loopback {
    device: Device<MemoryTransport>,
}

impl DeviceDriver for Loopback {
    async fn setup(&self) -> Result<(), DeviceError> {
        self.device.setup().await
    }

    async fn handle_request(&self, payload: Bytes) {
        tracing::info!(len = payload.len(), "unsolicited request");
    }
}

/// Peripheral that assigns `header` and echoes every protobuf request.
async fn run_peer(mut peer: MemoryPeer, header: u8) {
    let mut decoder = Decoder::new();
    let encoder = Encoder::default();

    while let Some(chunk) = peer.next_write(Duration::from_secs(5)).await {
        let Some((&chunk_header, body)) = chunk.split_first() else {
            continue;
        };

        if chunk_header == HANDSHAKE_HEADER && body == HANDSHAKE_REQUEST {
            let mut reply = vec![HANDSHAKE_HEADER];
            reply.extend_from_slice(&HANDSHAKE_REPLY_PREFIX);
            reply.push(header);
            peer.notify(Characteristic::InterfaceNotifier, reply);
            continue;
        }

        let inbound = match decoder.decode_message(body) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("peer dropped frame: {}", e);
                continue;
            }
        };

        if let Message::ProtobufRequest { counter, payload } = inbound {
            let response = message::encode_protobuf_response(counter, &payload);
            match encoder.encode(&response, header) {
                Ok(chunks) => {
                    for chunk in chunks {
                        peer.notify(Characteristic::InterfaceNotifier, chunk);
                    }
                }
                Err(e) => tracing::warn!("peer failed to encode response: {}", e),
            }
        }
    }
}

/// Connects to an echoing peer, sends `requests` requests and reports what
/// came back.
pub async fn run(requests: u16, header: u8) -> Result<String, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let (transport, peer) = MemoryTransport::pair();
    transport.set_value(Characteristic::Model, "loopback");
    transport.set_value(Characteristic::Battery, vec![100u8]);

    let peer_task = tokio::spawn(run_peer(peer, header));

    let driver = Arc::new(Loopback {
        device: Device::new(transport, &config),
    });
    driver.device.start(Arc::downgrade(&driver));
    let mut events = driver
        .device
        .events()
        .subscribe()
        .ok_or("event bus closed")?;

    driver.setup().await?;

    let mut lines = vec![format!(
        "{} session header {:#04x}",
        "Connected".green(),
        header
    )];
    for i in 0..requests {
        let payload = i.to_le_bytes();
        let line = match driver.device.send_protobuf_request(&payload).await? {
            Some(response) if response.as_ref() == payload => format!(
                "{} counter {} payload {}",
                "echo".green(),
                i,
                hex::encode_upper(&response)
            ),
            Some(response) => format!(
                "{} counter {} payload {}",
                "mismatch".red(),
                i,
                hex::encode_upper(&response)
            ),
            None => format!("{} counter {}", "timeout".yellow(), i),
        };
        lines.push(line);
    }

    driver.device.shutdown().await;
    peer_task.abort();

    let mut received = 0;
    while let Some(event) = events.recv().await {
        if let DeviceEvent::MessageReceived { .. } = event {
            received += 1;
        }
    }
    lines.push(format!(
        "{} messages received, next counter {}",
        received,
        driver.device.counter()
    ));
    Ok(lines.join("\n"))
}
