//! Command execution.

use crate::Commands;
use bytes::Bytes;
use colored::Colorize;
use r10link_device::Config;
use r10link_protocol::handshake::{HANDSHAKE_HEADER, HANDSHAKE_REPLY_PREFIX, HEADER_OFFSET};
use r10link_protocol::{crc, message, CheckedFrame, Decoder, Encoder, Message, ProtocolError};
use serde::Serialize;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes an offline command and returns the formatted output.
pub fn execute(cmd: Commands) -> CommandResult {
    match cmd {
        Commands::Loopback { .. } => Err("loopback needs the async runtime".into()),

        Commands::Frame {
            message,
            header,
            chunk_size,
        } => {
            let message = parse_hex(&message)?;
            let chunks = Encoder::new(chunk_size).encode(&message, header)?;
            Ok(format_chunks(&chunks))
        }

        Commands::Request {
            payload,
            counter,
            header,
        } => {
            let payload = parse_hex(&payload)?;
            let request = message::encode_protobuf_request(counter, &payload);
            let chunks = Encoder::default().encode(&request, header)?;
            Ok(format!(
                "{} {}\n{}",
                "message".bold(),
                hex::encode_upper(&request),
                format_chunks(&chunks)
            ))
        }

        Commands::Decode {
            chunks,
            policy,
            json,
        } => {
            let mut decoder = Decoder::with_policy(policy.into());
            let mut lines = Vec::new();
            for chunk in &chunks {
                let chunk = parse_hex(chunk)?;
                if let Some(decoded) = decode_chunk(&mut decoder, &chunk)? {
                    lines.push(if json {
                        serde_json::to_string(&decoded)?
                    } else {
                        decoded.describe()
                    });
                }
            }
            if decoder.buffered() > 0 {
                lines.push(format!(
                    "{}: {} bytes of an unfinished frame",
                    "Warning".yellow(),
                    decoder.buffered()
                ));
            }
            Ok(lines.join("\n"))
        }

        Commands::Crc { data } => {
            let data = parse_hex(&data)?;
            let checksum = crc::checksum(&data);
            Ok(format!(
                "{:#06x} (wire {})",
                checksum,
                hex::encode_upper(crc::checksum_le(&data))
            ))
        }

        Commands::Config { save } => {
            let config = Config::load()?;
            if let Some(path) = save {
                config.save(&path)?;
                eprintln!("{} {}", "Saved".green(), path.display());
            }
            Ok(serde_yaml::to_string(&config)?)
        }
    }
}

/// A chunk or frame seen by the decode command.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Decoded {
    HandshakeReply {
        header: u8,
    },
    Message {
        class: String,
        counter: Option<u16>,
        body: String,
        crc_valid: bool,
        length_valid: bool,
        acknowledgement: String,
    },
    Dropped {
        reason: String,
    },
}

impl Decoded {
    fn describe(&self) -> String {
        match self {
            Decoded::HandshakeReply { header } => {
                format!("{} header {:#04x}", "handshake".cyan(), header)
            }
            Decoded::Message {
                class,
                counter,
                body,
                crc_valid,
                length_valid,
                acknowledgement,
            } => {
                let mut line = format!("{} {}", class.cyan(), body);
                if let Some(counter) = counter {
                    line.push_str(&format!(" counter {}", counter));
                }
                if !crc_valid {
                    line.push_str(&format!(" {}", "crc mismatch".red()));
                }
                if !length_valid {
                    line.push_str(&format!(" {}", "length mismatch".yellow()));
                }
                line.push_str(&format!("\n  ack {}", acknowledgement.dimmed()));
                line
            }
            Decoded::Dropped { reason } => format!("{} {}", "dropped".red(), reason),
        }
    }
}

fn decode_chunk(decoder: &mut Decoder, chunk: &[u8]) -> Result<Option<Decoded>, Box<dyn std::error::Error>> {
    let Some((&header, body)) = chunk.split_first() else {
        return Ok(None);
    };

    if header == HANDSHAKE_HEADER
        && body.len() > HEADER_OFFSET
        && body.starts_with(&HANDSHAKE_REPLY_PREFIX)
    {
        return Ok(Some(Decoded::HandshakeReply {
            header: body[HEADER_OFFSET],
        }));
    }

    let checked = match decoder.decode_frame(body) {
        Ok(Some(checked)) => checked,
        Ok(None) => return Ok(None),
        Err(e) => {
            return Ok(Some(Decoded::Dropped {
                reason: e.to_string(),
            }))
        }
    };
    Ok(Some(classify(decoder, checked)))
}

fn classify(decoder: &Decoder, checked: CheckedFrame) -> Decoded {
    let crc_valid = checked.is_valid();
    let length_valid = checked.length_matches();
    if !crc_valid && decoder.policy() == r10link_protocol::ChecksumPolicy::Drop {
        return Decoded::Dropped {
            reason: format!(
                "crc mismatch: expected {:#06x}, got {:#06x}",
                checked.expected_crc, checked.actual_crc
            ),
        };
    }

    match Message::parse(checked.frame.message) {
        Ok(message) => {
            let body = match &message {
                Message::ProtobufResponse { payload, .. } | Message::ProtobufRequest { payload, .. } => {
                    payload.clone()
                }
                Message::DeviceInfo(body)
                | Message::Config(body)
                | Message::Ack(body)
                | Message::Unknown { body, .. } => body.clone(),
            };
            Decoded::Message {
                class: message.class().to_string(),
                counter: message.counter(),
                body: hex::encode_upper(&body),
                crc_valid,
                length_valid,
                acknowledgement: hex::encode_upper(message.acknowledgement()),
            }
        }
        Err(e) => Decoded::Dropped {
            reason: e.to_string(),
        },
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, ProtocolError> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    Ok(hex::decode(cleaned.trim_start_matches("0x"))?)
}

fn format_chunks(chunks: &[Bytes]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "{} {} {}",
                format!("[{}]", i).dimmed(),
                format!("{:02X}", chunk[0]).yellow(),
                hex::encode_upper(&chunk[1..])
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use r10link_protocol::ChecksumPolicy;

    fn chunks_hex(message: &[u8], header: u8) -> Vec<Vec<u8>> {
        Encoder::default()
            .encode(message, header)
            .unwrap()
            .into_iter()
            .map(|c| c.to_vec())
            .collect()
    }

    #[test]
    fn test_parse_hex_separators() {
        assert_eq!(parse_hex("b3 13:00-01").unwrap(), vec![0xB3, 0x13, 0x00, 0x01]);
        assert_eq!(parse_hex("0xA013").unwrap(), vec![0xA0, 0x13]);
        assert!(matches!(
            parse_hex("abc"),
            Err(ProtocolError::InvalidHex(hex::FromHexError::OddLength))
        ));
    }

    #[test]
    fn test_invalid_hex_reported() {
        let err = execute(Commands::Crc {
            data: "zz".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid hex"));
    }

    #[test]
    fn test_decode_response_chunks() {
        let response = message::encode_protobuf_response(3, &[0x0A, 0x0B]);
        let mut decoder = Decoder::with_policy(ChecksumPolicy::Drop);

        let mut decoded = None;
        for chunk in chunks_hex(&response, 0x42) {
            if let Some(d) = decode_chunk(&mut decoder, &chunk).unwrap() {
                decoded = Some(d);
            }
        }

        match decoded.unwrap() {
            Decoded::Message {
                class,
                counter,
                body,
                crc_valid,
                acknowledgement,
                ..
            } => {
                assert_eq!(class, "B413");
                assert_eq!(counter, Some(3));
                assert_eq!(body, "0A0B");
                assert!(crc_valid);
                assert_eq!(acknowledgement, "8813B41300030000000000000000");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_handshake_reply() {
        let mut chunk = vec![HANDSHAKE_HEADER];
        chunk.extend_from_slice(&HANDSHAKE_REPLY_PREFIX);
        chunk.push(0x5A);

        let mut decoder = Decoder::new();
        match decode_chunk(&mut decoder, &chunk).unwrap() {
            Some(Decoded::HandshakeReply { header }) => assert_eq!(header, 0x5A),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decoded_json_shape() {
        let decoded = Decoded::HandshakeReply { header: 7 };
        let json = serde_json::to_value(&decoded).unwrap();
        assert_eq!(json["kind"], "handshake_reply");
        assert_eq!(json["header"], 7);
    }
}
