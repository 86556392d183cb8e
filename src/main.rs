//! r10link - launch monitor protocol tool
//!
//! Frames and decodes messages of the launch monitor BLE link and runs a
//! loopback session against an in-memory peer.

mod commands;
mod loopback;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use r10link_protocol::ChecksumPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "r10link")]
#[command(about = "Framing, decoding and loopback tool for the launch monitor link")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Frame a message and print its chunks
    Frame {
        /// Message bytes as hex, class prefix included
        message: String,

        /// Session header byte, as hex
        #[arg(long, default_value = "00", value_parser = parse_byte)]
        header: u8,

        /// Frame bytes per chunk
        #[arg(long, default_value_t = r10link_protocol::MAX_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Build a protobuf request and print its chunks
    Request {
        /// Protobuf payload as hex
        payload: String,

        /// Correlation counter
        #[arg(short, long, default_value_t = 0)]
        counter: u16,

        /// Session header byte, as hex
        #[arg(long, default_value = "00", value_parser = parse_byte)]
        header: u8,
    },

    /// Reassemble header-prefixed chunks and classify the messages
    Decode {
        /// Chunks as hex, in arrival order
        #[arg(required = true)]
        chunks: Vec<String>,

        /// Disposition of frames failing the CRC check
        #[arg(long, value_enum, default_value_t = Policy::Drop)]
        policy: Policy,

        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },

    /// Compute the CRC-16/ARC of some bytes
    Crc {
        /// Bytes as hex
        data: String,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to this YAML file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Run a session against an in-memory peer that echoes requests
    Loopback {
        /// Number of requests to send
        #[arg(short, long, default_value_t = 3)]
        requests: u16,

        /// Session header the peer assigns, as hex
        #[arg(long, default_value = "42", value_parser = parse_byte)]
        header: u8,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Drop,
    Deliver,
}

impl From<Policy> for ChecksumPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Drop => ChecksumPolicy::Drop,
            Policy::Deliver => ChecksumPolicy::Deliver,
        }
    }
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid byte '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Loopback { requests, header } => loopback::run(requests, header).await,
        cmd => commands::execute(cmd),
    };

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
