// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.


use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lifilink::link::{self, LinkConfig, LinkError, SerialLink, SharedLink};
use lifilink::protocol::DEFAULT_LOG_FILE;
use lifilink::receiver::{ImageReceiver, TextReceiver};
use lifilink::registry::{RegistryError, WorkerRegistry};
use lifilink::sender::{ImageSender, TextSender};
use lifilink::transfer_log::TransferLog;
use lifilink::worker::{WorkerError, WorkerEvent, WorkerKind};

#[derive(Parser)]
#[command(name = "lifilink")]
#[command(about = "Text and image transfer over a serial (LiFi) link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Read timeout in seconds, also the longest a receiver takes to stop
    #[arg(long, default_value = "1.0", value_name = "SECS")]
    timeout: f64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a text message, optionally repeated once per interval
    SendText {
        /// Message to send
        #[arg(required_unless_present = "file")]
        message: Option<String>,

        /// Read the message from a text file instead
        #[arg(short, long, conflicts_with = "message")]
        file: Option<PathBuf>,

        /// Number of times to send the message
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
        repeat: u32,

        /// Delay between repeats in milliseconds
        #[arg(long, default_value = "1000", value_name = "MS")]
        interval_ms: u64,
    },
    /// Receive text messages and log their size and transmission time
    ReceiveText {
        /// Transfer log (CSV)
        #[arg(short, long, default_value = DEFAULT_LOG_FILE)]
        log: PathBuf,

        /// Append to an existing log instead of starting a new one
        #[arg(long)]
        append: bool,

        /// Stop listening after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// Send an image file as raw bytes
    SendImage {
        /// Image to send
        file: PathBuf,
    },
    /// Receive images and save each one to the output directory
    ReceiveImage {
        /// Directory to save received images
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Stop listening after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("cannot read {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("worker exited without reporting")]
    Disconnected,
}

fn init_tracing(debug: bool) {
    let default = if debug { "lifilink=debug" } else { "lifilink=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn link_config(cli: &Cli) -> Result<LinkConfig, LinkError> {
    Ok(LinkConfig {
        port: cli.port.clone(),
        baud: cli.baud,
        data_bits: link::parse_data_bits(cli.data_bits)?,
        parity: link::parse_parity(&cli.parity)?,
        stop_bits: link::parse_stop_bits(cli.stop_bits)?,
        timeout: link::parse_timeout(cli.timeout)?,
    })
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match link_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("Opening serial port: {}", config.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", config.baud, config.data_bits, config.parity, config.stop_bits);

    let serial_link = match SerialLink::open(&config) {
        Ok(serial_link) => serial_link,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };
    let link = link::share(serial_link);

    let result = run(cli.command, &link, config.timeout);

    match link::lock(&link) {
        Ok(mut link) => {
            if let Err(e) = link.close() {
                warn!(error = %e, "closing serial port failed");
            }
        }
        Err(e) => warn!(error = %e, "serial port left open"),
    }

    if let Err(e) = result {
        eprintln!("Transfer failed: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands, link: &SharedLink, poll_timeout: Duration) -> Result<(), AppError> {
    let mut registry = WorkerRegistry::new();

    match command {
        Commands::SendText { message, file, repeat, interval_ms } => {
            let message = match file {
                Some(path) => fs::read_to_string(&path)
                    .map_err(|source| AppError::Input { path, source })?,
                None => message.unwrap_or_default(),
            };
            println!("\nSending {} byte message {} time(s)", message.len(), repeat);

            let sender = TextSender::new(link.clone(), message, repeat)
                .with_interval(Duration::from_millis(interval_ms));
            let events = registry.start(Box::new(sender))?;
            watch(&mut registry, WorkerKind::TextSender, events, None)
        }
        Commands::ReceiveText { log, append, duration } => {
            let transfer_log = if append { TransferLog::open(&log) } else { TransferLog::create(&log) }
                .map_err(|source| WorkerError::FileWrite { path: log.clone(), source })?;
            println!("\nReceiving text, logging to: {}", log.display());

            let receiver = TextReceiver::new(link.clone(), transfer_log).with_poll_timeout(poll_timeout);
            let events = registry.start(Box::new(receiver))?;
            watch(&mut registry, WorkerKind::TextReceiver, events, duration.map(Duration::from_secs))
        }
        Commands::SendImage { file } => {
            println!("\nSending image: {}", file.display());

            let events = registry.start(Box::new(ImageSender::new(link.clone(), file)))?;
            watch(&mut registry, WorkerKind::ImageSender, events, None)
        }
        Commands::ReceiveImage { output_dir, duration } => {
            if !output_dir.is_dir() {
                return Err(AppError::Input {
                    path: output_dir,
                    source: io::Error::new(io::ErrorKind::NotFound, "output directory not found"),
                });
            }
            println!("\nReceiving images to: {}", output_dir.display());

            let receiver = ImageReceiver::new(link.clone(), output_dir).with_poll_timeout(poll_timeout);
            let events = registry.start(Box::new(receiver))?;
            watch(&mut registry, WorkerKind::ImageReceiver, events, duration.map(Duration::from_secs))
        }
    }
}

/// Prints events until the worker reaches a terminal state, asking it to stop
/// once `duration` has passed.
fn watch(
    registry: &mut WorkerRegistry,
    kind: WorkerKind,
    events: Receiver<WorkerEvent>,
    duration: Option<Duration>,
) -> Result<(), AppError> {
    let mut deadline = duration.map(|d| Instant::now() + d);

    loop {
        let event = match deadline {
            Some(at) => match events.recv_timeout(at.saturating_duration_since(Instant::now())) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = registry.stop(kind) {
                        warn!(error = %e, "stop after duration");
                    }
                    deadline = None;
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AppError::Disconnected),
            },
            None => events.recv().map_err(|_| AppError::Disconnected)?,
        };

        match event {
            WorkerEvent::Progress(percent) => println!("Progress: {}%", percent),
            WorkerEvent::MessageReceived { message, latency, declared_size } => {
                println!("\n************New data received*********\n{}", message);
                println!("\nTransmission time: {} seconds\nBytes sent: {}", latency, declared_size);
            }
            WorkerEvent::ImageReceived { path } => println!("Image received: {}", path.display()),
            WorkerEvent::Done => {
                println!("\n{} done", kind);
                return Ok(());
            }
            WorkerEvent::Stopped => {
                println!("\n{} stopped", kind);
                return Ok(());
            }
            WorkerEvent::Failed(e) => return Err(e.into()),
        }
    }
}
