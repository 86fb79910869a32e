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


#[cfg(test)]
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;
use tracing::debug;

/// Size of a single read from the serial driver while draining the port
const READ_CHUNK: usize = 4096;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("invalid link setting: {0}")]
    InvalidSetting(String),
}

// ============================================================================
// Link Trait
// ============================================================================

/// Byte-stream channel that transfers flow over.
///
/// Implementations deliver written bytes in order. A closed link answers every
/// later call with a `NotConnected` error.
pub trait Link: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Returns whatever arrived within `timeout`; an empty vector means the
    /// read timed out with nothing pending.
    fn read_timeout(&mut self, timeout: Duration) -> io::Result<Vec<u8>>;

    fn close(&mut self) -> io::Result<()>;
}

/// A link shared between the application and its workers. Workers lock it per
/// call and never close it.
pub type SharedLink = Arc<Mutex<Box<dyn Link>>>;

pub fn share(link: impl Link + 'static) -> SharedLink {
    Arc::new(Mutex::new(Box::new(link)))
}

pub fn lock(link: &SharedLink) -> io::Result<MutexGuard<'_, Box<dyn Link>>> {
    link.lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "link lock poisoned"))
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "link is closed")
}

// ============================================================================
// Link Configuration
// ============================================================================

/// Connection settings owned by the application and handed to `SerialLink::open`.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub timeout: Duration,
}

pub fn parse_data_bits(bits: u8) -> Result<DataBits, LinkError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(LinkError::InvalidSetting(format!(
            "data bits {}, must be 5, 6, 7, or 8", bits
        ))),
    }
}

pub fn parse_parity(parity: &str) -> Result<Parity, LinkError> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(LinkError::InvalidSetting(format!(
            "parity '{}', must be 'none', 'odd', or 'even'", parity
        ))),
    }
}

pub fn parse_stop_bits(bits: u8) -> Result<StopBits, LinkError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(LinkError::InvalidSetting(format!(
            "stop bits {}, must be 1 or 2", bits
        ))),
    }
}

pub fn parse_timeout(secs: f64) -> Result<Duration, LinkError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(LinkError::InvalidSetting(format!(
            "timeout {}, must be a positive number of seconds", secs
        ))),
    }
}

// ============================================================================
// Serial Link Implementation
// ============================================================================

/// Link over a real serial port, wrapping the serialport crate
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn open(config: &LinkConfig) -> Result<Self, LinkError> {
        let port = serialport::new(&config.port, config.baud)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .timeout(config.timeout)
            .open()
            .map_err(|source| LinkError::Open {
                port: config.port.clone(),
                source,
            })?;

        Ok(SerialLink::from_port(port))
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        SerialLink { port: Some(port) }
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(closed)
    }
}

impl Link for SerialLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port_mut()?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    // Drains the port until `timeout` has elapsed since the call, so a burst
    // written with a single call comes back as a single read while the call
    // itself never outlasts one timeout, however busy the line is.
    fn read_timeout(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;

        let mut received = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            match port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                // Hand over what already arrived; the error shows up again on the next call
                Err(e) if !received.is_empty() => {
                    debug!(error = %e, "read failed after partial data");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if !received.is_empty() {
            debug!(bytes = received.len(), "read from serial port");
        }
        Ok(received)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
        Ok(())
    }
}

// ============================================================================
// Mock Link for Testing
// ============================================================================

/// Shared view into a `MockLink` that stays usable after the link has been
/// handed to a worker.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockProbe {
    inner: Arc<Mutex<ProbeState>>,
}

#[cfg(test)]
#[derive(Default)]
struct ProbeState {
    writes: Vec<Vec<u8>>,
    pending_reads: usize,
}

#[cfg(test)]
impl MockProbe {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn pending_reads(&self) -> usize {
        self.inner.lock().unwrap().pending_reads
    }

    /// Blocks until every scripted read has been handed out
    pub fn wait_drained(&self, limit: Duration) {
        let deadline = Instant::now() + limit;
        while self.pending_reads() > 0 {
            assert!(Instant::now() < deadline, "scripted reads not consumed");
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

#[cfg(test)]
pub struct MockLink {
    // Chunks returned by successive reads (None = timeout)
    reads: VecDeque<Option<Vec<u8>>>,
    probe: MockProbe,
    fail_writes: bool,
    closed: bool,
}

#[cfg(test)]
impl MockLink {
    pub fn new(reads: Vec<Option<Vec<u8>>>) -> (Self, MockProbe) {
        let probe = MockProbe::default();
        probe.inner.lock().unwrap().pending_reads = reads.len();
        let link = MockLink {
            reads: reads.into(),
            probe: probe.clone(),
            fail_writes: false,
            closed: false,
        };
        (link, probe)
    }

    pub fn failing_writes() -> (Self, MockProbe) {
        let (mut link, probe) = MockLink::new(Vec::new());
        link.fail_writes = true;
        (link, probe)
    }
}

#[cfg(test)]
impl Link for MockLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(closed());
        }
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Mock write failure"));
        }
        self.probe.inner.lock().unwrap().writes.push(buf.to_vec());
        Ok(())
    }

    fn read_timeout(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        if self.closed {
            return Err(closed());
        }

        match self.reads.pop_front() {
            Some(Some(chunk)) => {
                self.probe.inner.lock().unwrap().pending_reads -= 1;
                Ok(chunk)
            }
            scripted => {
                if scripted.is_some() {
                    self.probe.inner.lock().unwrap().pending_reads -= 1;
                }
                // Out of responses = timeout
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(Vec::new())
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}
