//! Serial link to the experiment device.
//!
//! The device sends newline-terminated text. Reads block for at most the
//! port's timeout, so the caller regains control regularly even when the
//! device is silent.

use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use thiserror::Error;

use crate::operator::OperatorInput;

/// Baud rate the firmware talks at.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Bytes requested from the port per read attempt.
const READ_CHUNK: usize = 128;

/// A line longer than this without a newline is treated as noise and dropped.
const MAX_LINE_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("no serial ports found")]
    NoPorts,
    #[error("invalid port selection '{0}'")]
    InvalidSelection(String),
    #[error("no port was selected")]
    NoSelection,
    #[error("could not read the port selection: {0}")]
    Prompt(#[source] io::Error),
    #[error("failed to open '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub index: usize,
    pub device: String,
    pub description: String,
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} - {}", self.index, self.device, self.description)
    }
}

/// Human-readable description of what sits behind a port.
pub fn describe(info: &SerialPortInfo) -> String {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let parts: Vec<&str> = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                parts.join(" - ")
            }
        }
        SerialPortType::PciPort => String::from("PCI"),
        SerialPortType::BluetoothPort => String::from("Bluetooth"),
        SerialPortType::Unknown => String::from("Unknown"),
    }
}

pub fn entries(ports: &[SerialPortInfo]) -> Vec<PortEntry> {
    ports
        .iter()
        .enumerate()
        .map(|(index, info)| PortEntry {
            index,
            device: info.port_name.clone(),
            description: describe(info),
        })
        .collect()
}

/// Lists every serial port on the machine. An empty list is an error.
pub fn list_ports() -> Result<Vec<PortEntry>, TransportError> {
    let ports = serialport::available_ports().map_err(TransportError::Enumerate)?;
    if ports.is_empty() {
        return Err(TransportError::NoPorts);
    }
    Ok(entries(&ports))
}

/// Asks the operator for a port index.
pub fn choose_port<'a, O>(
    ports: &'a [PortEntry],
    operator: &mut O,
) -> Result<&'a PortEntry, TransportError>
where
    O: OperatorInput + ?Sized,
{
    let answer = operator
        .prompt("Select port number: ")
        .map_err(TransportError::Prompt)?
        .ok_or(TransportError::NoSelection)?;
    let choice = answer.trim();
    choice
        .parse::<usize>()
        .ok()
        .and_then(|i| ports.get(i))
        .ok_or_else(|| TransportError::InvalidSelection(choice.to_string()))
}

/// Opens `device` for reading with a bounded per-read timeout.
pub fn open(
    device: &str,
    baud: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, TransportError> {
    serialport::new(device, baud)
        .timeout(timeout)
        .open()
        .map_err(|source| TransportError::Open {
            port: device.to_string(),
            source,
        })
}

/// Splits a byte stream into text lines.
///
/// Each call to [`LineReader::next_line`] performs at most one read. Invalid
/// UTF-8 is replaced rather than rejected.
#[derive(Debug)]
pub struct LineReader<R> {
    source: R,
    pending: Vec<u8>,
    chunk: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            pending: Vec::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Returns the next complete line without its terminator, or `None` if
    /// no full line arrived before the read timed out.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        match self.source.read(&mut self.chunk) {
            Ok(read) => self.pending.extend_from_slice(&self.chunk[..read]),
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }

        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }
        if self.pending.len() > MAX_LINE_BYTES {
            tracing::warn!(bytes = self.pending.len(), "dropping unterminated input");
            self.pending.clear();
        }
        Ok(None)
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let rest = self.pending.split_off(end + 1);
        let mut line = std::mem::replace(&mut self.pending, rest);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
