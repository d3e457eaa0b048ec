//! Serial port handling
//!
//! Low-level port access: enumeration, configuration mapping and opening.
//! The transport layer builds on these helpers and owns the open port.

use serialport::SerialPort;
use std::collections::BTreeSet;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::{TransportError, DEFAULT_BAUD_RATE};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    /// 5 data bits
    Five,
    /// 6 data bits
    Six,
    /// 7 data bits
    Seven,
    /// 8 data bits
    Eight,
}

impl DataBits {
    /// Map a persisted numeric value; anything unknown defaults to 8
    pub fn from_number(n: u8) -> Self {
        match n {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    fn to_serialport(self) -> serialport::DataBits {
        match self {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    /// Map a persisted letter ("N"/"E"/"O"); anything unknown defaults to none
    pub fn from_letter(letter: &str) -> Self {
        match letter.trim().to_ascii_uppercase().as_str() {
            "E" => Parity::Even,
            "O" => Parity::Odd,
            _ => Parity::None,
        }
    }

    fn to_serialport(self) -> serialport::Parity {
        match self {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    /// 1 stop bit
    One,
    /// 1.5 stop bits (accepted in configuration; the driver rounds up)
    OnePointFive,
    /// 2 stop bits
    Two,
}

impl StopBits {
    /// Map a persisted numeric value; anything unknown defaults to 1
    pub fn from_number(n: f64) -> Self {
        if n == 1.5 {
            StopBits::OnePointFive
        } else if n == 2.0 {
            StopBits::Two
        } else {
            StopBits::One
        }
    }

    fn to_serialport(self) -> serialport::StopBits {
        match self {
            StopBits::One => serialport::StopBits::One,
            // The serialport crate cannot express 1.5 stop bits; round up
            StopBits::OnePointFive => serialport::StopBits::Two,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl FlowControl {
    /// Map a persisted letter ("N"/"H"/"S"); anything unknown defaults to none
    pub fn from_letter(letter: &str) -> Self {
        match letter.trim().to_ascii_uppercase().as_str() {
            "H" => FlowControl::Hardware,
            "S" => FlowControl::Software,
            _ => FlowControl::None,
        }
    }

    fn to_serialport(self) -> serialport::FlowControl {
        match self {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
            FlowControl::Software => serialport::FlowControl::Software,
        }
    }
}

/// Serial connection configuration
///
/// Immutable once applied to an open connection; changing any field requires
/// a close and reopen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// Configuration for the given port with the instrument defaults
    /// (9600 baud, 8N1, no flow control)
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// List all host-visible serial port names, deduplicated and sorted
///
/// Merges the serialport enumeration with a /dev scan on Linux, where USB
/// adapters occasionally go missing from the API listing.
pub fn discover_ports() -> Vec<String> {
    let mut names: BTreeSet<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| info.port_name)
        .collect();

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    names.insert(format!("/dev/{fname}"));
                }
            }
        }
    }

    names.into_iter().collect()
}

/// Open and configure a serial port according to `config`
///
/// The short read timeout keeps driver reads non-blocking; the transport
/// polls `bytes_to_read` instead of relying on blocking reads.
pub fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>, TransportError> {
    if config.stop_bits == StopBits::OnePointFive {
        tracing::warn!(
            port = %config.port,
            "1.5 stop bits not supported by the driver, using 2"
        );
    }

    serialport::new(&config.port, config.baud_rate)
        .data_bits(config.data_bits.to_serialport())
        .parity(config.parity.to_serialport())
        .stop_bits(config.stop_bits.to_serialport())
        .flow_control(config.flow_control.to_serialport())
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| TransportError::OpenFailed {
            port: config.port.clone(),
            reason: e.to_string(),
        })
}
