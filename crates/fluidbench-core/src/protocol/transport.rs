//! Transport management
//!
//! Owns the physical serial connection on behalf of both device protocols:
//! open/close lifecycle, raw writes, polled reads with retry, line-oriented
//! receive buffering and a watchdog that detects the port vanishing while
//! connected (USB cable pulled, adapter re-enumerated).
//!
//! Connectivity and data events are delivered over plain mpsc channels so
//! the core stays decoupled from whatever UI toolkit sits above it.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::frame::hex_dump;
use super::serial::{self, SerialConfig};
use super::{TransportError, DEFAULT_READ_RETRIES, DEFAULT_READ_TIMEOUT_MS};

/// Period of the port watchdog re-enumeration
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

/// Side-channel events emitted by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection to the named port was opened
    Connected(String),
    /// The connection was closed
    Disconnected,
    /// The active port disappeared from the enumeration; the transport has
    /// force-disconnected
    PortLost(String),
    /// Raw bytes were written to the link
    DataSent(Vec<u8>),
    /// Raw bytes were read back in response to a command
    DataReceived(Vec<u8>),
    /// A complete, trimmed, non-empty line arrived on the link
    LineReceived(String),
}

/// Source of the current port enumeration, injectable for tests
pub trait PortScanner: Send + Sync {
    /// Names of the ports currently visible to the host
    fn scan(&self) -> Vec<String>;
}

/// Scanner backed by the OS enumeration
pub struct SystemPortScanner;

impl PortScanner for SystemPortScanner {
    fn scan(&self) -> Vec<String> {
        serial::discover_ports()
    }
}

/// Device-independent serial transport contract
///
/// The protocol controllers talk to this trait so they can run against the
/// real [`SerialTransport`], the scripted [`super::MockTransport`] or the
/// demo-mode simulator interchangeably.
pub trait Transport: Send + Sync {
    /// Whether a connection is currently open
    fn is_connected(&self) -> bool;

    /// Name of the active port, if connected
    fn port_name(&self) -> Option<String>;

    /// Write raw bytes to the link
    ///
    /// Fails with [`TransportError::NotConnected`] while disconnected.
    /// Returns `Ok(false)` (logged, not raised) when the driver reports a
    /// write error; callers treat that as a recoverable failure and may
    /// retry.
    fn write_bytes(&self, data: &[u8]) -> Result<bool, TransportError>;

    /// Non-blocking drain of whatever the driver has buffered
    fn read_available(&self) -> Result<Vec<u8>, TransportError>;

    /// Poll [`Transport::read_available`] up to `retries` times, sleeping
    /// `per_attempt_timeout` between empty attempts
    ///
    /// Returns the FIRST non-empty read, which is not necessarily
    /// `expected_len` bytes; callers validate the length themselves.
    /// Returns an empty Vec when every attempt comes back empty. This is a
    /// coarse polling retry, not a byte-accumulating read: a partial read is
    /// returned as-is and the caller's length check decides what to do.
    fn read_with_retry(
        &self,
        expected_len: usize,
        retries: u32,
        per_attempt_timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        for attempt in 1..=retries {
            let chunk = self.read_available()?;
            if !chunk.is_empty() {
                if expected_len > 0 && chunk.len() != expected_len {
                    debug!(
                        expected = expected_len,
                        actual = chunk.len(),
                        "read returned unexpected length, passing through"
                    );
                }
                return Ok(chunk);
            }
            if attempt < retries {
                thread::sleep(per_attempt_timeout);
            }
        }
        Ok(Vec::new())
    }

    /// Write a textual command and wait briefly for any response
    ///
    /// Returns whether a non-empty response was obtained.
    fn send_command(&self, command: &str) -> Result<bool, TransportError> {
        if !self.write_bytes(command.as_bytes())? {
            return Ok(false);
        }
        let response = self.read_with_retry(
            0,
            DEFAULT_READ_RETRIES,
            Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        )?;
        Ok(!response.is_empty())
    }
}

struct Inner {
    port: Option<Box<dyn SerialPort>>,
    port_name: Option<String>,
    line_buffer: Vec<u8>,
}

impl Inner {
    /// Append received bytes and extract every complete line
    ///
    /// A line is a maximal `\n`-terminated run, trimmed of surrounding
    /// whitespace and kept only when non-empty. Bytes after the last
    /// terminator stay buffered for the next read.
    fn drain_lines(&mut self, incoming: &[u8]) -> Vec<String> {
        self.line_buffer.extend_from_slice(incoming);
        let mut lines = Vec::new();
        while let Some(pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }
}

/// Serial transport bound to at most one open port at a time
///
/// Created once per application session; protocol controllers hold shared
/// handles and never own the physical connection. A watchdog thread runs for
/// the lifetime of the transport and force-disconnects when the active port
/// drops out of the enumeration.
pub struct SerialTransport {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    scanner: Box<dyn PortScanner>,
}

impl SerialTransport {
    /// Create a transport backed by the OS port enumeration
    pub fn new() -> Arc<Self> {
        Self::with_scanner(Box::new(SystemPortScanner))
    }

    /// Create a transport with a custom port enumeration source
    pub fn with_scanner(scanner: Box<dyn PortScanner>) -> Arc<Self> {
        let transport = Arc::new(Self {
            inner: Mutex::new(Inner {
                port: None,
                port_name: None,
                line_buffer: Vec::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            scanner,
        });

        let weak: Weak<SerialTransport> = Arc::downgrade(&transport);
        let spawned = thread::Builder::new()
            .name("fluidbench-port-watchdog".into())
            .spawn(move || loop {
                thread::sleep(WATCHDOG_PERIOD);
                match weak.upgrade() {
                    Some(transport) => transport.liveness_tick(),
                    None => break,
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn port watchdog thread");
        }

        transport
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an event listener; each listener gets every future event
    pub fn subscribe(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn emit(&self, event: TransportEvent) {
        // Drop listeners whose receiving end has gone away
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Open a connection with the given configuration
    ///
    /// Any existing connection is closed first. Fails with
    /// [`TransportError::PortUnavailable`] when the named port is absent
    /// from the current enumeration, or [`TransportError::OpenFailed`] on a
    /// driver-level failure.
    pub fn open(&self, config: &SerialConfig) -> Result<(), TransportError> {
        self.close();

        let available = self.scanner.scan();
        if !available.iter().any(|name| name == &config.port) {
            error!(port = %config.port, ?available, "requested port not present");
            return Err(TransportError::PortUnavailable(config.port.clone()));
        }

        let port = serial::open_port(config)?;

        let mut inner = self.lock();
        inner.port = Some(port);
        inner.port_name = Some(config.port.clone());
        inner.line_buffer.clear();
        drop(inner);

        info!(port = %config.port, baud = config.baud_rate, "serial port connected");
        self.emit(TransportEvent::Connected(config.port.clone()));
        Ok(())
    }

    /// Close the connection; a no-op when already disconnected
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.port.is_none() {
            return;
        }
        inner.port = None;
        let name = inner.port_name.take();
        inner.line_buffer.clear();
        drop(inner);

        info!(port = ?name, "serial port disconnected");
        self.emit(TransportEvent::Disconnected);
    }

    /// One watchdog pass: re-enumerate and force-disconnect when the active
    /// port has vanished
    ///
    /// The port-lost transition happens under the same lock as every
    /// read/write, so an in-flight command observes either a consistent
    /// "still connected" or a clean [`TransportError::NotConnected`]. Once
    /// disconnected the name is cleared, so the loss is reported exactly
    /// once, not on every subsequent tick.
    pub fn liveness_tick(&self) {
        let mut inner = self.lock();
        let Some(name) = inner.port_name.clone() else {
            return;
        };
        if self.scanner.scan().iter().any(|p| p == &name) {
            return;
        }

        inner.port = None;
        inner.port_name = None;
        inner.line_buffer.clear();
        drop(inner);

        error!(port = %name, "active port disappeared, forcing disconnect");
        self.emit(TransportEvent::PortLost(name));
        self.emit(TransportEvent::Disconnected);
    }

    #[cfg(test)]
    pub(crate) fn attach_for_test(&self, port: Box<dyn SerialPort>, name: &str) {
        let mut inner = self.lock();
        inner.port = Some(port);
        inner.port_name = Some(name.to_string());
        inner.line_buffer.clear();
        drop(inner);
        self.emit(TransportEvent::Connected(name.to_string()));
    }
}

impl Transport for SerialTransport {
    fn is_connected(&self) -> bool {
        self.lock().port.is_some()
    }

    fn port_name(&self) -> Option<String> {
        self.lock().port_name.clone()
    }

    fn write_bytes(&self, data: &[u8]) -> Result<bool, TransportError> {
        let mut inner = self.lock();
        let port = inner.port.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = port.write_all(data) {
            error!(error = %e, bytes = %hex_dump(data), "serial write failed");
            return Ok(false);
        }
        if let Err(e) = port.flush() {
            warn!(error = %e, "serial flush failed after write");
        }
        drop(inner);

        debug!(bytes = %hex_dump(data), "wrote bytes");
        self.emit(TransportEvent::DataSent(data.to_vec()));
        Ok(true)
    }

    fn read_available(&self) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        let port = inner.port.as_mut().ok_or(TransportError::NotConnected)?;

        let available = port
            .bytes_to_read()
            .map_err(|e| TransportError::SerialError(e.to_string()))? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) => buf.truncate(n),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(TransportError::SerialError(e.to_string())),
        }

        let lines = inner.drain_lines(&buf);
        drop(inner);

        debug!(bytes = %hex_dump(&buf), "read bytes");
        for line in lines {
            debug!(%line, "received line");
            self.emit(TransportEvent::LineReceived(line));
        }
        Ok(buf)
    }

    fn send_command(&self, command: &str) -> Result<bool, TransportError> {
        if !self.write_bytes(command.as_bytes())? {
            return Ok(false);
        }
        let response = self.read_with_retry(
            0,
            DEFAULT_READ_RETRIES,
            Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        )?;
        if response.is_empty() {
            warn!(%command, "no response to command");
            return Ok(false);
        }
        self.emit(TransportEvent::DataReceived(response));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// In-memory stand-in for a driver-level port
    struct FakePort {
        rx: Arc<Mutex<VecDeque<u8>>>,
        tx: Arc<Mutex<Vec<u8>>>,
    }

    impl FakePort {
        fn new() -> (Self, Arc<Mutex<VecDeque<u8>>>, Arc<Mutex<Vec<u8>>>) {
            let rx = Arc::new(Mutex::new(VecDeque::new()));
            let tx = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    rx: rx.clone(),
                    tx: tx.clone(),
                },
                rx,
                tx,
            )
        }
    }

    impl io::Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut rx = self.rx.lock().unwrap();
            if rx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl io::Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for FakePort {
        fn name(&self) -> Option<String> {
            Some("FAKE0".into())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(9600)
        }
        fn data_bits(&self) -> serialport::Result<serialport::DataBits> {
            Ok(serialport::DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<serialport::FlowControl> {
            Ok(serialport::FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<serialport::Parity> {
            Ok(serialport::Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<serialport::StopBits> {
            Ok(serialport::StopBits::One)
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(100)
        }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: serialport::DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: serialport::FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: serialport::Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: serialport::StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, _: Duration) -> serialport::Result<()> {
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.rx.lock().unwrap().len() as u32)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _: serialport::ClearBuffer) -> serialport::Result<()> {
            self.rx.lock().unwrap().clear();
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "clone not supported",
            ))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    struct FixedScanner(Arc<Mutex<Vec<String>>>);

    impl PortScanner for FixedScanner {
        fn scan(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn transport_with_ports(ports: Vec<&str>) -> (Arc<SerialTransport>, Arc<Mutex<Vec<String>>>) {
        let ports = Arc::new(Mutex::new(
            ports.into_iter().map(String::from).collect::<Vec<_>>(),
        ));
        let transport = SerialTransport::with_scanner(Box::new(FixedScanner(ports.clone())));
        (transport, ports)
    }

    #[test]
    fn test_write_while_disconnected_fails() {
        let (transport, _ports) = transport_with_ports(vec![]);
        let err = transport.write_bytes(&[0x01]).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(matches!(
            transport.read_available().unwrap_err(),
            TransportError::NotConnected
        ));
    }

    #[test]
    fn test_open_unknown_port_fails_before_driver() {
        let (transport, _ports) = transport_with_ports(vec![]);
        let err = transport.open(&SerialConfig::new("COM99")).unwrap_err();
        assert!(matches!(err, TransportError::PortUnavailable(p) if p == "COM99"));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (transport, _ports) = transport_with_ports(vec![]);
        let events = transport.subscribe();
        transport.close();
        transport.close();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_write_and_read_through_fake_port() {
        let (transport, _ports) = transport_with_ports(vec!["FAKE0"]);
        let (port, rx, tx) = FakePort::new();
        transport.attach_for_test(Box::new(port), "FAKE0");

        assert!(transport.write_bytes(&[0x03, 0x55]).unwrap());
        assert_eq!(tx.lock().unwrap().as_slice(), &[0x03, 0x55]);

        rx.lock().unwrap().extend([0xAA, 0xBB]);
        assert_eq!(transport.read_available().unwrap(), vec![0xAA, 0xBB]);
        assert!(transport.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_line_splitting_across_partial_reads() {
        let (transport, _ports) = transport_with_ports(vec!["FAKE0"]);
        let (port, rx, _tx) = FakePort::new();
        transport.attach_for_test(Box::new(port), "FAKE0");
        let events = transport.subscribe();

        // First chunk has no terminator; nothing may be emitted or lost
        rx.lock().unwrap().extend(*b"  OK");
        transport.read_available().unwrap();
        assert!(events.try_recv().is_err());

        // Terminator arrives along with a blank line and a second fragment
        rx.lock().unwrap().extend(*b" 1\r\n\n/0 st");
        transport.read_available().unwrap();
        rx.lock().unwrap().extend(*b"atus\n");
        transport.read_available().unwrap();

        let mut lines = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::LineReceived(line) = event {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["OK 1".to_string(), "/0 status".to_string()]);
    }

    #[test]
    fn test_read_with_retry_returns_first_nonempty() {
        let (transport, _ports) = transport_with_ports(vec!["FAKE0"]);
        let (port, rx, _tx) = FakePort::new();
        transport.attach_for_test(Box::new(port), "FAKE0");

        // Fewer bytes than expected still end the polling loop
        rx.lock().unwrap().extend([0x01, 0x02, 0x03]);
        let chunk = transport
            .read_with_retry(8, 3, Duration::from_millis(1))
            .unwrap();
        assert_eq!(chunk, vec![0x01, 0x02, 0x03]);

        // All-empty attempts yield an empty result, not an error
        let chunk = transport
            .read_with_retry(8, 3, Duration::from_millis(1))
            .unwrap();
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_port_loss_reported_exactly_once() {
        let (transport, ports) = transport_with_ports(vec!["FAKE0"]);
        let (port, _rx, _tx) = FakePort::new();
        transport.attach_for_test(Box::new(port), "FAKE0");
        let events = transport.subscribe();

        // Port still enumerated: nothing happens
        transport.liveness_tick();
        assert!(events.try_recv().is_err());

        // Port vanishes: one PortLost, then silence on later ticks
        ports.lock().unwrap().clear();
        transport.liveness_tick();
        transport.liveness_tick();
        transport.liveness_tick();

        assert!(!transport.is_connected());
        let lost: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, TransportEvent::PortLost(_)))
            .collect();
        assert_eq!(lost.len(), 1);

        let err = transport.write_bytes(&[0x00]).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
