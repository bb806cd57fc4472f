//! One solenoid controller board on a serial port.
//!
//! A [`Device`] owns the port identity (hardware id and path), the
//! user-facing settings (start number, polarities, enabled) and, while
//! connected, the open serial link. It keeps a local shadow of its 24
//! output states plus the last bytes actually put on the wire, so only
//! the groups whose wire bytes change are retransmitted.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{self, GROUP_COUNT, GROUP_TAGS, SOLENOIDS_PER_DEVICE};
use crate::error::HardwareError;

/// Baud rate all controller boards run at.
pub const BAUD_RATE: u32 = 115_200;

/// Write timeout applied to opened ports.
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// A writable serial connection.
///
/// Production code opens real ports through [`serial_opener`]; tests
/// substitute recording fakes.
pub trait SerialLink: Send {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) -> std::io::Result<()>;
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        Write::write_all(self, data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Write::flush(self)
    }
}

/// Strategy for opening a link to a port path.
pub type LinkOpener =
    Arc<dyn Fn(&str) -> Result<Box<dyn SerialLink>, HardwareError> + Send + Sync>;

/// The production opener: real serial ports at the controller baud rate.
pub fn serial_opener() -> LinkOpener {
    Arc::new(|path| {
        let port = serialport::new(path, BAUD_RATE)
            .timeout(WRITE_TIMEOUT)
            .open()?;
        Ok(Box::new(port) as Box<dyn SerialLink>)
    })
}

/// Identity of a present serial port, as reported by a scan.
#[derive(Clone, Debug, PartialEq)]
pub struct PortSummary {
    /// Stable hardware id (VID/PID/serial); empty when the platform
    /// reports none.
    pub hwid: String,
    /// OS device path, e.g. `/dev/ttyACM0`.
    pub path: String,
    /// Human-readable product description.
    pub description: String,
}

/// List the serial ports currently present on the system.
pub fn scan_ports() -> Vec<PortSummary> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::warn!("Serial port scan failed: {}", err);
            return Vec::new();
        }
    };
    ports
        .into_iter()
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => PortSummary {
                hwid: format!(
                    "USB VID:PID={:04X}:{:04X} SER={}",
                    usb.vid,
                    usb.pid,
                    usb.serial_number.unwrap_or_default()
                ),
                path: port.port_name,
                description: usb.product.unwrap_or_default(),
            },
            _ => PortSummary {
                hwid: String::new(),
                path: port.port_name,
                description: String::new(),
            },
        })
        .collect()
}

/// One controller board and its settings.
pub struct Device {
    /// Port identity from the last scan that saw this device.
    pub port: PortSummary,
    /// Rig-global number of this device's first output.
    pub start_number: u32,
    /// Per-group output inversion flags.
    pub polarities: [bool; GROUP_COUNT],
    /// Whether the user wants this device driven.
    pub enabled: bool,
    /// Whether the device's port was present at the last rescan.
    pub available: bool,
    connection: Option<Box<dyn SerialLink>>,
    local_states: [bool; SOLENOIDS_PER_DEVICE],
    /// The group bytes last transmitted; the handshake sets them to
    /// `0x00`, which under inverted polarity differs from logical
    /// all-off.
    wire_bytes: [u8; GROUP_COUNT],
}

impl Device {
    pub fn new(port: PortSummary) -> Self {
        Self {
            port,
            start_number: 0,
            polarities: [false; GROUP_COUNT],
            enabled: false,
            available: true,
            connection: None,
            local_states: [false; SOLENOIDS_PER_DEVICE],
            wire_bytes: [0x00; GROUP_COUNT],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the device's port and send the handshake.
    ///
    /// The handshake clears all three output groups and flushes, so a
    /// freshly connected board starts from a known all-off state. The
    /// local shadow is reset to match.
    pub fn connect(&mut self, opener: &LinkOpener) -> Result<(), HardwareError> {
        if self.connection.is_some() {
            return Ok(());
        }
        let mut link = opener(&self.port.path)?;
        for tag in GROUP_TAGS {
            link.write_all(&[tag, 0x00])?;
        }
        link.flush()?;
        self.local_states = [false; SOLENOIDS_PER_DEVICE];
        self.wire_bytes = [0x00; GROUP_COUNT];
        self.connection = Some(link);
        log::info!("Connected to device at {}", self.port.path);
        Ok(())
    }

    /// Drop the connection, if any. The local shadow is kept; the next
    /// connect resets it alongside the board.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            log::info!("Disconnected from device at {}", self.port.path);
        }
    }

    /// The rig-global output numbers this device covers.
    pub fn covers(&self, solenoid_number: u32) -> bool {
        solenoid_number >= self.start_number
            && solenoid_number < self.start_number + SOLENOIDS_PER_DEVICE as u32
    }

    /// Push the rig-global state map to the board.
    ///
    /// Only outputs this device covers are considered; numbers absent
    /// from the map keep their previous local state. Groups whose
    /// encoded byte matches what is already on the wire are not
    /// retransmitted.
    pub fn set_solenoids(
        &mut self,
        states: &HashMap<u32, bool>,
    ) -> Result<(), HardwareError> {
        for (&number, &on) in states {
            if self.covers(number) {
                self.local_states[(number - self.start_number) as usize] = on;
            }
        }

        let connection = self.connection.as_mut().ok_or(HardwareError::NotConnected)?;
        let new_bytes = codec::encode(&self.local_states, self.polarities);
        for group in 0..GROUP_COUNT {
            if new_bytes[group] != self.wire_bytes[group] {
                connection.write_all(&[GROUP_TAGS[group], new_bytes[group]])?;
                self.wire_bytes[group] = new_bytes[group];
            }
        }
        Ok(())
    }

    /// One-line status for listings and logs.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] outputs {}..{} {} {}",
            self.port.path,
            if self.port.description.is_empty() {
                "unknown"
            } else {
                &self.port.description
            },
            self.start_number,
            self.start_number + SOLENOIDS_PER_DEVICE as u32 - 1,
            if self.enabled { "enabled" } else { "disabled" },
            if self.is_connected() {
                "connected"
            } else if self.available {
                "available"
            } else {
                "missing"
            },
        )
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("port", &self.port)
            .field("start_number", &self.start_number)
            .field("polarities", &self.polarities)
            .field("enabled", &self.enabled)
            .field("available", &self.available)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A link that records every write and flush.
    #[derive(Clone, Default)]
    pub struct RecordingLink {
        pub log: Arc<Mutex<Vec<Vec<u8>>>>,
        pub flushes: Arc<Mutex<usize>>,
    }

    impl RecordingLink {
        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.log.lock().unwrap().clone()
        }

        pub fn flush_count(&self) -> usize {
            *self.flushes.lock().unwrap()
        }

        pub fn clear(&self) {
            self.log.lock().unwrap().clear();
        }
    }

    impl SerialLink for RecordingLink {
        fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
            self.log.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }

    pub fn port(hwid: &str, path: &str) -> PortSummary {
        PortSummary {
            hwid: hwid.to_string(),
            path: path.to_string(),
            description: "Test board".to_string(),
        }
    }

    /// Opener that always hands out clones of the given recording link.
    pub fn recording_opener(link: &RecordingLink) -> LinkOpener {
        let link = link.clone();
        Arc::new(move |_path| Ok(Box::new(link.clone()) as Box<dyn SerialLink>))
    }

    /// Connect a device to a fresh recording link, returning the link.
    /// Mirrors the post-handshake state: shadow clear, wire all-zero.
    pub fn connect_recording(device: &mut Device) -> RecordingLink {
        let link = RecordingLink::default();
        let handle = link.clone();
        device.connection = Some(Box::new(handle));
        device.local_states = [false; SOLENOIDS_PER_DEVICE];
        device.wire_bytes = [0x00; GROUP_COUNT];
        link
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_connect_handshake_clears_all_groups() {
        let mut device = Device::new(port("hwid-1", "/dev/ttyTEST0"));
        let link = RecordingLink::default();

        device.connect(&recording_opener(&link)).unwrap();

        assert_eq!(
            link.frames(),
            vec![vec![b'A', 0x00], vec![b'B', 0x00], vec![b'C', 0x00]]
        );
        assert_eq!(link.flush_count(), 1);
        assert!(device.is_connected());

        // Connecting again is a no-op.
        link.clear();
        device.connect(&recording_opener(&link)).unwrap();
        assert!(link.frames().is_empty());
    }

    #[test]
    fn test_set_solenoids_writes_only_changed_groups() {
        let mut device = Device::new(port("hwid-1", "/dev/ttyTEST0"));
        let link = connect_recording(&mut device);

        let mut states = HashMap::new();
        states.insert(5, true);
        device.set_solenoids(&states).unwrap();
        assert_eq!(link.frames(), vec![vec![b'A', 0x20]]);

        // Same state again: nothing on the wire.
        link.clear();
        device.set_solenoids(&states).unwrap();
        assert!(link.frames().is_empty());

        // Turning on an output in group C touches only group C.
        link.clear();
        states.insert(23, true);
        device.set_solenoids(&states).unwrap();
        assert_eq!(link.frames(), vec![vec![b'C', 0x80]]);
    }

    #[test]
    fn test_set_solenoids_respects_start_number() {
        let mut device = Device::new(port("hwid-2", "/dev/ttyTEST1"));
        device.start_number = 24;
        let link = connect_recording(&mut device);

        // Output 5 belongs to another device; output 29 is this
        // device's slot 5.
        let mut states = HashMap::new();
        states.insert(5, true);
        device.set_solenoids(&states).unwrap();
        assert!(link.frames().is_empty());

        states.insert(29, true);
        device.set_solenoids(&states).unwrap();
        assert_eq!(link.frames(), vec![vec![b'A', 0x20]]);
    }

    #[test]
    fn test_set_solenoids_applies_polarity() {
        let mut device = Device::new(port("hwid-3", "/dev/ttyTEST2"));
        device.polarities = [true, false, false];
        let link = connect_recording(&mut device);

        // All outputs logically off, group A inverted on the wire.
        let mut states = HashMap::new();
        states.insert(0, false);
        device.set_solenoids(&states).unwrap();
        assert_eq!(link.frames(), vec![vec![b'A', 0xFF]]);

        // Already on the wire: not retransmitted.
        link.clear();
        device.set_solenoids(&states).unwrap();
        assert!(link.frames().is_empty());
    }

    #[test]
    fn test_inverted_group_corrected_right_after_connect() {
        // The handshake drives every group to wire 0x00. With polarity
        // set, logical all-off is wire 0xFF, so the first flush must
        // transmit even though no logical state changed.
        let mut device = Device::new(port("hwid-6", "/dev/ttyTEST5"));
        device.polarities = [true, false, false];
        let link = RecordingLink::default();
        device.connect(&recording_opener(&link)).unwrap();
        link.clear();

        device.set_solenoids(&HashMap::new()).unwrap();
        assert_eq!(link.frames(), vec![vec![b'A', 0xFF]]);

        link.clear();
        device.set_solenoids(&HashMap::new()).unwrap();
        assert!(link.frames().is_empty());
    }

    #[test]
    fn test_set_solenoids_requires_connection() {
        let mut device = Device::new(port("hwid-4", "/dev/ttyTEST3"));
        let states = HashMap::new();
        assert!(matches!(
            device.set_solenoids(&states),
            Err(HardwareError::NotConnected)
        ));
    }

    #[test]
    fn test_covers() {
        let mut device = Device::new(port("hwid-5", "/dev/ttyTEST4"));
        device.start_number = 24;
        assert!(!device.covers(23));
        assert!(device.covers(24));
        assert!(device.covers(47));
        assert!(!device.covers(48));
    }
}
