//! The rig: every controller board known to the application.
//!
//! The rig owns the global output-number space. Each device claims a
//! window of 24 numbers starting at its start number; windows may
//! overlap, in which case one logical output drives several boards.
//! Desired states are accumulated in a map and pushed to the hardware
//! by [`Rig::flush_states`], normally from the USB worker thread.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::codec::SOLENOIDS_PER_DEVICE;
use crate::device::{Device, LinkOpener, PortSummary};

pub struct Rig {
    pub devices: Vec<Device>,
    solenoid_states: HashMap<u32, bool>,
    opener: LinkOpener,
}

impl Rig {
    pub fn new(opener: LinkOpener) -> Self {
        Self {
            devices: Vec::new(),
            solenoid_states: HashMap::new(),
            opener,
        }
    }

    /// Reconcile the device list against a fresh port scan.
    ///
    /// Present ports are matched to known devices by hardware id, or by
    /// path when neither side has one; every port claims at most one
    /// device. Unmatched ports become new devices, disabled until the
    /// user opts in. Devices whose port is gone are marked unavailable
    /// and disconnected. Enabled available devices are (re)connected; a
    /// failed connect logs and leaves the device for the next rescan.
    pub fn rescan_for_devices(&mut self, ports: &[PortSummary]) {
        let mut claimed = vec![false; ports.len()];
        for device in &mut self.devices {
            let found = ports.iter().enumerate().find(|(i, port)| {
                !claimed[*i]
                    && if port.hwid.is_empty() {
                        device.port.hwid.is_empty() && device.port.path == port.path
                    } else {
                        device.port.hwid == port.hwid
                    }
            });
            match found {
                Some((i, port)) => {
                    claimed[i] = true;
                    device.port = port.clone();
                    device.available = true;
                }
                None => {
                    device.available = false;
                    device.disconnect();
                }
            }
        }

        for (i, port) in ports.iter().enumerate() {
            if !claimed[i] {
                log::info!("New device found at {}", port.path);
                self.devices.push(Device::new(port.clone()));
            }
        }

        for device in &mut self.devices {
            if device.enabled && device.available {
                if let Err(err) = device.connect(&self.opener) {
                    log::warn!("Could not connect to {}: {}", device.port.path, err);
                }
            } else {
                device.disconnect();
            }
        }
    }

    /// Record the desired state of one logical output.
    ///
    /// Takes effect on the hardware at the next flush.
    pub fn set_solenoid_state(&mut self, number: u32, open: bool) {
        self.solenoid_states.insert(number, open);
    }

    /// The desired state of one logical output, defaulting to closed.
    ///
    /// A number seen here for the first time is recorded as closed so
    /// that subsequent flushes drive it explicitly.
    pub fn get_solenoid_state(&mut self, number: u32) -> bool {
        *self.solenoid_states.entry(number).or_insert(false)
    }

    /// Push the accumulated state map to every connected enabled device.
    ///
    /// A write failure drops that device's connection; the next rescan
    /// retries.
    pub fn flush_states(&mut self) {
        for device in &mut self.devices {
            if !device.enabled || !device.is_connected() {
                continue;
            }
            if let Err(err) = device.set_solenoids(&self.solenoid_states) {
                log::warn!("Write to {} failed: {}", device.port.path, err);
                device.disconnect();
            }
        }
    }

    /// The sorted, deduplicated output numbers reachable through
    /// enabled connected devices. This is the authoritative view of
    /// what the user can actually toggle.
    pub fn connected_solenoid_numbers(&self) -> Vec<u32> {
        let mut numbers = BTreeSet::new();
        for device in &self.devices {
            if device.enabled && device.is_connected() {
                for slot in 0..SOLENOIDS_PER_DEVICE as u32 {
                    numbers.insert(device.start_number + slot);
                }
            }
        }
        numbers.into_iter().collect()
    }

    pub fn disconnect_all(&mut self) {
        for device in &mut self.devices {
            device.disconnect();
        }
    }
}

/// Shared handle to the rig.
///
/// Cloned freely across the runtime, the USB worker and script API
/// calls; all access goes through [`RigManager::with_rig`].
#[derive(Clone)]
pub struct RigManager {
    inner: Arc<Mutex<Rig>>,
}

impl RigManager {
    pub fn new(opener: LinkOpener) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Rig::new(opener))),
        }
    }

    pub fn with_rig<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Rig) -> R,
    {
        let mut rig = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut rig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::{port, recording_opener, RecordingLink};

    fn test_rig(link: &RecordingLink) -> Rig {
        Rig::new(recording_opener(link))
    }

    #[test]
    fn test_rescan_adds_new_devices_disabled() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        rig.rescan_for_devices(&[port("hwid-1", "/dev/ttyACM0")]);

        assert_eq!(rig.devices.len(), 1);
        assert!(!rig.devices[0].enabled);
        assert!(rig.devices[0].available);
        assert!(!rig.devices[0].is_connected());
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        let ports = [
            port("hwid-1", "/dev/ttyACM0"),
            port("", "/dev/ttyUSB0"),
            port("", "/dev/ttyUSB1"),
        ];
        rig.rescan_for_devices(&ports);
        assert_eq!(rig.devices.len(), 3);
        rig.rescan_for_devices(&ports);
        rig.rescan_for_devices(&ports);
        assert_eq!(rig.devices.len(), 3);
    }

    #[test]
    fn test_rescan_tracks_path_change_by_hwid() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        rig.rescan_for_devices(&[port("hwid-1", "/dev/ttyACM0")]);
        rig.devices[0].start_number = 24;

        // Same board re-enumerated at a different path keeps its settings.
        rig.rescan_for_devices(&[port("hwid-1", "/dev/ttyACM3")]);
        assert_eq!(rig.devices.len(), 1);
        assert_eq!(rig.devices[0].port.path, "/dev/ttyACM3");
        assert_eq!(rig.devices[0].start_number, 24);
    }

    #[test]
    fn test_rescan_marks_missing_devices_unavailable() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        rig.rescan_for_devices(&[port("hwid-1", "/dev/ttyACM0")]);
        rig.devices[0].enabled = true;
        rig.rescan_for_devices(&[port("hwid-1", "/dev/ttyACM0")]);
        assert!(rig.devices[0].is_connected());

        rig.rescan_for_devices(&[]);
        assert_eq!(rig.devices.len(), 1);
        assert!(!rig.devices[0].available);
        assert!(!rig.devices[0].is_connected());
    }

    #[test]
    fn test_enabled_devices_connect_on_rescan() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        let ports = [port("hwid-1", "/dev/ttyACM0")];
        rig.rescan_for_devices(&ports);
        rig.devices[0].enabled = true;
        rig.rescan_for_devices(&ports);

        assert!(rig.devices[0].is_connected());
        // Handshake went out once.
        assert_eq!(link.flush_count(), 1);

        // Disabling disconnects at the next rescan.
        rig.devices[0].enabled = false;
        rig.rescan_for_devices(&ports);
        assert!(!rig.devices[0].is_connected());
    }

    #[test]
    fn test_flush_routes_to_covering_device() {
        let link_x = RecordingLink::default();
        let link_y = RecordingLink::default();
        let mut rig = Rig::new(recording_opener(&link_x));
        rig.rescan_for_devices(&[port("hwid-x", "/dev/ttyACM0")]);
        rig.devices[0].enabled = true;
        rig.rescan_for_devices(&[port("hwid-x", "/dev/ttyACM0")]);

        // Second device with start number 24 on its own link.
        let mut second = Device::new(port("hwid-y", "/dev/ttyACM1"));
        second.start_number = 24;
        second.enabled = true;
        second.connect(&recording_opener(&link_y)).unwrap();
        rig.devices.push(second);
        link_x.clear();
        link_y.clear();

        rig.set_solenoid_state(5, true);
        rig.flush_states();

        assert_eq!(link_x.frames(), vec![vec![b'A', 0x20]]);
        assert!(link_y.frames().is_empty());
    }

    #[test]
    fn test_get_solenoid_state_lazily_registers() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        assert!(!rig.get_solenoid_state(7));
        rig.set_solenoid_state(7, true);
        assert!(rig.get_solenoid_state(7));
    }

    #[test]
    fn test_connected_solenoid_numbers_deduplicates_overlap() {
        let link = RecordingLink::default();
        let mut rig = test_rig(&link);
        let ports = [
            port("hwid-1", "/dev/ttyACM0"),
            port("hwid-2", "/dev/ttyACM1"),
        ];
        rig.rescan_for_devices(&ports);
        rig.devices[0].enabled = true;
        rig.devices[1].enabled = true;
        rig.devices[1].start_number = 12; // overlaps 12..=23

        // Not connected yet, so nothing is toggleable.
        assert!(rig.connected_solenoid_numbers().is_empty());

        rig.rescan_for_devices(&ports);
        let numbers = rig.connected_solenoid_numbers();
        assert_eq!(numbers.len(), 36);
        assert_eq!(numbers.first(), Some(&0));
        assert_eq!(numbers.last(), Some(&35));
    }

    #[test]
    fn test_manager_shares_one_rig() {
        let link = RecordingLink::default();
        let manager = RigManager::new(recording_opener(&link));
        let clone = manager.clone();
        clone.with_rig(|rig| rig.set_solenoid_state(3, true));
        assert!(manager.with_rig(|rig| rig.get_solenoid_state(3)));
    }
}
