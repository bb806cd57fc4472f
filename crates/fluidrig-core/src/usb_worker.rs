//! Background thread driving serial I/O.
//!
//! All hardware traffic happens here: the worker periodically rescans
//! the system's serial ports to reconcile the device list, and flushes
//! the rig's desired output states on a much faster cadence. Script
//! execution never blocks on a serial write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::device::scan_ports;
use crate::rig::RigManager;

/// Cadence of state flushes to connected devices.
const FLUSH_INTERVAL: Duration = Duration::from_millis(20);

pub struct UsbWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl UsbWorker {
    /// Start the worker. `rescan_interval` controls how often the port
    /// list is re-enumerated; flushes run at [`FLUSH_INTERVAL`].
    pub fn spawn(rig: RigManager, rescan_interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("usb-worker".to_string())
            .spawn(move || run(rig, rescan_interval, stop_flag))
            .ok();
        if thread.is_none() {
            log::error!("Could not spawn USB worker thread");
        }
        Self { stop, thread }
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("USB worker thread panicked");
            }
        }
    }
}

impl Drop for UsbWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rig: RigManager, rescan_interval: Duration, stop: Arc<AtomicBool>) {
    log::debug!("USB worker started");
    let mut last_scan: Option<Instant> = None;
    while !stop.load(Ordering::SeqCst) {
        let due = last_scan.map_or(true, |at| at.elapsed() >= rescan_interval);
        if due {
            let ports = scan_ports();
            rig.with_rig(|rig| rig.rescan_for_devices(&ports));
            last_scan = Some(Instant::now());
        }
        rig.with_rig(|rig| rig.flush_states());
        std::thread::sleep(FLUSH_INTERVAL);
    }
    rig.with_rig(|rig| rig.disconnect_all());
    log::debug!("USB worker stopped");
}
