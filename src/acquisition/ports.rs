//! Serial port enumeration and diagnostics for the admin panel.
//!
//! Probing opens a non-selected port briefly and reads at most one line. The
//! selected port is never probed so the live connection is left alone.

use std::time::{Duration, Instant};

use super::framing::{decode_frame, LineFramer};
use super::AcquisitionControl;
use crate::domain::{PortInfo, PortStatus, PortsReport, SIMULATOR_PORT};
use crate::hal::{SerialLink, SerialProvider};

const PROBE_IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Build the status-tagged list of the simulator plus every visible port.
pub fn ports_report(control: &AcquisitionControl) -> PortsReport {
    let current = control.target_port();
    let simulator_selected = current == SIMULATOR_PORT;

    let mut ports = vec![PortInfo {
        port: SIMULATOR_PORT.to_string(),
        description: "Data simulator".to_string(),
        status: if simulator_selected { PortStatus::Connected } else { PortStatus::Available },
        active: simulator_selected,
    }];

    let visible = match control.provider().available_ports() {
        Ok(visible) => visible,
        Err(e) => {
            tracing::warn!("failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    };

    for descriptor in visible {
        let (status, active) = if descriptor.name == current {
            selected_status(control, &current)
        } else {
            probe(control.provider(), &descriptor.name, control.baud_rate(), control.probe_timeout())
        };
        ports.push(PortInfo {
            port: descriptor.name,
            description: descriptor.description,
            status,
            active,
        });
    }

    PortsReport { current, ports }
}

/// link and data state only count when they belong to `port`
fn selected_status(control: &AcquisitionControl, port: &str) -> (PortStatus, bool) {
    if !control.is_connected_to(port) {
        (PortStatus::ErrorConnecting, false)
    } else if control.has_recent_data_on(port) {
        (PortStatus::ActiveData, true)
    } else {
        (PortStatus::Connected, false)
    }
}

/// Classify a port that is not the acquisition target.
pub fn probe(provider: &dyn SerialProvider, name: &str, baud_rate: u32, timeout: Duration) -> (PortStatus, bool) {
    let mut link = match provider.open(name, baud_rate, timeout) {
        Ok(link) => link,
        Err(e) => {
            tracing::debug!("probe of {} failed: {}", name, e);
            return (PortStatus::Busy, false);
        }
    };

    match read_line(link.as_mut(), Instant::now() + timeout) {
        Some(line) if decode_frame(&line).is_some() => (PortStatus::AvailableWithData, true),
        _ => (PortStatus::Available, false),
    }
}

/// Read one complete line, giving up at `deadline` or on a read error.
fn read_line(link: &mut dyn SerialLink, deadline: Instant) -> Option<Vec<u8>> {
    let mut framer = LineFramer::new();
    let mut buffer = [0u8; 256];
    while Instant::now() < deadline {
        match link.read(&mut buffer) {
            Ok(0) => std::thread::sleep(PROBE_IDLE_SLEEP),
            Ok(n) => {
                framer.push(&buffer[..n]);
                if let Some(line) = framer.next_frame() {
                    return Some(line);
                }
            }
            Err(_) => return None,
        }
    }
    None
}
