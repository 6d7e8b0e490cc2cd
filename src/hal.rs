//! ==============================================================================
//! hal.rs - Serial Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the receiver's serial link.
//!     abstracts the difference between a real uart (via `serialport`) and the
//!     scripted in-memory links the acquisition tests use.
//!
//! relationships:
//!     - used by: acquisition (connect, poll, probe)
//!     - uses: serialport (SystemSerial)
//!
//! ==============================================================================

use serialport::{DataBits, FlowControl, Parity, SerialPortType, StopBits};
use std::io::Read;
use std::time::Duration;

use crate::error::Result;

/// a serial endpoint visible to the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub description: String,
}

/// an open serial connection
pub trait SerialLink: Send {
    /// bytes waiting in the input buffer
    fn bytes_to_read(&mut self) -> Result<usize>;
    /// read into `buffer`; a timeout reads zero bytes
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;
    /// discard anything already buffered
    fn clear_input(&mut self) -> Result<()>;
}

pub trait SerialProvider: Send + Sync {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>>;
    fn open(&self, name: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialLink>>;
}

// ==============================================================================================
// REAL IMPLEMENTATION (serialport)
// ==============================================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }
}

struct SystemLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for SystemLink {
    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

impl SerialProvider for SystemSerial {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let description = match p.port_type {
                    SerialPortType::UsbPort(usb) => usb
                        .product
                        .or(usb.manufacturer)
                        .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                    SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    SerialPortType::PciPort => "PCI".to_string(),
                    SerialPortType::Unknown => "n/a".to_string(),
                };
                PortDescriptor { name: p.port_name, description }
            })
            .collect())
    }

    fn open(&self, name: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialLink>> {
        let port = serialport::new(name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        tracing::debug!("opened serial port {} at {} baud", name, baud_rate);
        Ok(Box::new(SystemLink { port }))
    }
}
