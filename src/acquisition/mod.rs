//! ==============================================================================
//! acquisition - telemetry source (serial receiver or simulator)
//! ==============================================================================
//!
//! purpose:
//!     produces an endless sequence of telemetry records on a dedicated
//!     thread, independent of the web server, so a stalled or absent device
//!     never blocks client handling.
//!
//! state machine (hardware producer):
//!
//! ```text
//!     Disconnected ──> Connecting ──(open ok)──> Connected
//!          ^               │                         │
//!          │         (open failed:                   │ read error or
//!          │        reconnect delay)                 │ port switch
//!          └───────────────┴──────── Closing <───────┘
//!
//!     while connected the input is polled without blocking; each complete
//!     line is decoded as json and malformed lines are dropped. only link
//!     failures move the machine, decode failures never do.
//! ```
//!
//! relationships:
//!     - uses: hal.rs (SerialProvider / SerialLink)
//!     - feeds: broadcast.rs (via a bounded tokio channel)
//!     - shared with: broadcast.rs (AcquisitionControl, for port switching
//!       and diagnostics)
//!
//! ==============================================================================

pub mod framing;
pub mod ports;
pub mod simulator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::{SerialConfig, SimulatorConfig};
use crate::domain::{PortsReport, TelemetryRecord, SIMULATOR_PORT};
use crate::error::HubError;
use crate::hal::{SerialLink, SerialProvider};
use framing::{decode_frame, LineFramer};
use simulator::Simulator;

/// granularity at which sleeping loops notice a stop request
const SLEEP_SLICE: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 1024;

// ==============================================================================
// shared control
// ==============================================================================
// read and written from both the acquisition thread and the request tasks.

pub struct AcquisitionControl {
    provider: Arc<dyn SerialProvider>,
    running: AtomicBool,
    target: Mutex<String>,
    /// port the open hardware link belongs to
    link_port: Mutex<Option<String>>,
    /// port and time of the last decoded frame
    last_valid_data: Mutex<Option<(String, Instant)>>,
    baud_rate: u32,
    probe_timeout: Duration,
    active_data_window: Duration,
}

impl AcquisitionControl {
    pub fn new(provider: Arc<dyn SerialProvider>, serial: &SerialConfig) -> Self {
        Self {
            provider,
            running: AtomicBool::new(false),
            target: Mutex::new(serial.port.clone()),
            link_port: Mutex::new(None),
            last_valid_data: Mutex::new(None),
            baud_rate: serial.baud_rate,
            probe_timeout: serial.probe_timeout(),
            active_data_window: serial.active_data_window(),
        }
    }

    pub fn provider(&self) -> &dyn SerialProvider {
        self.provider.as_ref()
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// ask the acquisition thread to exit at its next check
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn target_port(&self) -> String {
        self.target.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Retarget acquisition. The open link is closed on the next tick; until
    /// then it no longer counts as a connection to the target.
    pub fn set_port(&self, port: &str) {
        tracing::info!("switching serial port to {}", port);
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = port.to_string();
    }

    /// true while a hardware link to `port` is open
    pub fn is_connected_to(&self, port: &str) -> bool {
        self.link_port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(port)
    }

    fn set_link_port(&self, port: Option<&str>) {
        *self.link_port.lock().unwrap_or_else(PoisonError::into_inner) = port.map(str::to_string);
    }

    fn mark_data(&self, port: &str) {
        *self.last_valid_data.lock().unwrap_or_else(PoisonError::into_inner) = Some((port.to_string(), Instant::now()));
    }

    /// a frame from `port` arrived within the data window
    pub fn has_recent_data_on(&self, port: &str) -> bool {
        match &*self.last_valid_data.lock().unwrap_or_else(PoisonError::into_inner) {
            Some((from, at)) => from == port && at.elapsed() < self.active_data_window,
            None => false,
        }
    }

    /// blocking: may probe every visible port
    pub fn ports_report(&self) -> PortsReport {
        ports::ports_report(self)
    }
}

// ==============================================================================
// state machine
// ==============================================================================

pub enum LinkState {
    Disconnected,
    Connecting,
    Connected(Box<dyn SerialLink>),
}

/// outcome of one tick: what to deliver and how long to wait before the next
#[derive(Debug)]
pub enum Step {
    Record(TelemetryRecord, Duration),
    Idle(Duration),
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    reconnect_delay: Duration,
    error_backoff: Duration,
    read_timeout: Duration,
    poll_interval: Duration,
}

pub struct AcquisitionSource {
    control: Arc<AcquisitionControl>,
    timings: Timings,
    simulator: Simulator,
    framer: LineFramer,
    state: LinkState,
    active_port: String,
    read_buffer: Vec<u8>,
}

impl AcquisitionSource {
    pub fn new(control: Arc<AcquisitionControl>, serial: &SerialConfig, simulator: &SimulatorConfig) -> Self {
        let active_port = control.target_port();
        Self {
            control,
            timings: Timings {
                reconnect_delay: serial.reconnect_delay(),
                error_backoff: serial.error_backoff(),
                read_timeout: serial.read_timeout(),
                poll_interval: serial.poll_interval(),
            },
            simulator: Simulator::new(simulator.interval()),
            framer: LineFramer::new(),
            state: LinkState::Disconnected,
            active_port,
            read_buffer: vec![0u8; READ_CHUNK],
        }
    }

    /// advance the machine by one tick
    pub fn step(&mut self) -> Step {
        let target = self.control.target_port();
        if target != self.active_port {
            self.close_link();
            self.active_port = target;
        }

        if self.active_port == SIMULATOR_PORT {
            let record = self.simulator.next_record();
            self.control.mark_data(SIMULATOR_PORT);
            return Step::Record(record, self.simulator.interval());
        }

        match std::mem::replace(&mut self.state, LinkState::Disconnected) {
            LinkState::Disconnected => {
                self.state = LinkState::Connecting;
                Step::Idle(Duration::ZERO)
            }
            LinkState::Connecting => self.connect(),
            LinkState::Connected(link) => self.poll(link),
        }
    }

    fn connect(&mut self) -> Step {
        let provider = self.control.provider();
        match provider.open(&self.active_port, self.control.baud_rate(), self.timings.read_timeout) {
            Ok(mut link) => {
                if let Err(e) = link.clear_input() {
                    tracing::debug!("failed to reset input buffer on {}: {}", self.active_port, e);
                }
                tracing::info!("connected to serial port {}", self.active_port);
                self.framer.clear();
                self.control.set_link_port(Some(&self.active_port));
                self.state = LinkState::Connected(link);
                Step::Idle(Duration::ZERO)
            }
            Err(e) => {
                tracing::debug!(
                    "cannot open {} ({}), retrying in {:?}",
                    self.active_port,
                    e,
                    self.timings.reconnect_delay
                );
                self.state = LinkState::Disconnected;
                Step::Idle(self.timings.reconnect_delay)
            }
        }
    }

    fn poll(&mut self, mut link: Box<dyn SerialLink>) -> Step {
        if let Some(frame) = self.framer.next_frame() {
            self.state = LinkState::Connected(link);
            return match decode_frame(&frame) {
                Some(record) => {
                    self.control.mark_data(&self.active_port);
                    Step::Record(record, Duration::ZERO)
                }
                None => Step::Idle(Duration::ZERO),
            };
        }

        let pending = match link.bytes_to_read() {
            Ok(pending) => pending,
            Err(e) => return self.fail_link(e),
        };
        if pending == 0 {
            self.state = LinkState::Connected(link);
            return Step::Idle(self.timings.poll_interval);
        }

        let len = pending.min(self.read_buffer.len());
        match link.read(&mut self.read_buffer[..len]) {
            Ok(n) => {
                self.framer.push(&self.read_buffer[..n]);
                self.state = LinkState::Connected(link);
                Step::Idle(Duration::ZERO)
            }
            Err(e) => self.fail_link(e),
        }
    }

    /// the link is dropped by the caller's move; record the transition
    fn fail_link(&mut self, error: HubError) -> Step {
        tracing::warn!("serial connection on {} failed: {}", self.active_port, error);
        self.control.set_link_port(None);
        self.framer.clear();
        self.state = LinkState::Disconnected;
        Step::Idle(self.timings.error_backoff)
    }

    /// Closing: release the hardware handle if one is open
    pub fn close_link(&mut self) {
        if let LinkState::Connected(link) = std::mem::replace(&mut self.state, LinkState::Disconnected) {
            drop(link);
            tracing::info!("closed serial port {}", self.active_port);
        }
        self.control.set_link_port(None);
        self.framer.clear();
    }

    /// Start the loop on a dedicated thread.
    pub fn spawn(
        mut self,
        sink: mpsc::Sender<TelemetryRecord>,
        join_timeout: Duration,
    ) -> std::io::Result<AcquisitionHandle> {
        let control = self.control.clone();
        control.running.store(true, Ordering::SeqCst);
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let spawned = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                self.run(&sink);
                let _ = done_tx.send(());
            });
        if let Err(e) = spawned {
            control.request_stop();
            return Err(e);
        }

        Ok(AcquisitionHandle { control, done: done_rx, join_timeout })
    }

    fn run(&mut self, sink: &mpsc::Sender<TelemetryRecord>) {
        tracing::info!(port = %self.active_port, "acquisition started");
        while self.control.is_running() {
            let wait = match self.step() {
                Step::Record(record, wait) => {
                    deliver(sink, record);
                    wait
                }
                Step::Idle(wait) => wait,
            };
            self.pause(wait);
        }
        self.close_link();
        tracing::info!("acquisition stopped");
    }

    fn pause(&self, wait: Duration) {
        let deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            if now >= deadline || !self.control.is_running() {
                return;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

fn deliver(sink: &mpsc::Sender<TelemetryRecord>, record: TelemetryRecord) {
    match sink.try_send(record) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!("telemetry channel full, dropping record");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("telemetry channel closed, dropping record");
        }
    }
}

// ==============================================================================
// handle
// ==============================================================================

pub struct AcquisitionHandle {
    control: Arc<AcquisitionControl>,
    done: std::sync::mpsc::Receiver<()>,
    join_timeout: Duration,
}

impl AcquisitionHandle {
    /// Best-effort stop: returns false if the thread did not finish in time.
    pub fn stop(self) -> bool {
        self.control.request_stop();
        match self.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => true,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("acquisition thread did not stop within {:?}", self.join_timeout);
                false
            }
        }
    }
}
