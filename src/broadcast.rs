//! ==============================================================================
//! broadcast.rs - the hub: sessions, permissions and fan-out
//! ==============================================================================
//!
//! purpose:
//!     the only component that writes to client transports. owns the session
//!     registry and widget permissions behind one lock and turns telemetry,
//!     connects, disconnects and admin actions into deliveries for the right
//!     audience (one session, the admins, or everyone).
//!
//! delivery discipline:
//!     the audience is resolved under the lock into an outbox (sender + shared
//!     message pairs); the outbox is flushed after the lock is released. a
//!     session that vanished mid-flush only loses its own copy.
//!
//! ```text
//!     session queues are bounded. a session whose queue is full has stopped
//!     reading; it is dropped from the registry instead of buffering without
//!     limit, and its socket closes once the queue drains.
//!
//!     a new session gets its auth response and initial widget view queued
//!     before it becomes visible to any broadcast.
//! ```
//!
//! relationships:
//!     - used by: server.rs (websocket sessions), main.rs (telemetry forwarder)
//!     - uses: registry.rs, permissions.rs, acquisition (port control)
//!
//! ==============================================================================

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::acquisition::AcquisitionControl;
use crate::domain::{ClientSummary, Role, TelemetryRecord};
use crate::error::{HubError, Result};
use crate::permissions::WidgetPermissions;
use crate::protocol::{ClientEvent, ClientWidgetsUpdate, Handshake, ServerEvent};
use crate::registry::{AdminClaim, Session, SessionId, SessionRegistry, SessionSender};
use crate::widgets::WidgetCatalog;

/// registry + permission tables, guarded together
#[derive(Debug, Default)]
struct HubState {
    registry: SessionRegistry,
    permissions: WidgetPermissions,
}

/// deliveries resolved under the lock, sent after it is released
#[derive(Default)]
struct Outbox(Vec<(SessionId, SessionSender, Arc<ServerEvent>)>);

impl Outbox {
    fn push(&mut self, session: &Session, event: &Arc<ServerEvent>) {
        self.0.push((session.id.clone(), session.sender().clone(), event.clone()));
    }

    /// Returns the sessions whose queue was full.
    fn flush(self) -> Vec<SessionId> {
        let mut lagging: Vec<SessionId> = Vec::new();
        for (session_id, sender, event) in self.0 {
            if lagging.contains(&session_id) {
                continue;
            }
            match sender.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => lagging.push(session_id),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(session = %session_id, "session gone before delivery, dropping message");
                }
            }
        }
        lagging
    }
}

#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    catalog: Arc<WidgetCatalog>,
    acquisition: Option<Arc<AcquisitionControl>>,
    show_sensor_data: bool,
}

impl Hub {
    /// the global list starts as the whole catalog
    pub fn new(catalog: WidgetCatalog) -> Self {
        let permissions = WidgetPermissions::new(catalog.names().to_vec());
        Self {
            state: Arc::new(Mutex::new(HubState { registry: SessionRegistry::new(), permissions })),
            catalog: Arc::new(catalog),
            acquisition: None,
            show_sensor_data: false,
        }
    }

    pub fn with_acquisition(mut self, control: Arc<AcquisitionControl>) -> Self {
        self.acquisition = Some(control);
        self
    }

    pub fn with_sensor_logging(mut self, enabled: bool) -> Self {
        self.show_sensor_data = enabled;
        self
    }

    pub fn catalog(&self) -> &WidgetCatalog {
        &self.catalog
    }

    pub fn acquisition(&self) -> Option<&Arc<AcquisitionControl>> {
        self.acquisition.as_ref()
    }

    pub async fn global_widgets(&self) -> Vec<String> {
        self.state.lock().await.permissions.global().to_vec()
    }

    pub async fn resolve_widgets(&self, client_id: &str) -> Vec<String> {
        self.state.lock().await.permissions.resolve(client_id)
    }

    pub async fn is_admin(&self, session_id: &str) -> bool {
        self.state.lock().await.registry.is_admin(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    // ==========================================================================
    // delivery primitives
    // ==========================================================================

    /// Flush `outbox`, then evict stalled sessions. Eviction changes the
    /// registry, so admins get a clients_update, which may stall another.
    async fn deliver(&self, outbox: Outbox) {
        let mut lagging = outbox.flush();
        while !lagging.is_empty() {
            let mut outbox = Outbox::default();
            {
                let mut state = self.state.lock().await;
                let mut evicted = false;
                for session_id in lagging {
                    if let Some(session) = state.registry.remove(&session_id) {
                        tracing::warn!(session = %session.id, client = %session.client_id, "session queue full, disconnecting");
                        evicted = true;
                    }
                }
                if evicted {
                    clients_update(&state, &mut outbox);
                }
            }
            lagging = outbox.flush();
        }
    }

    pub async fn send_to(&self, session_id: &str, event: ServerEvent) {
        let outbox = {
            let state = self.state.lock().await;
            let mut outbox = Outbox::default();
            to_session(&state, session_id, &Arc::new(event), &mut outbox);
            outbox
        };
        self.deliver(outbox).await;
    }

    pub async fn send_to_admins(&self, event: ServerEvent) {
        let outbox = {
            let state = self.state.lock().await;
            let mut outbox = Outbox::default();
            to_admins(&state, &Arc::new(event), &mut outbox);
            outbox
        };
        self.deliver(outbox).await;
    }

    pub async fn send_to_all(&self, event: ServerEvent) {
        let outbox = {
            let state = self.state.lock().await;
            let mut outbox = Outbox::default();
            to_all(&state, &Arc::new(event), &mut outbox);
            outbox
        };
        self.deliver(outbox).await;
    }

    /// raw telemetry goes to every session regardless of widget state
    pub async fn broadcast_telemetry(&self, record: TelemetryRecord) {
        if self.show_sensor_data {
            tracing::debug!(fields = %serde_json::Value::Object(record.fields().clone()), "telemetry");
        }
        self.send_to_all(ServerEvent::DataUpdate(record)).await;
    }

    /// Forward records from the acquisition channel until it closes.
    pub async fn run_telemetry(self, mut records: mpsc::Receiver<TelemetryRecord>) {
        while let Some(record) = records.recv().await {
            self.broadcast_telemetry(record).await;
        }
        tracing::info!("telemetry channel closed");
    }

    // ==========================================================================
    // session lifecycle
    // ==========================================================================

    pub async fn connect(&self, handshake: Handshake, addr: String, sender: SessionSender) -> SessionId {
        let session_id = Uuid::new_v4().to_string();
        let client_id = handshake
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| session_id.clone());

        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().await;
            let claim = state.registry.claim_admin(handshake.admin_secret.as_deref());
            let role = claim.role();

            match claim {
                AdminClaim::Bootstrapped => {
                    tracing::info!(session = %session_id, client = %client_id, "admin secret bound");
                    queue_direct(&sender, ServerEvent::AdminAuthSuccess);
                }
                AdminClaim::Accepted => queue_direct(&sender, ServerEvent::AdminAuthSuccess),
                AdminClaim::Rejected => {
                    tracing::warn!(session = %session_id, client = %client_id, ip = %addr, "admin claim rejected");
                    queue_direct(&sender, ServerEvent::AdminAuthFailed(HubError::InvalidAdminSecret.to_string()));
                }
                AdminClaim::NotClaimed => {}
            }

            let initial = match role {
                Role::Viewer => ServerEvent::WidgetPermissions(state.permissions.resolve(&client_id)),
                Role::Admin => ServerEvent::GlobalWidgetsUpdate(state.permissions.global().to_vec()),
            };
            queue_direct(&sender, initial);

            tracing::info!(session = %session_id, client = %client_id, role = ?role, ip = %addr, "client connected");
            state.registry.insert(session_id.clone(), client_id, role, addr, sender);
            clients_update(&state, &mut outbox);
        }
        self.deliver(outbox).await;
        session_id
    }

    pub async fn disconnect(&self, session_id: &str) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().await;
            let Some(session) = state.registry.remove(session_id) else {
                return;
            };
            tracing::info!(session = %session.id, client = %session.client_id, role = ?session.role, "client disconnected");
            clients_update(&state, &mut outbox);
        }
        self.deliver(outbox).await;
    }

    // ==========================================================================
    // inbound events
    // ==========================================================================

    /// Dispatch one client event. Admin-only events from anyone else are
    /// answered with `admin_auth_failed` and return `NotAuthenticated`.
    pub async fn handle_event(&self, session_id: &str, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::AdminPublishData(record) => {
                self.authorize(session_id).await?;
                self.send_to_all(ServerEvent::DataUpdate(record)).await;
            }
            ClientEvent::GetGlobalWidgets => {
                self.authorize(session_id).await?;
                let global = self.global_widgets().await;
                self.send_to(session_id, ServerEvent::GlobalWidgetsUpdate(global)).await;
            }
            ClientEvent::UpdateGlobalWidgets(widgets) => self.update_global_widgets(session_id, widgets).await?,
            ClientEvent::UpdateClientWidgets(update) => self.update_client_widgets(session_id, update).await?,
            ClientEvent::GetSerialPorts => {
                self.authorize(session_id).await?;
                let report = self.ports_report().await?;
                self.send_to(session_id, ServerEvent::SerialPortsList(report)).await;
            }
            ClientEvent::SetSerialPort(port) => {
                self.authorize(session_id).await?;
                let control = self.acquisition.clone().ok_or(HubError::AcquisitionUnavailable)?;
                control.set_port(&port);
                let report = self.ports_report().await?;
                self.send_to_admins(ServerEvent::SerialPortsList(report)).await;
            }
        }
        Ok(())
    }

    async fn update_global_widgets(&self, session_id: &str, widgets: Vec<String>) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().await;
            if !state.registry.is_admin(session_id) {
                reject(&state, session_id, &mut outbox);
                drop(state);
                self.deliver(outbox).await;
                return Err(HubError::NotAuthenticated);
            }

            tracing::info!(session = %session_id, widgets = ?widgets, "global widgets updated");
            state.permissions.set_global(widgets.clone());
            to_all(&state, &Arc::new(ServerEvent::GlobalWidgetsUpdate(widgets)), &mut outbox);
            clients_update(&state, &mut outbox);
            for viewer in state.registry.viewers() {
                if !state.permissions.has_override(&viewer.client_id) {
                    let event = Arc::new(ServerEvent::WidgetPermissions(state.permissions.resolve(&viewer.client_id)));
                    outbox.push(viewer, &event);
                }
            }
        }
        self.deliver(outbox).await;
        Ok(())
    }

    async fn update_client_widgets(&self, session_id: &str, update: ClientWidgetsUpdate) -> Result<()> {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().await;
            if !state.registry.is_admin(session_id) {
                reject(&state, session_id, &mut outbox);
                drop(state);
                self.deliver(outbox).await;
                return Err(HubError::NotAuthenticated);
            }

            let ClientWidgetsUpdate { client_id, widgets } = update;
            if !state.permissions.set_client(&client_id, widgets) {
                tracing::debug!(client = %client_id, "no override to clear");
                return Ok(());
            }
            tracing::info!(session = %session_id, client = %client_id, "client widgets updated");

            clients_update(&state, &mut outbox);
            let event = Arc::new(ServerEvent::WidgetPermissions(state.permissions.resolve(&client_id)));
            for viewer in state.registry.viewers().filter(|s| s.client_id == client_id) {
                outbox.push(viewer, &event);
            }
        }
        self.deliver(outbox).await;
        Ok(())
    }

    /// Admin check for one request; a non-admin is answered with
    /// `admin_auth_failed` before the error is returned.
    pub async fn authorize(&self, session_id: &str) -> Result<()> {
        let mut outbox = Outbox::default();
        let allowed = {
            let state = self.state.lock().await;
            let allowed = state.registry.is_admin(session_id);
            if !allowed {
                reject(&state, session_id, &mut outbox);
            }
            allowed
        };
        self.deliver(outbox).await;
        if allowed {
            Ok(())
        } else {
            Err(HubError::NotAuthenticated)
        }
    }

    /// probing opens serial ports, so it runs off the async workers
    async fn ports_report(&self) -> Result<crate::domain::PortsReport> {
        let control = self.acquisition.clone().ok_or(HubError::AcquisitionUnavailable)?;
        tokio::task::spawn_blocking(move || control.ports_report())
            .await
            .map_err(|e| HubError::Io(std::io::Error::other(e)))
    }
}

// ==============================================================================
// audience resolution (caller holds the lock)
// ==============================================================================

/// the queue is new and empty, so only a closed session can refuse
fn queue_direct(sender: &SessionSender, event: ServerEvent) {
    if sender.try_send(Arc::new(event)).is_err() {
        tracing::debug!("new session closed before its first message");
    }
}

fn to_session(state: &HubState, session_id: &str, event: &Arc<ServerEvent>, outbox: &mut Outbox) {
    if let Some(session) = state.registry.get(session_id) {
        outbox.push(session, event);
    }
}

fn to_admins(state: &HubState, event: &Arc<ServerEvent>, outbox: &mut Outbox) {
    for session in state.registry.admins() {
        outbox.push(session, event);
    }
}

fn to_all(state: &HubState, event: &Arc<ServerEvent>, outbox: &mut Outbox) {
    for session in state.registry.sessions() {
        outbox.push(session, event);
    }
}

fn reject(state: &HubState, session_id: &str, outbox: &mut Outbox) {
    tracing::warn!(session = %session_id, "admin action from unauthenticated session");
    let event = Arc::new(ServerEvent::AdminAuthFailed(HubError::NotAuthenticated.to_string()));
    to_session(state, session_id, &event, outbox);
}

/// session list, each viewer enriched with its resolved widgets
fn client_summaries(state: &HubState) -> Vec<ClientSummary> {
    state
        .registry
        .sessions()
        .into_iter()
        .map(|s| {
            let (widgets, custom) = match s.role {
                Role::Viewer => (
                    Some(state.permissions.resolve(&s.client_id)),
                    state.permissions.has_override(&s.client_id),
                ),
                Role::Admin => (None, false),
            };
            ClientSummary {
                id: s.client_id.clone(),
                role: s.role,
                ip: s.addr.clone(),
                session_id: s.id.clone(),
                widgets,
                custom,
            }
        })
        .collect()
}

fn clients_update(state: &HubState, outbox: &mut Outbox) {
    let event = Arc::new(ServerEvent::ClientsUpdate(client_summaries(state)));
    to_admins(state, &event, outbox);
}
