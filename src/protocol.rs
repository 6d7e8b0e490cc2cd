//! Wire protocol between the hub and dashboard clients.
//!
//! Every WebSocket text frame is one JSON envelope:
//! `{"event": "<name>", "data": <payload>}`. Events without a payload omit
//! `data`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ClientSummary, PortsReport, TelemetryRecord};
use crate::permissions::WidgetSelection;

/// connect-time parameters, taken from the upgrade request's query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Handshake {
    /// durable client identifier; defaults to the session id
    pub id: Option<String>,
    pub admin_secret: Option<String>,
}

/// server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    AdminAuthSuccess,
    AdminAuthFailed(String),
    DataUpdate(TelemetryRecord),
    GlobalWidgetsUpdate(Vec<String>),
    ClientsUpdate(Vec<ClientSummary>),
    WidgetPermissions(Vec<String>),
    SerialPortsList(PortsReport),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AdminAuthSuccess => "admin_auth_success",
            ServerEvent::AdminAuthFailed(_) => "admin_auth_failed",
            ServerEvent::DataUpdate(_) => "data_update",
            ServerEvent::GlobalWidgetsUpdate(_) => "global_widgets_update",
            ServerEvent::ClientsUpdate(_) => "clients_update",
            ServerEvent::WidgetPermissions(_) => "widget_permissions",
            ServerEvent::SerialPortsList(_) => "serial_ports_list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientWidgetsUpdate {
    pub client_id: String,
    pub widgets: WidgetSelection,
}

/// client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    AdminPublishData(TelemetryRecord),
    GetGlobalWidgets,
    UpdateGlobalWidgets(Vec<String>),
    UpdateClientWidgets(ClientWidgetsUpdate),
    GetSerialPorts,
    SetSerialPort(String),
}

/// an inbound frame with its payload not yet interpreted
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ClientEvent {
    const NAMES: [&'static str; 6] = [
        "admin_publish_data",
        "get_global_widgets",
        "update_global_widgets",
        "update_client_widgets",
        "get_serial_ports",
        "set_serial_port",
    ];

    /// Every inbound event is an admin action; unknown names are not.
    pub fn requires_admin(event: &str) -> bool {
        Self::NAMES.contains(&event)
    }

    pub fn from_envelope(envelope: Envelope) -> serde_json::Result<Self> {
        let mut frame = Map::new();
        frame.insert("event".to_string(), Value::String(envelope.event));
        if let Some(data) = envelope.data {
            frame.insert("data".to_string(), data);
        }
        serde_json::from_value(Value::Object(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_events() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"get_global_widgets"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetGlobalWidgets);

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "update_client_widgets",
            "data": {"client_id": "viewer-7", "widgets": "GLOBAL"}
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::UpdateClientWidgets(ClientWidgetsUpdate {
                client_id: "viewer-7".to_string(),
                widgets: WidgetSelection::UseGlobal,
            })
        );

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "admin_publish_data",
            "data": {"pressure": 1000.5, "status": 1}
        }))
        .unwrap();
        match event {
            ClientEvent::AdminPublishData(record) => assert_eq!(record.get_f64("pressure"), Some(1000.5)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"admin_publish_data","data":5}"#).is_err());
    }

    #[test]
    fn test_envelope_name_read_before_payload() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"event":"admin_publish_data","data":[1,2,3]}"#).unwrap();
        assert!(ClientEvent::requires_admin(&envelope.event));
        assert!(ClientEvent::from_envelope(envelope).is_err());

        let envelope: Envelope = serde_json::from_str(r#"{"event":"get_serial_ports","data":null}"#).unwrap();
        assert_eq!(ClientEvent::from_envelope(envelope).unwrap(), ClientEvent::GetSerialPorts);

        let envelope: Envelope =
            serde_json::from_str(r#"{"event":"set_serial_port","data":"COM7"}"#).unwrap();
        assert_eq!(
            ClientEvent::from_envelope(envelope).unwrap(),
            ClientEvent::SetSerialPort("COM7".to_string())
        );

        assert!(!ClientEvent::requires_admin("reboot"));
    }

    #[test]
    fn test_server_event_envelope() {
        let value = serde_json::to_value(ServerEvent::WidgetPermissions(vec!["gauge".to_string()])).unwrap();
        assert_eq!(value, json!({"event": "widget_permissions", "data": ["gauge"]}));

        let value = serde_json::to_value(ServerEvent::AdminAuthSuccess).unwrap();
        assert_eq!(value["event"], "admin_auth_success");
        assert_eq!(ServerEvent::AdminAuthSuccess.name(), "admin_auth_success");
    }
}
