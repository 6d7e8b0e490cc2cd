use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// port name that selects the built-in simulator instead of a serial device
pub const SIMULATOR_PORT: &str = "SIMULATOR";

/// one decoded telemetry sample
///
/// the payload is schema-flexible: whatever json object the receiver (or the
/// simulator) produced. examples:
/// - {"time": 1200, "pressure": 1013.2, "temperature": 24.8, ...}
/// - {"latitude": -23.55, "longitude": -46.63, "voltage": 4.1}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord(Map<String, Value>);

impl TelemetryRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// wraps a json value; only objects are telemetry records
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// role of a connected session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

/// one entry of the `clients_update` list sent to admins
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    /// declared client identifier
    pub id: String,
    #[serde(rename = "type")]
    pub role: Role,
    pub ip: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// resolved widget list (viewers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets: Option<Vec<String>>,
    /// true when the client has a personal override
    #[serde(default)]
    pub custom: bool,
}

/// diagnostic classification of a serial endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Available,
    Connected,
    ActiveData,
    ErrorConnecting,
    Busy,
    AvailableWithData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: String,
    pub description: String,
    pub status: PortStatus,
    pub active: bool,
}

/// payload of `serial_ports_list`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortsReport {
    pub current: String,
    pub ports: Vec<PortInfo>,
}
