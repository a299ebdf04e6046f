//! Response types for the Traccar REST API and WebSocket feed.
//!
//! Field names match the server's camelCase JSON via
//! `#[serde(rename_all = "camelCase")]`. The server's API reference does not
//! mark any field nullable, but several come back as `null` in practice --
//! those are modeled as `Option` so deserialization fails only on fields
//! that are genuinely always present. Records never embed each other;
//! relationships stay as plain id fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Server ───────────────────────────────────────────────────────────

/// Server information -- from `GET /api/server`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: i64,
    pub registration: bool,
    pub readonly: bool,
    pub device_readonly: bool,
    pub limit_commands: bool,
    pub map: Option<String>,
    pub bing_key: Option<String>,
    pub map_url: Option<String>,
    pub poi_layer: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: i32,
    pub twelve_hour_format: bool,
    pub version: String,
    pub force_settings: bool,
    pub coordinate_format: Option<String>,
    pub attributes: Map<String, Value>,
    pub open_id_enabled: bool,
    pub open_id_force: bool,
}

// ── Device ───────────────────────────────────────────────────────────

/// A tracked device -- from `GET /api/devices`.
///
/// `position_id` and `group_id` reference other records by id; the client
/// never resolves them into an object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub unique_id: String,
    /// `"online"`, `"offline"`, or `"unknown"`.
    pub status: String,
    pub disabled: bool,
    /// ISO 8601 date-time of the last server contact.
    pub last_update: Option<String>,
    pub position_id: i64,
    pub group_id: i64,
    pub phone: Option<String>,
    pub model: Option<String>,
    pub contact: Option<String>,
    pub category: Option<String>,
    pub attributes: Map<String, Value>,
}

// ── Geofence ─────────────────────────────────────────────────────────

/// A geofence definition -- from `GET /api/geofences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Area in WKT, e.g. `CIRCLE (48.2 16.3, 500)`.
    pub area: String,
    pub calendar_id: i64,
    pub attributes: Map<String, Value>,
}

// ── Position ─────────────────────────────────────────────────────────

/// A reported position fix -- from `GET /api/positions` and the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: i64,
    pub device_id: i64,
    pub protocol: String,
    /// ISO 8601 date-time reported by the device itself.
    pub device_time: String,
    /// ISO 8601 date-time of the GPS fix.
    pub fix_time: String,
    /// ISO 8601 date-time the server received the report.
    pub server_time: String,
    pub outdated: bool,
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Speed in knots.
    pub speed: f64,
    pub course: f64,
    pub address: Option<String>,
    pub accuracy: f64,
    /// Cell/Wi-Fi network info -- shape varies by protocol, kept opaque.
    pub network: Option<Value>,
    pub attributes: Map<String, Value>,
}

// ── Events ───────────────────────────────────────────────────────────

/// A historical event -- from `GET /api/reports/events` and the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportsEvent {
    pub id: i64,
    /// Event type name, e.g. `"deviceOnline"`, `"geofenceEnter"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// ISO 8601 date-time.
    pub event_time: String,
    pub device_id: i64,
    pub position_id: i64,
    pub geofence_id: i64,
    pub maintenance_id: i64,
    pub attributes: Map<String, Value>,
}

// ── Subscription ─────────────────────────────────────────────────────

/// State of the WebSocket subscription, readable at any time from
/// [`ApiClient::subscription_status`](crate::ApiClient::subscription_status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// One message from the WebSocket feed.
///
/// The server omits keys it has no updates for; `#[serde(default)]` turns
/// those into `None`, so a handler always observes all three keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub devices: Option<Vec<Device>>,
    #[serde(default)]
    pub positions: Option<Vec<Position>>,
    #[serde(default)]
    pub events: Option<Vec<ReportsEvent>>,
}
