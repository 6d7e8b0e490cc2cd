//! ==============================================================================
//! telemetry_hub - serial telemetry to live dashboards
//! ==============================================================================
//!
//! modules:
//!     - acquisition: serial receiver state machine + simulator, port diagnostics
//!     - hal: serial port access behind a trait (real ports or test doubles)
//!     - broadcast: the hub; sessions, widget permissions and fan-out
//!     - registry: connected sessions and single-admin bootstrap
//!     - permissions: global widget list + per-client overrides
//!     - protocol: websocket event envelope
//!     - server: axum routes and websocket sessions
//!     - launcher: readiness probe and frontend urls
//!     - widgets: widget catalog discovery
//!     - config / domain / error: shared plumbing
//!
//! ==============================================================================

pub mod acquisition;
pub mod broadcast;
pub mod config;
pub mod domain;
pub mod error;
pub mod hal;
pub mod launcher;
pub mod permissions;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod widgets;
