//! Core state for the gantry console client.
//!
//! Pure state machines (connection policy, console, telemetry, power status,
//! dashboard polling) live at the top level and build without any runtime.
//! The `client` feature adds the tokio/tungstenite/reqwest drivers that feed
//! them from a live panel.

pub mod api;
pub mod client;
pub mod console;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod persist;
pub mod poller;
pub mod speculative;
pub mod status;
pub mod telemetry;
pub mod types;
pub mod ws;

pub use error::{GantryError, Result};
