use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state the daemon reports for a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Offline,
    Starting,
    Running,
    Stopping,
}

impl PowerState {
    /// Wire name, as sent in `status` events and resource responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Offline => "offline",
            PowerState::Starting => "starting",
            PowerState::Running => "running",
            PowerState::Stopping => "stopping",
        }
    }

    /// Parse a wire name. Unknown names (including the empty string the
    /// panel sends while a server is installing) yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "offline" => Some(PowerState::Offline),
            "starting" => Some(PowerState::Starting),
            "running" => Some(PowerState::Running),
            "stopping" => Some(PowerState::Stopping),
            _ => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired power state sent with a `set state` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Restart => "restart",
            PowerAction::Kill => "kill",
        }
    }

    pub fn all() -> &'static [PowerAction] {
        &[
            PowerAction::Start,
            PowerAction::Stop,
            PowerAction::Restart,
            PowerAction::Kill,
        ]
    }
}
