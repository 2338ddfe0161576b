use crate::client::types::SocketEvent;
use crate::types::{PowerAction, PowerState};
use crate::ws::{OutboundEvent, ServerEvent};

/// Power state as last broadcast by the daemon.
///
/// Only inbound `status` events move it. Sending a power action never
/// changes it; the daemon's own broadcast does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusState {
    current: Option<PowerState>,
}

/// Which power buttons are currently usable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerControls {
    pub start: bool,
    pub stop: bool,
    pub restart: bool,
    pub kill: bool,
}

impl PowerControls {
    pub fn allows(&self, action: PowerAction) -> bool {
        match action {
            PowerAction::Start => self.start,
            PowerAction::Stop => self.stop,
            PowerAction::Restart => self.restart,
            PowerAction::Kill => self.kill,
        }
    }
}

impl StatusState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while unknown (before the first broadcast, or while installing).
    pub fn current(&self) -> Option<PowerState> {
        self.current
    }

    /// Apply a wire status. Returns true if the state changed.
    pub fn apply_status(&mut self, value: &str) -> bool {
        let next = PowerState::from_wire(value);
        if next.is_none() && !value.is_empty() {
            log::debug!("Unrecognised power state {:?}", value);
        }
        let changed = next != self.current;
        self.current = next;
        changed
    }

    pub fn on_event(&mut self, event: &SocketEvent) -> bool {
        match event {
            SocketEvent::Server(ServerEvent::Status(value)) => self.apply_status(value),
            _ => false,
        }
    }

    pub fn controls(&self) -> PowerControls {
        match self.current {
            None => PowerControls::default(),
            Some(state) => PowerControls {
                start: state == PowerState::Offline,
                stop: matches!(state, PowerState::Starting | PowerState::Running),
                restart: true,
                kill: state == PowerState::Stopping,
            },
        }
    }

    /// The request for `action`, or `None` if the controls do not allow it.
    pub fn power_request(&self, action: PowerAction) -> Option<OutboundEvent> {
        if self.controls().allows(action) {
            Some(OutboundEvent::SetState(action))
        } else {
            log::debug!(
                "Power action {} not available while {:?}",
                action.as_str(),
                self.current
            );
            None
        }
    }
}
