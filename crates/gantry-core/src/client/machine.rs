//! Connection lifecycle without any IO.
//!
//! Transport callbacks go in as method calls; what the driver has to do comes
//! out as a list of [`Command`]s, executed in order. The tokio driver in
//! `client::socket` is one such executor; tests are another.

use crate::client::config::SocketConfig;
use crate::client::types::{CloseKind, ConnectionPhase, SocketEvent};
use crate::ws::{Frame, OutboundEvent, ServerEvent, CLOSE_NORMAL};
use std::time::Duration;

/// Work for the transport driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Drop any current transport and open a new one
    Open { url: String },
    /// Write a text frame
    Transmit(String),
    /// Close the transport
    Close { code: u16, reason: String },
    /// Arm the reconnect timer. Only one is ever armed.
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Publish to subscribers
    Emit(SocketEvent),
}

pub struct ConnectionMachine {
    config: SocketConfig,
    url: Option<String>,
    token: Option<String>,
    phase: ConnectionPhase,
    retries: u32,
    reconnect_pending: bool,
}

impl ConnectionMachine {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            url: None,
            token: None,
            phase: ConnectionPhase::Closed,
            retries: 0,
            reconnect_pending: false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    fn cancel_reconnect(&mut self, out: &mut Vec<Command>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            out.push(Command::CancelReconnect);
        }
    }

    fn auth_frame(&self) -> Option<Command> {
        let token = self.token.clone()?;
        encode(&OutboundEvent::Auth { token })
    }

    /// Start (or restart) a session against `url`.
    pub fn connect(&mut self, url: &str) -> Vec<Command> {
        let mut out = Vec::new();
        self.cancel_reconnect(&mut out);
        self.url = Some(url.to_string());
        self.retries = 0;
        self.phase = ConnectionPhase::Connecting;
        out.push(Command::Open {
            url: url.to_string(),
        });
        out
    }

    /// Store the credential. With `is_reauth` and a live transport the auth
    /// frame goes out immediately; otherwise it is sent on the next open.
    pub fn set_token(&mut self, token: &str, is_reauth: bool) -> Vec<Command> {
        self.token = Some(token.to_string());
        if !is_reauth || !self.phase.is_open() {
            return Vec::new();
        }
        match self.auth_frame() {
            Some(cmd) => {
                self.phase = ConnectionPhase::Authenticating;
                vec![cmd]
            }
            None => Vec::new(),
        }
    }

    /// Frame for `event`, or `None` when the transport is not open.
    pub fn send(&self, event: &OutboundEvent) -> Option<Command> {
        if !self.phase.is_open() {
            log::debug!("Dropping {:?} frame: transport not open", event.name());
            return None;
        }
        encode(event)
    }

    /// End the session. Safe to call repeatedly or before any connect.
    pub fn close(&mut self, code: Option<u16>, reason: Option<&str>) -> Vec<Command> {
        let mut out = Vec::new();
        self.cancel_reconnect(&mut out);
        self.url = None;
        self.token = None;
        let was_active = !matches!(self.phase, ConnectionPhase::Closed | ConnectionPhase::Errored);
        self.phase = ConnectionPhase::Closed;
        if was_active {
            out.push(Command::Close {
                code: code.unwrap_or(CLOSE_NORMAL),
                reason: reason.unwrap_or_default().to_string(),
            });
        }
        out
    }

    pub fn on_open(&mut self) -> Vec<Command> {
        if self.url.is_none() {
            // Closed while the handshake was in flight.
            return vec![Command::Close {
                code: CLOSE_NORMAL,
                reason: String::new(),
            }];
        }
        self.retries = 0;
        self.phase = ConnectionPhase::Open;
        let mut out = vec![Command::Emit(SocketEvent::Open)];
        if let Some(auth) = self.auth_frame() {
            self.phase = ConnectionPhase::Authenticating;
            out.push(auth);
        }
        out
    }

    pub fn on_message(&mut self, text: &str) -> Vec<Command> {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping malformed frame: {}", e);
                return Vec::new();
            }
        };
        let event = ServerEvent::from_frame(frame);
        if event == ServerEvent::AuthSuccess {
            self.phase = ConnectionPhase::Ready;
        }
        vec![Command::Emit(SocketEvent::Server(event))]
    }

    pub fn on_error(&mut self, message: &str) -> Vec<Command> {
        vec![Command::Emit(SocketEvent::TransportError(message.to_string()))]
    }

    pub fn on_close(&mut self, code: u16, reason: &str) -> Vec<Command> {
        let kind = self.config.classify(code);
        let mut out = vec![Command::Emit(SocketEvent::Closed {
            code,
            reason: reason.to_string(),
            kind,
        })];

        if self.url.is_none() || kind != CloseKind::Transient {
            self.cancel_reconnect(&mut out);
            self.phase = ConnectionPhase::Closed;
            if kind == CloseKind::Fatal {
                log::warn!("Socket closed with {} ({}); not reconnecting", code, reason);
            }
            return out;
        }

        if self.retries < self.config.max_retries {
            self.retries += 1;
            self.phase = ConnectionPhase::Connecting;
            log::warn!(
                "Socket closed with {}; reconnecting in {:?} (attempt {}/{})",
                code,
                self.config.reconnect_delay,
                self.retries,
                self.config.max_retries
            );
            self.cancel_reconnect(&mut out);
            self.reconnect_pending = true;
            out.push(Command::Emit(SocketEvent::Reconnecting {
                attempt: self.retries,
            }));
            out.push(Command::ScheduleReconnect(self.config.reconnect_delay));
        } else {
            log::error!(
                "Socket closed with {}; giving up after {} reconnect attempts",
                code,
                self.retries
            );
            self.cancel_reconnect(&mut out);
            self.phase = ConnectionPhase::Errored;
            out.push(Command::Emit(SocketEvent::ConnectError));
        }
        out
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_due(&mut self) -> Vec<Command> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        match &self.url {
            Some(url) => {
                self.phase = ConnectionPhase::Connecting;
                vec![Command::Open { url: url.clone() }]
            }
            None => Vec::new(),
        }
    }
}

fn encode(event: &OutboundEvent) -> Option<Command> {
    match event.to_frame().encode() {
        Ok(text) => Some(Command::Transmit(text)),
        Err(e) => {
            log::error!("Failed to encode {} frame: {}", event.name(), e);
            None
        }
    }
}
