use crate::types::PowerAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Close codes ────────────────────────────────────────────────────────────

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Daemon rejected the session (bad or missing credentials).
pub const CLOSE_REJECTED: u16 = 4400;
/// Another session took over this socket.
pub const CLOSE_CONFLICT: u16 = 4409;

// ── JSON frame ─────────────────────────────────────────────────────────────

/// A single JSON frame: `{"event": "...", "args": [...]}`.
///
/// `args` is always an array on the wire; scalar payloads are wrapped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Frame {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// First positional argument as text. Strings are returned as-is, other
    /// JSON values as their serialized form, missing or null as empty.
    pub fn text_arg(&self) -> String {
        match self.args.first() {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

// ── Outbound ───────────────────────────────────────────────────────────────

/// Requests the client sends to the daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Authenticate (or re-authenticate) with a socket token
    Auth { token: String },
    /// Run a command on the server console
    SendCommand { command: String },
    /// Ask the daemon to replay recent console output
    SendLogs,
    /// Request a power state change
    SetState(PowerAction),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Auth { .. } => "auth",
            OutboundEvent::SendCommand { .. } => "send command",
            OutboundEvent::SendLogs => "send logs",
            OutboundEvent::SetState(_) => "set state",
        }
    }

    pub fn to_frame(&self) -> Frame {
        let payload = match self {
            OutboundEvent::Auth { token } => Value::String(token.clone()),
            OutboundEvent::SendCommand { command } => Value::String(command.clone()),
            OutboundEvent::SendLogs => Value::Null,
            OutboundEvent::SetState(action) => Value::String(action.as_str().to_string()),
        };
        Frame::new(self.name(), vec![payload])
    }
}

// ── Inbound ────────────────────────────────────────────────────────────────

/// Events the daemon pushes to the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    AuthSuccess,
    Status(String),
    ConsoleOutput(String),
    InstallOutput(String),
    InstallStarted,
    InstallCompleted,
    TransferLogs(String),
    TransferStatus(String),
    DaemonMessage(String),
    DaemonError(String),
    /// Raw stats payload (a JSON document encoded as a string)
    Stats(String),
    TokenExpiring,
    TokenExpired,
    JwtError(String),
    BackupCompleted(String),
    BackupRestoreCompleted,
    Unknown { event: String, args: Vec<Value> },
}

impl ServerEvent {
    pub fn from_frame(frame: Frame) -> Self {
        match frame.event.as_str() {
            "auth success" => ServerEvent::AuthSuccess,
            "status" => ServerEvent::Status(frame.text_arg()),
            "console output" => ServerEvent::ConsoleOutput(frame.text_arg()),
            "install output" => ServerEvent::InstallOutput(frame.text_arg()),
            "install started" => ServerEvent::InstallStarted,
            "install completed" => ServerEvent::InstallCompleted,
            "transfer logs" => ServerEvent::TransferLogs(frame.text_arg()),
            "transfer status" => ServerEvent::TransferStatus(frame.text_arg()),
            "daemon message" => ServerEvent::DaemonMessage(frame.text_arg()),
            "daemon error" => ServerEvent::DaemonError(frame.text_arg()),
            "stats" => ServerEvent::Stats(frame.text_arg()),
            "token expiring" => ServerEvent::TokenExpiring,
            "token expired" => ServerEvent::TokenExpired,
            "jwt error" => ServerEvent::JwtError(frame.text_arg()),
            "backup completed" => ServerEvent::BackupCompleted(frame.text_arg()),
            "backup restore completed" => ServerEvent::BackupRestoreCompleted,
            _ => ServerEvent::Unknown {
                event: frame.event,
                args: frame.args,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_command_frame_is_exact() {
        let frame = OutboundEvent::SendCommand {
            command: "say hello".to_string(),
        }
        .to_frame();
        assert_eq!(
            frame.encode().unwrap(),
            r#"{"event":"send command","args":["say hello"]}"#
        );
    }

    #[test]
    fn payloadless_request_wraps_null() {
        let frame = OutboundEvent::SendLogs.to_frame();
        assert_eq!(frame.encode().unwrap(), r#"{"event":"send logs","args":[null]}"#);
    }

    #[test]
    fn set_state_carries_action_name() {
        let frame = OutboundEvent::SetState(PowerAction::Restart).to_frame();
        assert_eq!(frame.event, "set state");
        assert_eq!(frame.args, vec![json!("restart")]);
    }

    #[test]
    fn inbound_frame_without_args_decodes() {
        let frame = Frame::decode(r#"{"event":"auth success"}"#).unwrap();
        assert!(frame.args.is_empty());
        assert_eq!(ServerEvent::from_frame(frame), ServerEvent::AuthSuccess);
    }

    #[test]
    fn console_output_takes_first_arg() {
        let frame = Frame::decode(r#"{"event":"console output","args":["[INFO] Done","x"]}"#)
            .unwrap();
        assert_eq!(
            ServerEvent::from_frame(frame),
            ServerEvent::ConsoleOutput("[INFO] Done".to_string())
        );
    }

    #[test]
    fn stats_object_arg_is_reserialized() {
        let frame = Frame::new("stats", vec![json!({"cpu_absolute": 1.5})]);
        match ServerEvent::from_frame(frame) {
            ServerEvent::Stats(raw) => {
                let value: Value = serde_json::from_str(&raw).unwrap();
                assert_eq!(value["cpu_absolute"], json!(1.5));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_is_preserved() {
        let frame = Frame::new("mystery", vec![json!(1), json!("two")]);
        assert_eq!(
            ServerEvent::from_frame(frame),
            ServerEvent::Unknown {
                event: "mystery".to_string(),
                args: vec![json!(1), json!("two")],
            }
        );
    }

    #[test]
    fn malformed_frame_fails_to_decode() {
        assert!(Frame::decode("not json").is_err());
        assert!(Frame::decode(r#"{"args":[]}"#).is_err());
        assert!(Frame::decode(r#"{"event":"x","args":"scalar"}"#).is_err());
    }
}
