//! Control protocol spoken over the `/ws/run` WebSocket.
//!
//! Client messages are JSON objects tagged by `action_type`. Server frames
//! are one of three shapes:
//!
//! - direct replies: `{"status": "success" | "error", ...}`
//! - run events: `{"type": "event", "subtype": <kind>, "run_id": .., ...}`
//! - faults: `{"type": "error", "code": .., "detail": ..}`

use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use trainrun_core::{RunEvent, RunId};
use trainrun_runner::RunnerError;

/// Every `action_type` the server understands.
pub const ACTIONS: &[&str] = &["start", "status", "cancel", "pause", "resume", "restart"];

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ControlMessage {
    Start {
        /// Checked by the runner; any JSON is accepted here.
        #[serde(default)]
        cfg: Value,
    },
    Status {
        #[serde(default)]
        run_id: Option<RunId>,
    },
    Cancel {
        #[serde(default)]
        run_id: Option<RunId>,
    },
    Pause,
    Resume,
    Restart,
}

/// Errors reported to a control connection. None of them closes it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    BadMessage(String),

    #[error("unknown action_type '{0}'")]
    UnknownAction(String),

    #[error("no active run")]
    NoActiveRun,

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl ProtocolError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadMessage(_) => "bad_message",
            Self::UnknownAction(_) => "unknown_action",
            Self::NoActiveRun => "no_active_run",
            Self::Runner(e) => e.code(),
        }
    }

    /// Frame sent back to the client for this error.
    pub fn to_frame(&self) -> Value {
        match self {
            Self::BadMessage(_) => fault_frame(self.code(), &self.to_string()),
            _ => error_reply(self.code(), &self.to_string()),
        }
    }
}

/// Decode one text frame.
pub fn parse_message(text: &str) -> Result<ControlMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::BadMessage(format!("invalid JSON: {}", e)))?;
    let Some(fields) = value.as_object() else {
        return Err(ProtocolError::BadMessage(
            "control message must be a JSON object".to_string(),
        ));
    };
    let action = match fields.get("action_type") {
        Some(Value::String(action)) => action.clone(),
        Some(_) => {
            return Err(ProtocolError::BadMessage(
                "action_type must be a string".to_string(),
            ))
        }
        None => return Err(ProtocolError::BadMessage("missing action_type".to_string())),
    };
    if !ACTIONS.contains(&action.as_str()) {
        return Err(ProtocolError::UnknownAction(action));
    }

    serde_json::from_value(value)
        .map_err(|e| ProtocolError::BadMessage(format!("malformed {} message: {}", action, e)))
}

/// `{"status": "success", ...fields}`.
pub fn success_reply(fields: Value) -> Value {
    let mut reply = Map::new();
    reply.insert("status".to_string(), json!("success"));
    if let Value::Object(fields) = fields {
        reply.extend(fields);
    }
    Value::Object(reply)
}

/// `{"status": "error", "code": .., "detail": ..}`.
pub fn error_reply(code: &str, detail: &str) -> Value {
    json!({ "status": "error", "code": code, "detail": detail })
}

/// `{"type": "error", "code": .., "detail": ..}`.
pub fn fault_frame(code: &str, detail: &str) -> Value {
    json!({ "type": "error", "code": code, "detail": detail })
}

/// Client-facing envelope for a run event; `None` for the internal `eof`.
pub fn event_envelope(event: &RunEvent) -> Option<Value> {
    if event.is_eof() {
        return None;
    }
    let Ok(Value::Object(mut fields)) = serde_json::to_value(event) else {
        return None;
    };
    fields.remove("type");
    fields.insert("type".to_string(), json!("event"));
    fields.insert("subtype".to_string(), json!(event.kind()));
    Some(Value::Object(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainrun_core::RunState;

    #[test]
    fn test_parse_known_actions() {
        assert_eq!(
            parse_message(r#"{"action_type":"status"}"#).unwrap(),
            ControlMessage::Status { run_id: None }
        );
        assert_eq!(
            parse_message(r#"{"action_type":"cancel","run_id":"r1"}"#).unwrap(),
            ControlMessage::Cancel {
                run_id: Some(RunId::new("r1"))
            }
        );
        assert_eq!(
            parse_message(r#"{"action_type":"start","cfg":{"label":"y"}}"#).unwrap(),
            ControlMessage::Start {
                cfg: json!({"label": "y"})
            }
        );
        assert_eq!(
            parse_message(r#"{"action_type":"pause","run_id":"r1"}"#).unwrap(),
            ControlMessage::Pause
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_message("not json").unwrap_err();
        assert_eq!(err.code(), "bad_message");
        assert_eq!(err.to_frame()["type"], "error");

        assert_eq!(parse_message("[1]").unwrap_err().code(), "bad_message");
        assert_eq!(parse_message("{}").unwrap_err().code(), "bad_message");
        assert_eq!(
            parse_message(r#"{"action_type":7}"#).unwrap_err().code(),
            "bad_message"
        );
        let err = parse_message(r#"{"action_type":"status","run_id":5}"#).unwrap_err();
        assert_eq!(err.code(), "bad_message");
        assert!(err.to_string().starts_with("malformed status message"));

        let err = parse_message(r#"{"action_type":"explode"}"#).unwrap_err();
        assert_eq!(err.code(), "unknown_action");
        let frame = err.to_frame();
        assert_eq!(frame["status"], "error");
        assert!(frame["detail"].as_str().unwrap().contains("explode"));
    }

    #[test]
    fn test_event_envelope() {
        let event = RunEvent::State {
            run_id: RunId::new("r1"),
            state: RunState::Running,
        };
        assert_eq!(
            event_envelope(&event).unwrap(),
            json!({"type": "event", "subtype": "state", "run_id": "r1", "state": "running"})
        );

        let log = RunEvent::log(RunId::new("r1"), "trainer", "info", "fit");
        let envelope = event_envelope(&log).unwrap();
        assert_eq!(envelope["subtype"], "log");
        assert_eq!(envelope["logger"], "trainer");

        assert!(event_envelope(&RunEvent::Eof {
            run_id: RunId::new("r1")
        })
        .is_none());
    }

    #[test]
    fn test_replies() {
        assert_eq!(
            success_reply(json!({"run_id": "r1"})),
            json!({"status": "success", "run_id": "r1"})
        );
        assert_eq!(
            error_reply("conflict", "a run is already in progress"),
            json!({"status": "error", "code": "conflict", "detail": "a run is already in progress"})
        );
    }
}
