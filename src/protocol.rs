//! Control-socket message types.
//!
//! Newline-delimited JSON, one request and one response per line:
//!
//! ```text
//! -> {"type":"set_mode","mode":"continuous"}
//! <- {"type":"mode","mode":"continuous","pause":"none"}
//! -> {"type":"trigger","text":"Do you want to proceed?"}
//! <- {"type":"ack","sent":"1"}
//! ```

use crate::mode::{Mode, PauseReason};
use crate::session::{Notice, SessionSnapshot};
use serde::{Deserialize, Serialize};

/// Request sent to the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Advance Off -> Auto -> Continuous -> Off
    Toggle,
    SetMode {
        mode: Mode,
    },
    /// Lift a fast-response pause
    Resume,
    /// Answer the dialog described by `text` (e.g. a pasted selection)
    Trigger {
        text: String,
    },
    /// Type a response code ("1" or "2") directly
    Send {
        code: String,
    },
    Status,
    Shutdown,
}

/// Response sent back through the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Mode after the request
    Mode { mode: Mode, pause: PauseReason },
    Status {
        snapshot: SessionSnapshot,
        /// Status-bar text for the snapshot
        label: String,
        /// Notices raised since the previous status query
        #[serde(default)]
        notices: Vec<Notice>,
    },
    Ack {
        /// Code typed into the terminal, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent: Option<String>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req: ControlRequest = serde_json::from_str(r#"{"type":"set_mode","mode":"auto"}"#).unwrap();
        assert_eq!(req, ControlRequest::SetMode { mode: Mode::Auto });

        let json = serde_json::to_string(&ControlRequest::Toggle).unwrap();
        assert_eq!(json, r#"{"type":"toggle"}"#);
    }

    #[test]
    fn test_ack_omits_empty_code() {
        let json = serde_json::to_string(&ControlResponse::Ack { sent: None }).unwrap();
        assert_eq!(json, r#"{"type":"ack"}"#);

        let json = serde_json::to_string(&ControlResponse::Ack {
            sent: Some("2".to_string()),
        })
        .unwrap();
        assert!(json.contains(r#""sent":"2""#));
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<ControlRequest>(r#"{"type":"inject"}"#).is_err());
    }
}
