//! Applies control-socket requests to the session.

use crate::patterns::ResponseCode;
use crate::protocol::{ControlRequest, ControlResponse};
use crate::session::SessionController;
use crate::tailer::LogSource;
use std::time::Instant;

pub fn dispatch<S: LogSource>(
    session: &mut SessionController<S>,
    request: ControlRequest,
    now: Instant,
) -> ControlResponse {
    match request {
        ControlRequest::Toggle => {
            let transition = session.toggle(now);
            ControlResponse::Mode {
                mode: transition.to,
                pause: transition.pause_to,
            }
        }
        ControlRequest::SetMode { mode } => {
            let transition = session.set_mode(mode, now);
            ControlResponse::Mode {
                mode: transition.to,
                pause: transition.pause_to,
            }
        }
        ControlRequest::Resume => {
            if session.resume(now) {
                ControlResponse::Mode {
                    mode: session.mode(),
                    pause: session.pause(),
                }
            } else {
                error("Continuous mode is not paused")
            }
        }
        ControlRequest::Trigger { text } => match session.trigger_manual(&text, now) {
            Some(code) => ControlResponse::Ack {
                sent: Some(code.as_str().to_string()),
            },
            None => error("No response sent"),
        },
        ControlRequest::Send { code } => {
            let Some(code) = ResponseCode::from_code(&code) else {
                return error("code must be 1 or 2");
            };
            match session.send_response(code, now) {
                Ok(()) => ControlResponse::Ack {
                    sent: Some(code.as_str().to_string()),
                },
                Err(e) => error(&e.to_string()),
            }
        }
        ControlRequest::Status => {
            let snapshot = session.snapshot(now);
            ControlResponse::Status {
                label: snapshot.label(),
                snapshot,
                notices: session.drain_notices(),
            }
        }
        ControlRequest::Shutdown => ControlResponse::Ack { sent: None },
    }
}

fn error(message: &str) -> ControlResponse {
    ControlResponse::Error {
        message: message.to_string(),
    }
}
