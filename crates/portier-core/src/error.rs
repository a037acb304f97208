// ── Core error types ──
//
// Errors surfaced by coordinators and the registry. Transport-level
// failures are translated by the `From<portier_api::Error>` impl so that
// consumers never match on codec or socket details.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Door not found: {name}")]
    DoorNotFound { name: String },

    #[error("Invalid door {door} on controller {controller} (expected 1-4)")]
    InvalidDoor { controller: u32, door: u8 },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Controller {controller} did not reply within {timeout_ms}ms")]
    Timeout { controller: u32, timeout_ms: u64 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Reply from controller {got} does not match request to {expected}")]
    ControllerMismatch { expected: u32, got: u32 },

    #[error("Controller {controller} rejected {operation}")]
    Rejected { controller: u32, operation: String },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    // ── Multi-controller writes ──────────────────────────────────────
    #[error(
        "{operation} for card {card} failed on {} of {attempted} controllers: {failed:?}",
        .failed.len()
    )]
    PartialFailure {
        operation: String,
        card: u32,
        attempted: usize,
        failed: Vec<u32>,
    },

    // ── Cycle errors ─────────────────────────────────────────────────
    #[error("{coordinator} cycle timed out after {timeout_ms}ms")]
    CycleTimeout {
        coordinator: &'static str,
        timeout_ms: u64,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<portier_api::Error> for CoreError {
    fn from(err: portier_api::Error) -> Self {
        match err {
            portier_api::Error::Timeout {
                controller,
                timeout_ms,
            } => CoreError::Timeout {
                controller,
                timeout_ms,
            },
            portier_api::Error::Io(e) => CoreError::Network {
                message: e.to_string(),
            },
            portier_api::Error::Decode { message } => {
                CoreError::Internal(format!("Decode error: {message}"))
            }
            portier_api::Error::Rejected {
                controller,
                message,
            } => CoreError::Rejected {
                controller,
                operation: message,
            },
            portier_api::Error::Unsupported(op) => CoreError::Unsupported {
                operation: op.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_timeout_keeps_controller() {
        let err = CoreError::from(portier_api::Error::Timeout {
            controller: 405_419_896,
            timeout_ms: 2500,
        });
        assert!(matches!(
            err,
            CoreError::Timeout {
                controller: 405_419_896,
                timeout_ms: 2500
            }
        ));
    }

    #[test]
    fn partial_failure_message_lists_failed_controllers() {
        let err = CoreError::PartialFailure {
            operation: "delete-card".into(),
            card: 10_058_400,
            attempted: 2,
            failed: vec![303_986_753],
        };
        assert_eq!(
            err.to_string(),
            "delete-card for card 10058400 failed on 1 of 2 controllers: [303986753]"
        );
    }
}
