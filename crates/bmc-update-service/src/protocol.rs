//! Line-delimited JSON request protocol
//!
//! Each request is one JSON object on its own line, tagged by `op`. Each
//! response is one JSON object tagged by `status`.

use bmc_firmware_update::{ActivationState, UpdaterError, VersionId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Request accepted on the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Register an unpacked image
    Create {
        /// Purpose name, bare or fully qualified
        purpose: String,
        /// Version string
        version: String,
        /// Directory the image was unpacked into
        file_path: PathBuf,
    },
    /// Shorthand for `set_state` with `Activating`
    Activate {
        /// Version to activate
        id: VersionId,
    },
    /// Request an activation state
    SetState {
        /// Version to change
        id: VersionId,
        /// Requested state
        state: ActivationState,
    },
    /// Write a redundancy priority
    SetPriority {
        /// Version to change
        id: VersionId,
        /// New priority
        priority: u8,
    },
    /// Delete one version
    Delete {
        /// Version to delete
        id: VersionId,
    },
    /// Delete every version that is not running
    DeleteAll,
    /// Request a factory reset on next boot
    FactoryReset,
    /// Set or clear field mode
    FieldMode {
        /// Requested latch value
        enabled: bool,
    },
    /// Host reported its running firmware version
    HostVersion {
        /// Version string
        version: String,
    },
    /// Forward a write-service completion signal
    UnitState {
        /// Unit name
        unit: String,
        /// Result string as reported by systemd
        result: String,
    },
    /// Snapshot of every version and the association list
    List,
    /// Snapshot of one version
    Get {
        /// Version to describe
        id: VersionId,
    },
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Request succeeded
    Ok {
        /// Request-specific payload
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Request failed
    Error {
        /// Stable error category
        kind: String,
        /// Human-readable message
        message: String,
    },
}

impl Response {
    /// Success without a payload
    pub fn ok() -> Self {
        Response::Ok {
            data: serde_json::Value::Null,
        }
    }

    /// Success carrying `data`
    pub fn with_data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::error("serialization", e.to_string()),
        }
    }

    /// Failure
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Response::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Whether the request succeeded
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}

impl From<UpdaterError> for Response {
    fn from(error: UpdaterError) -> Self {
        Response::error(error_kind(&error), error.to_string())
    }
}

/// Stable category name of an updater error
pub fn error_kind(error: &UpdaterError) -> &'static str {
    match error {
        UpdaterError::ValidationFailed(_) => "validation_failed",
        UpdaterError::WriteFailed { .. } => "write_failed",
        UpdaterError::WriteServiceSignaledFailure { .. } => "write_service_failed",
        UpdaterError::InventoryLookupFailed(_) => "inventory_lookup_failed",
        UpdaterError::NotAllowed(_) => "not_allowed",
        UpdaterError::CatalogInconsistency(_) => "catalog_inconsistency",
        UpdaterError::FunctionalVersionProtected(_) => "functional_version_protected",
        UpdaterError::Persistence(_) => "persistence",
        UpdaterError::BootEnvironment(_) => "boot_environment",
        UpdaterError::Io(_) => "io",
        UpdaterError::Serialization(_) => "serialization",
        UpdaterError::Config(_) => "config",
    }
}

/// Failure to decode a request line
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Line was empty
    #[error("empty request")]
    Empty,
    /// Line was not a valid request
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<ProtocolError> for Response {
    fn from(error: ProtocolError) -> Self {
        Response::error("protocol", error.to_string())
    }
}

/// Decode one request line
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

/// Encode one response line, newline included
pub fn encode_response(response: &Response) -> String {
    let mut line = serde_json::to_string(response).unwrap_or_else(|e| {
        format!(r#"{{"status":"error","kind":"serialization","message":"{e}"}}"#)
    });
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_requests() -> Result<(), ProtocolError> {
        assert_eq!(parse_request(r#"{"op":"list"}"#)?, Request::List);
        assert_eq!(
            parse_request(r#"{"op":"set_state","id":"1a2b3c4d","state":"Activating"}"#)?,
            Request::SetState {
                id: VersionId::new("1a2b3c4d"),
                state: ActivationState::Activating,
            }
        );
        assert_eq!(
            parse_request(r#" {"op":"field_mode","enabled":true} "#)?,
            Request::FieldMode { enabled: true }
        );
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_request("   "), Err(ProtocolError::Empty)));
        assert!(matches!(
            parse_request(r#"{"op":"reboot"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_error_response_shape() -> Result<(), serde_json::Error> {
        let response: Response =
            UpdaterError::NotAllowed("field mode is not allowed to be cleared".to_string()).into();
        let value: serde_json::Value = serde_json::from_str(encode_response(&response).trim())?;
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "not_allowed");
        Ok(())
    }
}
