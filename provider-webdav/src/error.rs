//! Error types for the WebDAV provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebDavError {
    /// Server answered with an unexpected status
    #[error("WebDAV {method} {target} failed (status {status}): {message}")]
    Http {
        method: String,
        target: String,
        status: u16,
        message: String,
    },

    /// Multistatus body could not be parsed
    #[error("Failed to parse WebDAV response: {0}")]
    Parse(String),

    /// A path or href could not be mapped to a store-relative path
    #[error("Invalid WebDAV path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, WebDavError>;

impl From<WebDavError> for BridgeError {
    fn from(error: WebDavError) -> Self {
        match error {
            WebDavError::Http {
                status: 404,
                target,
                ..
            } => BridgeError::NotFound(target),
            WebDavError::Http {
                status: 412,
                target,
                ..
            } => BridgeError::AlreadyExists(target),
            WebDavError::Http {
                status: status @ (401 | 403),
                method,
                target,
                ..
            } => BridgeError::OperationFailed(format!(
                "{} {} rejected with status {}; check the WebDAV username and app password",
                method, target, status
            )),
            WebDavError::Bridge(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> WebDavError {
        WebDavError::Http {
            method: "MOVE".to_string(),
            target: "_unsorted/a.png".to_string(),
            status,
            message: "nope".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            http(500).to_string(),
            "WebDAV MOVE _unsorted/a.png failed (status 500): nope"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(BridgeError::from(http(404)), BridgeError::NotFound(_)));
        assert!(matches!(
            BridgeError::from(http(412)),
            BridgeError::AlreadyExists(_)
        ));
        assert!(matches!(
            BridgeError::from(http(403)),
            BridgeError::OperationFailed(msg) if msg.contains("app password")
        ));
        // Server errors are not connection loss and must not be retried
        assert!(!BridgeError::from(http(503)).is_connection_lost());
    }

    #[test]
    fn test_bridge_error_passes_through() {
        let error = WebDavError::Bridge(BridgeError::ConnectionLost("timed out".to_string()));
        assert!(BridgeError::from(error).is_connection_lost());
    }
}
