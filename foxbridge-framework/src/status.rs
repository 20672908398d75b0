//! Bridge status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "foxtrot").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline").
    pub status: String,
    /// Additional metadata (bridge-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "running".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "offline".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Serialize to a JSON payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("foxtrot", "0.1.0");
        assert_eq!(status.bridge, "foxtrot");
        assert_eq!(status.status, "running");
    }

    #[test]
    fn test_status_with_metadata() {
        let status = BridgeStatus::running("foxtrot", "0.1.0").with_metadata(serde_json::json!({
            "variables": ["P_total", "T_out"],
            "poll_interval_ms": 5000
        }));

        assert_eq!(status.metadata["variables"][0], "P_total");
        assert_eq!(status.metadata["poll_interval_ms"], 5000);
    }

    #[test]
    fn test_status_serialization() {
        let status =
            BridgeStatus::offline("test", "1.0.0").with_metadata(serde_json::json!({ "count": 5 }));

        let json = String::from_utf8(status.to_payload().unwrap()).unwrap();
        assert!(json.contains("\"bridge\":\"test\""));
        assert!(json.contains("\"status\":\"offline\""));
        assert!(json.contains("\"count\":5"));
    }
}
