//! Live update channel messages.
//!
//! Wire shape is `{"type": "...", "data": {...}}` in both directions.

use serde::{Deserialize, Serialize};

use crate::cleaning::CleaningStatus;
use crate::status::{PerformanceSnapshot, PresenceState, StatusSnapshot};
use crate::verdict::InferenceVerdict;

/// Events pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum LiveEvent {
    SensorUpdate(PresenceState),
    CaptureSuccess { filename: String },
    CaptureError { code: String, message: String },
    InferenceResult(InferenceVerdict),
    InferenceError { code: String, message: String },
    CleaningUpdate(CleaningStatus),
    Performance(PerformanceSnapshot),
    Status(StatusSnapshot),
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::SensorUpdate(_) => "sensorUpdate",
            LiveEvent::CaptureSuccess { .. } => "captureSuccess",
            LiveEvent::CaptureError { .. } => "captureError",
            LiveEvent::InferenceResult(_) => "inferenceResult",
            LiveEvent::InferenceError { .. } => "inferenceError",
            LiveEvent::CleaningUpdate(_) => "cleaningUpdate",
            LiveEvent::Performance(_) => "performance",
            LiveEvent::Status(_) => "status",
        }
    }
}

/// Messages accepted from live subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    ManualClean,
    GetPerformance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_sensor_update_wire_shape() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let event = LiveEvent::SensorUpdate(PresenceState {
            present: true,
            last_changed_at: at,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sensorUpdate");
        assert_eq!(json["data"]["present"], true);
        assert_eq!(event.kind(), "sensorUpdate");
    }

    #[test]
    fn test_capture_error_wire_shape() {
        let event = LiveEvent::CaptureError {
            code: "rate_limited".to_string(),
            message: "slow down".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "captureError");
        assert_eq!(json["data"]["code"], "rate_limited");
    }

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"manualClean"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ManualClean);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"getPerformance"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GetPerformance);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"selfDestruct"}"#).is_err());
    }
}
