//! Broadcast message shape shared by every execution context

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OverlayConfig;
use crate::constants::channel::UPDATE_KIND;
use crate::error::SyncError;

/// Message posted on the broadcast channel: `{ "kind": ..., "body": ... }`
///
/// Every update carries the full record, so receivers never depend on
/// delivery order between messages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub kind: String,
    #[serde(default)]
    pub body: Value,
}

impl BusMessage {
    /// Full-state replacement carrying `config`
    pub fn update(config: &OverlayConfig) -> Self {
        Self {
            kind: UPDATE_KIND.to_string(),
            body: serde_json::to_value(config).unwrap_or(Value::Null),
        }
    }

    /// Accept an arbitrary JSON frame if it has the message shape
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// Record carried by an update message
    pub fn config_update(&self) -> Result<OverlayConfig, SyncError> {
        if self.kind != UPDATE_KIND {
            return Err(SyncError::Delivery(format!("unrecognized kind '{}'", self.kind)));
        }
        OverlayConfig::from_value(&self.body)
            .ok_or_else(|| SyncError::Delivery("update body is not an overlay config".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldUpdate, Theme};
    use serde_json::json;

    #[test]
    fn test_update_carries_full_record() {
        let config = OverlayConfig::default().with(FieldUpdate::Theme(Theme::Roblox));
        let message = BusMessage::update(&config);
        assert_eq!(message.kind, "UPDATE_CONFIG");
        assert_eq!(message.body["game"], "roblox");
        assert_eq!(message.body["tickerSpeed"], 15);
        assert_eq!(message.config_update(), Ok(config));
    }

    #[test]
    fn test_wire_shape() {
        let text = serde_json::to_string(&BusMessage::update(&OverlayConfig::default())).unwrap();
        assert!(text.starts_with("{\"kind\":\"UPDATE_CONFIG\",\"body\":{"));
    }

    #[test]
    fn test_other_kinds_and_shapes_are_ignored() {
        let ping = BusMessage::from_value(json!({ "kind": "PING", "body": {} })).unwrap();
        assert!(matches!(ping.config_update(), Err(SyncError::Delivery(_))));

        let empty = BusMessage::from_value(json!({ "kind": "UPDATE_CONFIG" })).unwrap();
        assert!(empty.config_update().is_err());

        assert_eq!(BusMessage::from_value(json!({ "type": "UPDATE_CONFIG" })), None);
        assert_eq!(BusMessage::from_value(json!("UPDATE_CONFIG")), None);
    }
}
