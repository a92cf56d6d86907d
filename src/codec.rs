//! Snapshot codec
//!
//! Turns a record into a token that can sit in a URL fragment without
//! escaping (base64 URL-safe alphabet over compact JSON), and back.
//! Decoding fails closed: any problem yields `None`, never a panic.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use tracing::debug;

use crate::config::OverlayConfig;
use crate::error::SyncError;

/// Encode a record as a URL-safe token
pub fn encode(config: &OverlayConfig) -> String {
    URL_SAFE_NO_PAD.encode(config.to_json())
}

/// Decode a token, `None` on any failure
pub fn decode(token: &str) -> Option<OverlayConfig> {
    try_decode(token)
        .inspect_err(|e| debug!(error = %e, "Ignoring snapshot token"))
        .ok()
}

/// Decode a token, reporting why it was rejected.
///
/// Accepts the URL-safe alphabet with or without padding, and the standard
/// alphabet used by links copied from older dashboards.
pub fn try_decode(token: &str) -> Result<OverlayConfig, SyncError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(SyncError::Decode("empty token".into()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .or_else(|_| URL_SAFE.decode(token))
        .or_else(|_| STANDARD.decode(token))
        .map_err(|e| SyncError::Decode(format!("invalid base64: {e}")))?;

    let text = String::from_utf8(bytes).map_err(|e| SyncError::Decode(format!("invalid utf-8: {e}")))?;

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| SyncError::Decode(format!("invalid json: {e}")))?;

    OverlayConfig::from_value(&value)
        .ok_or_else(|| SyncError::Decode("payload is not an overlay config object".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldUpdate, Platform, Theme};

    fn customized() -> OverlayConfig {
        OverlayConfig::default()
            .with(FieldUpdate::Theme(Theme::Rdr2))
            .with(FieldUpdate::Handle(Platform::Instagram, "@outlaw_öß".into()))
            .with(FieldUpdate::TickerText("Howdy?? /// &cfg=#".into()))
            .with(FieldUpdate::TickerSpeed(22))
            .with(FieldUpdate::ChatVisible(false))
            .with(FieldUpdate::WebcamScale(1.35))
    }

    #[test]
    fn test_round_trip() {
        for config in [OverlayConfig::default(), customized()] {
            assert_eq!(decode(&encode(&config)), Some(config));
        }
    }

    #[test]
    fn test_encoding_is_deterministic_and_url_safe() {
        let config = customized();
        let token = encode(&config);
        assert_eq!(token, encode(&config.clone()));
        assert!(
            token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "token needs escaping: {token}"
        );
    }

    #[test]
    fn test_accepts_standard_alphabet_with_padding() {
        let token = STANDARD.encode(r#"{"game":"roblox","tickerSpeed":7}"#);
        let config = decode(&token).unwrap();
        assert_eq!(config.theme, Theme::Roblox);
        assert_eq!(config.ticker.speed, 7);
    }

    #[test]
    fn test_garbage_is_rejected() {
        for input in ["", "   ", "%%%", "not base64!", "eyJnYW1lIjo", "\u{1F600}", "////"] {
            assert_eq!(decode(input), None, "input {input:?}");
        }
    }

    #[test]
    fn test_valid_base64_of_non_record_is_rejected() {
        for payload in ["[1,2]", "\"valorant\"", "{}", "null", "{\"game\":"] {
            let token = URL_SAFE_NO_PAD.encode(payload);
            assert!(matches!(try_decode(&token), Err(SyncError::Decode(_))), "payload {payload}");
        }
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let token = URL_SAFE_NO_PAD.encode([0xff, 0xfe, 0x00]);
        assert!(try_decode(&token).unwrap_err().to_string().contains("utf-8"));
    }
}
