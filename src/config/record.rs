//! Overlay configuration record
//!
//! The single record every execution context agrees on. It is a plain value:
//! every change produces a whole new record, and the wire form (store value,
//! broadcast body, snapshot payload) is always the complete flat object.
//!
//! Reading is forgiving. A field that is missing or has the wrong JSON type is
//! replaced by its default, an unknown theme becomes the default theme, and
//! nothing on the read path can panic.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::constants::validation::*;

/// Wire key names (flat object, camelCase as the dashboard writes them)
mod keys {
    pub const THEME: &str = "game";
    pub const YOUTUBE: &str = "youtubeName";
    pub const INSTAGRAM: &str = "instagramName";
    pub const TIKTOK: &str = "tiktokName";
    pub const SHOW_WEBCAM: &str = "showWebcam";
    pub const WEBCAM_SCALE: &str = "webcamScale";
    pub const SHOW_TICKER: &str = "showTicker";
    pub const TICKER_TEXT: &str = "tickerText";
    pub const TICKER_SPEED: &str = "tickerSpeed";
    pub const GLOBAL_SCALE: &str = "elementsScale";
    pub const SHOW_CHAT: &str = "showChat";
    pub const CHAT_SCALE: &str = "chatScale";
}

/// Game theme selecting which renderer consumes the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Valorant,
    Rdr2,
    Cs2,
    Roblox,
    Chatting,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::Valorant,
        Theme::Rdr2,
        Theme::Cs2,
        Theme::Roblox,
        Theme::Chatting,
    ];

    /// Wire identifier
    pub fn id(self) -> &'static str {
        match self {
            Theme::Valorant => "valorant",
            Theme::Rdr2 => "rdr2",
            Theme::Cs2 => "cs2",
            Theme::Roblox => "roblox",
            Theme::Chatting => "chatting",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Theme::Valorant => "Valorant",
            Theme::Rdr2 => "RDR 2 Roleplay",
            Theme::Cs2 => "Counter Strike 2",
            Theme::Roblox => "Roblox",
            Theme::Chatting => "Just Chatting",
        }
    }

    /// Look up a theme by wire identifier (case-insensitive)
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|theme| theme.id().eq_ignore_ascii_case(id.trim()))
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Social platform a creator handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Youtube,
    Instagram,
    Tiktok,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Youtube, Platform::Instagram, Platform::Tiktok];

    pub fn label(self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube",
            Platform::Instagram => "Instagram",
            Platform::Tiktok => "TikTok",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatorHandles {
    #[serde(rename = "youtubeName")]
    pub youtube: String,
    #[serde(rename = "instagramName")]
    pub instagram: String,
    #[serde(rename = "tiktokName")]
    pub tiktok: String,
}

impl CreatorHandles {
    /// Handle for a platform, `None` when empty (not shown). Whitespace
    /// counts as a handle and is shown as typed.
    pub fn get(&self, platform: Platform) -> Option<&str> {
        let handle = match platform {
            Platform::Youtube => &self.youtube,
            Platform::Instagram => &self.instagram,
            Platform::Tiktok => &self.tiktok,
        };
        (!handle.is_empty()).then_some(handle.as_str())
    }

    fn set(&mut self, platform: Platform, value: String) {
        match platform {
            Platform::Youtube => self.youtube = value,
            Platform::Instagram => self.instagram = value,
            Platform::Tiktok => self.tiktok = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebcamSettings {
    #[serde(rename = "showWebcam")]
    pub visible: bool,
    #[serde(rename = "webcamScale")]
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerSettings {
    #[serde(rename = "showTicker")]
    pub visible: bool,
    #[serde(rename = "tickerText")]
    pub text: String,
    #[serde(rename = "tickerSpeed")]
    pub speed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSettings {
    #[serde(rename = "showChat")]
    pub visible: bool,
    #[serde(rename = "chatScale")]
    pub scale: f64,
}

/// Complete overlay configuration.
///
/// Serializes as one flat object in a fixed key order, so encoding a given
/// record always yields the same text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayConfig {
    #[serde(rename = "game")]
    pub theme: Theme,
    #[serde(flatten)]
    pub handles: CreatorHandles,
    #[serde(flatten)]
    pub webcam: WebcamSettings,
    #[serde(flatten)]
    pub ticker: TickerSettings,
    #[serde(rename = "elementsScale")]
    pub global_scale: f64,
    #[serde(flatten)]
    pub chat: ChatSettings,
}

// Default value functions
fn default_ticker_text() -> String {
    "Welcome to the stream! Don't forget to like and subscribe!".to_string()
}

fn default_ticker_speed() -> u32 {
    15
}

fn default_scale() -> f64 {
    1.0
}

impl Default for CreatorHandles {
    fn default() -> Self {
        Self {
            youtube: "MyChannel".to_string(),
            instagram: "@MyInsta".to_string(),
            tiktok: "@MyTikTok".to_string(),
        }
    }
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            visible: true,
            scale: default_scale(),
        }
    }
}

impl Default for TickerSettings {
    fn default() -> Self {
        Self {
            visible: true,
            text: default_ticker_text(),
            speed: default_ticker_speed(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            visible: true,
            scale: default_scale(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            handles: CreatorHandles::default(),
            webcam: WebcamSettings::default(),
            ticker: TickerSettings::default(),
            global_scale: default_scale(),
            chat: ChatSettings::default(),
        }
    }
}

/// Single-field update request produced by the settings surface
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Theme(Theme),
    Handle(Platform, String),
    WebcamVisible(bool),
    WebcamScale(f64),
    TickerVisible(bool),
    TickerText(String),
    TickerSpeed(u32),
    ChatVisible(bool),
    ChatScale(f64),
    GlobalScale(f64),
}

impl OverlayConfig {
    /// Rebuild a record from an untrusted JSON value.
    ///
    /// Returns `None` unless the value is a non-empty object. Any field that
    /// is missing or of the wrong type is replaced by its default.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.is_empty() {
            return None;
        }

        let defaults = Self::default();
        Some(Self {
            theme: map
                .get(keys::THEME)
                .and_then(Value::as_str)
                .and_then(Theme::from_id)
                .unwrap_or(defaults.theme),
            handles: CreatorHandles {
                youtube: text(map, keys::YOUTUBE).unwrap_or(defaults.handles.youtube),
                instagram: text(map, keys::INSTAGRAM).unwrap_or(defaults.handles.instagram),
                tiktok: text(map, keys::TIKTOK).unwrap_or(defaults.handles.tiktok),
            },
            webcam: WebcamSettings {
                visible: flag(map, keys::SHOW_WEBCAM).unwrap_or(defaults.webcam.visible),
                scale: number(map, keys::WEBCAM_SCALE).unwrap_or(defaults.webcam.scale),
            },
            ticker: TickerSettings {
                visible: flag(map, keys::SHOW_TICKER).unwrap_or(defaults.ticker.visible),
                text: text(map, keys::TICKER_TEXT).unwrap_or(defaults.ticker.text),
                speed: speed(map, keys::TICKER_SPEED).unwrap_or(defaults.ticker.speed),
            },
            global_scale: number(map, keys::GLOBAL_SCALE).unwrap_or(defaults.global_scale),
            chat: ChatSettings {
                visible: flag(map, keys::SHOW_CHAT).unwrap_or(defaults.chat.visible),
                scale: number(map, keys::CHAT_SCALE).unwrap_or(defaults.chat.scale),
            },
        })
    }

    /// Parse stored/transmitted JSON text, repairing missing fields
    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|value| Self::from_value(&value))
    }

    /// Return a new record with exactly one field changed.
    ///
    /// Numeric values are clamped to the ranges the settings surface allows;
    /// a non-finite scale leaves the field unchanged.
    pub fn with(&self, update: FieldUpdate) -> Self {
        let mut next = self.clone();
        match update {
            FieldUpdate::Theme(theme) => next.theme = theme,
            FieldUpdate::Handle(platform, value) => next.handles.set(platform, value),
            FieldUpdate::WebcamVisible(visible) => next.webcam.visible = visible,
            FieldUpdate::WebcamScale(scale) => next.webcam.scale = clamp_scale(scale, self.webcam.scale),
            FieldUpdate::TickerVisible(visible) => next.ticker.visible = visible,
            FieldUpdate::TickerText(text) => next.ticker.text = text,
            FieldUpdate::TickerSpeed(speed) => {
                next.ticker.speed = speed.clamp(MIN_TICKER_SPEED, MAX_TICKER_SPEED)
            }
            FieldUpdate::ChatVisible(visible) => next.chat.visible = visible,
            FieldUpdate::ChatScale(scale) => next.chat.scale = clamp_scale(scale, self.chat.scale),
            FieldUpdate::GlobalScale(scale) => next.global_scale = clamp_scale(scale, self.global_scale),
        }
        next
    }

    /// Serialize to compact JSON in wire order
    pub fn to_json(&self) -> String {
        // Every field is a string, bool or finite number; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<'de> Deserialize<'de> for OverlayConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| de::Error::custom("expected a non-empty overlay config object"))
    }
}

fn clamp_scale(scale: f64, current: f64) -> f64 {
    if !scale.is_finite() {
        return current;
    }
    // Snap to the slider step, then to two decimals
    let snapped = (scale / SCALE_STEP).round() * SCALE_STEP;
    ((snapped * 100.0).round() / 100.0).clamp(MIN_SCALE, MAX_SCALE)
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn flag(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}

fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
}

fn speed(map: &Map<String, Value>, key: &str) -> Option<u32> {
    let value = map.get(key)?;
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    // Slider values sometimes arrive as floats
    value
        .as_f64()
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_matches_dashboard_defaults() {
        let config = OverlayConfig::default();
        assert_eq!(config.theme, Theme::Valorant);
        assert_eq!(config.handles.youtube, "MyChannel");
        assert_eq!(config.ticker.speed, 15);
        assert!(config.webcam.visible && config.ticker.visible && config.chat.visible);
        assert_eq!(config.global_scale, 1.0);
    }

    #[test]
    fn test_serializes_flat_in_wire_order() {
        let json = OverlayConfig::default().to_json();
        let order = [
            "game", "youtubeName", "instagramName", "tiktokName", "showWebcam", "webcamScale",
            "showTicker", "tickerText", "tickerSpeed", "elementsScale", "showChat", "chatScale",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|key| json.find(&format!("\"{key}\"")).expect("key present"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "keys out of order: {json}");
    }

    #[test]
    fn test_from_value_fills_missing_fields() {
        let config = OverlayConfig::from_value(&json!({ "game": "cs2", "tickerText": "gg" })).unwrap();
        assert_eq!(config.theme, Theme::Cs2);
        assert_eq!(config.ticker.text, "gg");
        assert_eq!(config.handles, CreatorHandles::default());
        assert_eq!(config.chat, ChatSettings::default());
    }

    #[test]
    fn test_from_value_replaces_wrong_types() {
        let config = OverlayConfig::from_value(&json!({
            "game": 7,
            "showWebcam": "yes",
            "webcamScale": "big",
            "tickerSpeed": -3,
            "youtubeName": null,
        }))
        .unwrap();
        assert_eq!(config, OverlayConfig::default());
    }

    #[test]
    fn test_unknown_theme_falls_back_to_default() {
        let config = OverlayConfig::from_value(&json!({ "game": "minecraft" })).unwrap();
        assert_eq!(config.theme, Theme::Valorant);
    }

    #[test]
    fn test_from_value_rejects_implausible_values() {
        assert_eq!(OverlayConfig::from_value(&json!([1, 2, 3])), None);
        assert_eq!(OverlayConfig::from_value(&json!("valorant")), None);
        assert_eq!(OverlayConfig::from_value(&json!({})), None);
        assert_eq!(OverlayConfig::from_json("not json"), None);
    }

    #[test]
    fn test_out_of_range_values_are_kept_on_read() {
        let config = OverlayConfig::from_value(&json!({ "webcamScale": 3.0, "tickerSpeed": 40 })).unwrap();
        assert_eq!(config.webcam.scale, 3.0);
        assert_eq!(config.ticker.speed, 40);
    }

    #[test]
    fn test_float_speed_is_rounded() {
        let config = OverlayConfig::from_value(&json!({ "tickerSpeed": 12.0 })).unwrap();
        assert_eq!(config.ticker.speed, 12);
    }

    #[test]
    fn test_with_changes_exactly_one_field() {
        let before = OverlayConfig::default();
        let after = before.with(FieldUpdate::TickerText("new text".into()));
        assert_eq!(after.ticker.text, "new text");

        let mut expected = before.clone();
        expected.ticker.text = "new text".into();
        assert_eq!(after, expected);
        assert_eq!(before.ticker.text, default_ticker_text());
    }

    #[test]
    fn test_with_clamps_numeric_fields() {
        let config = OverlayConfig::default()
            .with(FieldUpdate::WebcamScale(4.0))
            .with(FieldUpdate::ChatScale(0.1))
            .with(FieldUpdate::TickerSpeed(99))
            .with(FieldUpdate::GlobalScale(f64::NAN));
        assert_eq!(config.webcam.scale, MAX_SCALE);
        assert_eq!(config.chat.scale, MIN_SCALE);
        assert_eq!(config.ticker.speed, MAX_TICKER_SPEED);
        assert_eq!(config.global_scale, 1.0);
    }

    #[test]
    fn test_only_empty_handle_is_hidden() {
        let config = OverlayConfig::default()
            .with(FieldUpdate::Handle(Platform::Tiktok, String::new()))
            .with(FieldUpdate::Handle(Platform::Instagram, "  ".into()));
        assert_eq!(config.handles.get(Platform::Tiktok), None);
        assert_eq!(config.handles.get(Platform::Instagram), Some("  "));
        assert_eq!(config.handles.get(Platform::Youtube), Some("MyChannel"));
    }

    #[test]
    fn test_theme_from_id() {
        assert_eq!(Theme::from_id("RDR2"), Some(Theme::Rdr2));
        assert_eq!(Theme::from_id("chatting"), Some(Theme::Chatting));
        assert_eq!(Theme::from_id("halo"), None);
        assert_eq!(serde_json::to_string(&Theme::Cs2).unwrap(), "\"cs2\"");
    }
}
