//! The five built-in themes

use super::{Anchor, Callout, Element, Layout, ThemeRenderer, marquee_cycle};
use crate::config::{OverlayConfig, Platform, Theme};

/// Placement and wording that distinguishes one theme from another
struct Style {
    theme: Theme,
    /// Marquee cycle at speed zero
    marquee_base: u32,
    ticker: Anchor,
    ticker_badge: Option<&'static str>,
    webcam: Anchor,
    webcam_caption: &'static str,
    chat: Anchor,
    chat_title: &'static str,
    socials: Anchor,
    /// YouTube, Instagram, TikTok
    social_labels: [&'static str; 3],
    decorations: &'static [&'static str],
}

impl Style {
    fn compose(&self, config: &OverlayConfig) -> Layout {
        let mut elements: Vec<Element> = self
            .decorations
            .iter()
            .copied()
            .map(Element::Decoration)
            .collect();

        if config.ticker.visible {
            elements.push(Element::Ticker {
                anchor: self.ticker,
                scale: config.global_scale,
                badge: self.ticker_badge,
                text: config.ticker.text.clone(),
                cycle_secs: marquee_cycle(self.marquee_base, config.ticker.speed),
            });
        }
        if config.webcam.visible {
            elements.push(Element::Webcam {
                anchor: self.webcam,
                scale: config.webcam.scale,
                caption: self.webcam_caption,
            });
        }
        if config.chat.visible {
            elements.push(Element::Chat {
                anchor: self.chat,
                scale: config.chat.scale,
                title: self.chat_title,
            });
        }

        let callouts: Vec<Callout> = Platform::ALL
            .into_iter()
            .zip(self.social_labels)
            .filter_map(|(platform, label)| {
                config.handles.get(platform).map(|handle| Callout {
                    platform,
                    label,
                    handle: handle.to_string(),
                })
            })
            .collect();
        if !callouts.is_empty() {
            elements.push(Element::Socials {
                anchor: self.socials,
                scale: config.global_scale,
                callouts,
                fading: false,
            });
        }

        Layout {
            theme: self.theme,
            elements,
        }
    }
}

const VALORANT: Style = Style {
    theme: Theme::Valorant,
    marquee_base: 30,
    ticker: Anchor::TopLeft,
    ticker_badge: Some("LIVE"),
    webcam: Anchor::BottomLeft,
    webcam_caption: "AGENT DETECTED",
    chat: Anchor::TopRight,
    chat_title: "COMMS LINK",
    socials: Anchor::BottomRight,
    social_labels: ["SUBSCRIBE", "FOLLOW", "FOLLOW"],
    decorations: &["red top bar", "corner bracket"],
};

const RDR2: Style = Style {
    theme: Theme::Rdr2,
    marquee_base: 35,
    ticker: Anchor::BottomCenter,
    ticker_badge: None,
    webcam: Anchor::BottomLeft,
    webcam_caption: "DEAD EYE CAM",
    chat: Anchor::TopRight,
    chat_title: "SALOON GOSSIP",
    socials: Anchor::TopRight,
    social_labels: ["Follow The Trail", "Wanted Dead/Alive", "Camp Stories"],
    decorations: &["dusk shade"],
};

const CS2: Style = Style {
    theme: Theme::Cs2,
    marquee_base: 35,
    ticker: Anchor::BottomCenter,
    ticker_badge: None,
    webcam: Anchor::BottomLeft,
    webcam_caption: "OPERATOR CAM",
    chat: Anchor::TopRight,
    chat_title: "RADIO COMMS",
    socials: Anchor::TopRight,
    social_labels: ["Subscribe", "Follow", "Follow"],
    decorations: &["bottom shade", "tactical grid"],
};

const ROBLOX: Style = Style {
    theme: Theme::Roblox,
    marquee_base: 30,
    ticker: Anchor::TopLeft,
    ticker_badge: None,
    webcam: Anchor::BottomLeft,
    webcam_caption: "PLAYER CAM",
    chat: Anchor::TopRight,
    chat_title: "Chat",
    socials: Anchor::TopRight,
    social_labels: ["SUB", "IG", "TOK"],
    decorations: &["top bar", "studs"],
};

const CHATTING: Style = Style {
    theme: Theme::Chatting,
    marquee_base: 35,
    ticker: Anchor::BottomCenter,
    ticker_badge: None,
    webcam: Anchor::Center,
    webcam_caption: "Main Camera",
    chat: Anchor::TopRight,
    chat_title: "Stream Chat",
    socials: Anchor::BottomRight,
    social_labels: ["Follow Me", "Insta", "TikTok"],
    decorations: &["purple glow", "pink glow"],
};

pub struct ValorantRenderer;
pub struct Rdr2Renderer;
pub struct Cs2Renderer;
pub struct RobloxRenderer;
pub struct ChattingRenderer;

impl ThemeRenderer for ValorantRenderer {
    fn render(&self, config: &OverlayConfig) -> Layout {
        VALORANT.compose(config)
    }
}

impl ThemeRenderer for Rdr2Renderer {
    fn render(&self, config: &OverlayConfig) -> Layout {
        RDR2.compose(config)
    }
}

impl ThemeRenderer for Cs2Renderer {
    fn render(&self, config: &OverlayConfig) -> Layout {
        CS2.compose(config)
    }
}

impl ThemeRenderer for RobloxRenderer {
    fn render(&self, config: &OverlayConfig) -> Layout {
        ROBLOX.compose(config)
    }
}

impl ThemeRenderer for ChattingRenderer {
    fn render(&self, config: &OverlayConfig) -> Layout {
        CHATTING.compose(config)
    }
}
