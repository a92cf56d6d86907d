//! Overlay layout per theme
//!
//! A renderer turns the record into a `Layout`: the list of visible elements
//! with where they sit and how large they are. Hidden elements are left out.

use std::fmt;
use std::time::Duration;

use crate::config::{OverlayConfig, Platform, Theme};
use crate::constants::timing;

mod themes;

pub use themes::{ChattingRenderer, Cs2Renderer, Rdr2Renderer, RobloxRenderer, ValorantRenderer};

/// Screen corner or edge an element is pinned to; scaling grows away from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    BottomCenter,
    Center,
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Anchor::TopLeft => "top-left",
            Anchor::TopRight => "top-right",
            Anchor::BottomLeft => "bottom-left",
            Anchor::BottomRight => "bottom-right",
            Anchor::BottomCenter => "bottom-center",
            Anchor::Center => "center",
        };
        f.pad(name)
    }
}

/// One social handle to call out
#[derive(Debug, Clone, PartialEq)]
pub struct Callout {
    pub platform: Platform,
    pub label: &'static str,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Webcam {
        anchor: Anchor,
        scale: f64,
        caption: &'static str,
    },
    Ticker {
        anchor: Anchor,
        scale: f64,
        badge: Option<&'static str>,
        text: String,
        /// Seconds for one full marquee pass
        cycle_secs: u32,
    },
    Chat {
        anchor: Anchor,
        scale: f64,
        title: &'static str,
    },
    Socials {
        anchor: Anchor,
        scale: f64,
        callouts: Vec<Callout>,
        /// On its way out ahead of the next callout
        fading: bool,
    },
    Decoration(&'static str),
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Webcam { anchor, scale, caption } => {
                write!(f, "webcam   {anchor:<13} x{scale:.2}  {caption}")
            }
            Element::Ticker {
                anchor,
                scale,
                badge,
                text,
                cycle_secs,
            } => {
                write!(f, "ticker   {anchor:<13} x{scale:.2}  ")?;
                if let Some(badge) = badge {
                    write!(f, "[{badge}] ")?;
                }
                write!(f, "\"{text}\" ({cycle_secs}s cycle)")
            }
            Element::Chat { anchor, scale, title } => {
                write!(f, "chat     {anchor:<13} x{scale:.2}  {title}")
            }
            Element::Socials {
                anchor,
                scale,
                callouts,
                fading,
            } => {
                write!(f, "socials  {anchor:<13} x{scale:.2}  ")?;
                let parts: Vec<String> = callouts
                    .iter()
                    .map(|c| format!("{} {} ({})", c.label, c.handle, c.platform.label()))
                    .collect();
                f.write_str(&parts.join(" / "))?;
                if *fading {
                    f.write_str(" (fading)")?;
                }
                Ok(())
            }
            Element::Decoration(name) => write!(f, "decor    {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub theme: Theme,
    pub elements: Vec<Element>,
}

impl Layout {
    /// The layout as it looks `elapsed` after the overlay appeared: the
    /// socials element carries only the callout on screen at that moment
    pub fn at(mut self, elapsed: Duration) -> Self {
        for element in &mut self.elements {
            if let Element::Socials { callouts, fading, .. } = element
                && let Some((index, visible)) = callout_at(callouts.len(), elapsed)
            {
                *callouts = vec![callouts.swap_remove(index)];
                *fading = !visible;
            }
        }
        self
    }

    #[cfg(test)]
    pub fn ticker_cycle(&self) -> Option<u32> {
        self.elements.iter().find_map(|e| match e {
            Element::Ticker { cycle_secs, .. } => Some(*cycle_secs),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn callouts(&self) -> &[Callout] {
        self.elements
            .iter()
            .find_map(|e| match e {
                Element::Socials { callouts, .. } => Some(callouts.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn has_webcam(&self) -> bool {
        self.elements.iter().any(|e| matches!(e, Element::Webcam { .. }))
    }

    #[cfg(test)]
    pub fn has_chat(&self) -> bool {
        self.elements.iter().any(|e| matches!(e, Element::Chat { .. }))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} overlay ==", self.theme.label())?;
        for element in &self.elements {
            writeln!(f, "  {element}")?;
        }
        Ok(())
    }
}

pub trait ThemeRenderer: Sync {
    fn render(&self, config: &OverlayConfig) -> Layout;
}

/// Renderer for a theme
pub fn renderer_for(theme: Theme) -> &'static dyn ThemeRenderer {
    match theme {
        Theme::Valorant => &ValorantRenderer,
        Theme::Rdr2 => &Rdr2Renderer,
        Theme::Cs2 => &Cs2Renderer,
        Theme::Roblox => &RobloxRenderer,
        Theme::Chatting => &ChattingRenderer,
    }
}

/// Layout for the record's own theme
pub fn render(config: &OverlayConfig) -> Layout {
    renderer_for(config.theme).render(config)
}

/// Seconds per marquee pass: faster tickers take less time
pub fn marquee_cycle(base_secs: u32, speed: u32) -> u32 {
    base_secs.saturating_sub(speed).max(1)
}

/// Which callout is on screen `elapsed` after the overlay appeared, and
/// whether it is visible or fading out ahead of the next one
pub fn callout_at(count: usize, elapsed: Duration) -> Option<(usize, bool)> {
    if count == 0 {
        return None;
    }
    if count == 1 {
        return Some((0, true));
    }
    let elapsed = elapsed.as_millis() as u64;
    let ticks = (elapsed / timing::SOCIAL_ROTATION_MS) as usize;
    let phase = elapsed % timing::SOCIAL_ROTATION_MS;
    if ticks > 0 && phase < timing::SOCIAL_FADE_MS {
        Some(((ticks - 1) % count, false))
    } else {
        Some((ticks % count, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldUpdate;

    fn config(theme: Theme) -> OverlayConfig {
        OverlayConfig::default().with(FieldUpdate::Theme(theme))
    }

    #[test]
    fn test_every_theme_is_registered() {
        for theme in Theme::ALL {
            assert_eq!(renderer_for(theme).render(&OverlayConfig::default()).theme, theme);
            assert_eq!(render(&config(theme)).theme, theme);
        }
    }

    #[test]
    fn test_marquee_cycle_per_theme() {
        let cycle = |theme, speed| {
            render(&config(theme).with(FieldUpdate::TickerSpeed(speed)))
                .ticker_cycle()
                .unwrap()
        };
        assert_eq!(cycle(Theme::Valorant, 15), 15);
        assert_eq!(cycle(Theme::Roblox, 25), 5);
        assert_eq!(cycle(Theme::Chatting, 15), 20);
        assert_eq!(cycle(Theme::Cs2, 5), 30);
        assert_eq!(cycle(Theme::Rdr2, 25), 10);
    }

    #[test]
    fn test_marquee_cycle_never_reaches_zero() {
        assert_eq!(marquee_cycle(30, 30), 1);
        assert_eq!(marquee_cycle(30, 90), 1);
    }

    #[test]
    fn test_hidden_elements_are_omitted() {
        let hidden = config(Theme::Cs2)
            .with(FieldUpdate::WebcamVisible(false))
            .with(FieldUpdate::ChatVisible(false))
            .with(FieldUpdate::TickerVisible(false));
        let layout = render(&hidden);
        assert!(!layout.has_webcam());
        assert!(!layout.has_chat());
        assert_eq!(layout.ticker_cycle(), None);
        assert_eq!(layout.callouts().len(), 3);
    }

    #[test]
    fn test_empty_handles_get_no_callout() {
        let config = config(Theme::Valorant)
            .with(FieldUpdate::Handle(Platform::Instagram, String::new()))
            .with(FieldUpdate::Handle(Platform::Tiktok, String::new()));
        let layout = render(&config);
        let callouts = layout.callouts();
        assert_eq!(callouts.len(), 1);
        assert_eq!(callouts[0].platform, Platform::Youtube);
        assert_eq!(callouts[0].label, "SUBSCRIBE");
        assert_eq!(callouts[0].handle, "MyChannel");
    }

    #[test]
    fn test_no_handles_no_social_element() {
        let mut config = config(Theme::Roblox);
        for platform in Platform::ALL {
            config = config.with(FieldUpdate::Handle(platform, String::new()));
        }
        let layout = render(&config);
        assert!(!layout.elements.iter().any(|e| matches!(e, Element::Socials { .. })));
    }

    #[test]
    fn test_scales_follow_their_fields() {
        let config = config(Theme::Chatting)
            .with(FieldUpdate::WebcamScale(1.2))
            .with(FieldUpdate::ChatScale(0.8))
            .with(FieldUpdate::GlobalScale(1.5));
        for element in render(&config).elements {
            match element {
                Element::Webcam { scale, .. } => assert_eq!(scale, 1.2),
                Element::Chat { scale, .. } => assert_eq!(scale, 0.8),
                Element::Ticker { scale, .. } | Element::Socials { scale, .. } => assert_eq!(scale, 1.5),
                Element::Decoration(_) => {}
            }
        }
    }

    #[test]
    fn test_callout_rotation() {
        let ms = Duration::from_millis;
        assert_eq!(callout_at(0, ms(0)), None);
        assert_eq!(callout_at(1, ms(12_345)), Some((0, true)));
        assert_eq!(callout_at(3, ms(0)), Some((0, true)));
        assert_eq!(callout_at(3, ms(4_999)), Some((0, true)));
        assert_eq!(callout_at(3, ms(5_100)), Some((0, false)));
        assert_eq!(callout_at(3, ms(5_500)), Some((1, true)));
        assert_eq!(callout_at(3, ms(15_200)), Some((2, false)));
        assert_eq!(callout_at(3, ms(15_600)), Some((0, true)));
    }

    #[test]
    fn test_layout_at_rotates_social_callouts() {
        let layout = render(&config(Theme::Chatting));
        let socials = |layout: Layout| {
            layout
                .elements
                .into_iter()
                .find_map(|e| match e {
                    Element::Socials { callouts, fading, .. } => {
                        Some((callouts.iter().map(|c| c.platform).collect::<Vec<_>>(), fading))
                    }
                    _ => None,
                })
                .unwrap()
        };
        let ms = Duration::from_millis;

        assert_eq!(socials(layout.clone().at(ms(0))), (vec![Platform::Youtube], false));
        assert_eq!(socials(layout.clone().at(ms(5_200))), (vec![Platform::Youtube], true));
        assert_eq!(socials(layout.clone().at(ms(6_000))), (vec![Platform::Instagram], false));
        assert_eq!(socials(layout.clone().at(ms(11_000))), (vec![Platform::Tiktok], false));
        assert!(layout.at(ms(5_200)).to_string().contains("(fading)"));
    }

    #[test]
    fn test_layout_display() {
        let text = render(&config(Theme::Valorant)).to_string();
        assert!(text.starts_with("== Valorant overlay =="));
        assert!(text.contains("[LIVE]"));
        assert!(text.contains("(15s cycle)"));
        assert!(text.contains("AGENT DETECTED"));
    }
}
