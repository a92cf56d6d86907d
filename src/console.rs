//! Line-oriented settings surface on stdin/stdout
//!
//! Each line is one command. Edits become engine signals; parse errors are
//! reported back and never reach the engine.

use anyhow::{Context, Result, anyhow, bail};
use std::io::{self, BufRead, Write};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::clipboard::Clipboard;
use crate::config::{FieldUpdate, OverlayConfig, Platform, Theme};
use crate::render;
use crate::sync::{Signal, Surface};

pub const HELP: &str = "\
commands:
  set theme <valorant|rdr2|cs2|roblox|chatting>
  set youtube|instagram|tiktok <handle>   (empty hides it)
  set webcam|ticker|chat <on|off>
  set webcam-scale|chat-scale|scale <0.5-1.5>
  set ticker-text <text>
  set ticker-speed <5-25>
  goto <location>
  export
  show
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Dispatch(Signal),
    Show,
    Help,
    Quit,
}

/// Parse one input line; `Ok(None)` for blank lines
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match verb.to_ascii_lowercase().as_str() {
        "set" => {
            let (field, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if field.is_empty() {
                bail!("usage: set <field> <value>");
            }
            Command::Dispatch(Signal::Edit(parse_update(field, value.trim())?))
        }
        "goto" => {
            if rest.is_empty() {
                bail!("usage: goto <location>");
            }
            Command::Dispatch(Signal::LocationChanged {
                location: rest.to_string(),
            })
        }
        "export" => Command::Dispatch(Signal::ExportRequested),
        "show" => Command::Show,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(command))
}

fn parse_update(field: &str, value: &str) -> Result<FieldUpdate> {
    let update = match field.to_ascii_lowercase().as_str() {
        "theme" | "game" => FieldUpdate::Theme(
            Theme::from_id(value).ok_or_else(|| anyhow!("unknown theme '{value}'"))?,
        ),
        "youtube" => FieldUpdate::Handle(Platform::Youtube, value.to_string()),
        "instagram" => FieldUpdate::Handle(Platform::Instagram, value.to_string()),
        "tiktok" => FieldUpdate::Handle(Platform::Tiktok, value.to_string()),
        "webcam" => FieldUpdate::WebcamVisible(parse_switch(value)?),
        "webcam-scale" => FieldUpdate::WebcamScale(parse_scale(value)?),
        "ticker" => FieldUpdate::TickerVisible(parse_switch(value)?),
        "ticker-text" => FieldUpdate::TickerText(value.to_string()),
        "ticker-speed" => FieldUpdate::TickerSpeed(
            value
                .parse()
                .with_context(|| format!("ticker speed must be a whole number, got '{value}'"))?,
        ),
        "chat" => FieldUpdate::ChatVisible(parse_switch(value)?),
        "chat-scale" => FieldUpdate::ChatScale(parse_scale(value)?),
        "scale" => FieldUpdate::GlobalScale(parse_scale(value)?),
        other => bail!("unknown field '{other}'"),
    };
    Ok(update)
}

fn parse_switch(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "show" | "1" => Ok(true),
        "off" | "false" | "no" | "hide" | "0" => Ok(false),
        _ => bail!("expected on/off, got '{value}'"),
    }
}

fn parse_scale(value: &str) -> Result<f64> {
    let scale: f64 = value
        .parse()
        .with_context(|| format!("scale must be a number, got '{value}'"))?;
    if !scale.is_finite() {
        bail!("scale must be finite");
    }
    Ok(scale)
}

/// Spawn a background thread reading commands from stdin
pub fn spawn_listener(sender: Sender<Command>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("Console listener started");
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to read console input");
                    break;
                }
            };
            match parse_command(&line) {
                Ok(Some(command)) => {
                    debug!(?command, "Console command");
                    if sender.send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("error: {e:#}"),
            }
        }
        debug!("Console input closed");
    })
}

/// Writes layouts to a text sink (stdout in the binary) and export URLs to
/// the clipboard
pub struct ConsoleSurface<W: Write, C: Clipboard> {
    out: W,
    clipboard: C,
    /// Social callout rotation runs from here
    shown_at: Instant,
}

impl<W: Write, C: Clipboard> ConsoleSurface<W, C> {
    pub fn new(out: W, clipboard: C) -> Self {
        Self {
            out,
            clipboard,
            shown_at: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write, C: Clipboard> Surface for ConsoleSurface<W, C> {
    fn render(&mut self, config: &OverlayConfig) {
        let layout = render::render(config).at(self.shown_at.elapsed());
        if let Err(e) = write!(self.out, "{layout}").and_then(|_| self.out.flush()) {
            error!(error = %e, "Failed to write layout");
        }
    }

    fn copy_to_clipboard(&mut self, text: &str) -> Result<()> {
        let copied = self.clipboard.copy(text);
        let note = match copied {
            Ok(()) => "copied to clipboard",
            Err(_) => "copy it by hand",
        };
        writeln!(self.out, "Overlay URL ({note}; add as a browser source): {text}")
            .context("Failed to write export URL")?;
        self.out.flush().context("Failed to flush output")?;
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(line: &str) -> FieldUpdate {
        match parse_command(line).unwrap() {
            Some(Command::Dispatch(Signal::Edit(update))) => update,
            other => panic!("expected an edit for '{line}', got {other:?}"),
        }
    }

    #[test]
    fn test_parse_edits() {
        assert_eq!(edit("set theme CS2"), FieldUpdate::Theme(Theme::Cs2));
        assert_eq!(edit("  set webcam off "), FieldUpdate::WebcamVisible(false));
        assert_eq!(edit("set chat-scale 1.25"), FieldUpdate::ChatScale(1.25));
        assert_eq!(edit("set ticker-speed 20"), FieldUpdate::TickerSpeed(20));
        assert_eq!(
            edit("set ticker-text Going live   in 5!"),
            FieldUpdate::TickerText("Going live   in 5!".into())
        );
        assert_eq!(edit("set tiktok"), FieldUpdate::Handle(Platform::Tiktok, String::new()));
    }

    #[test]
    fn test_parse_other_commands() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("show").unwrap(), Some(Command::Show));
        assert_eq!(parse_command("QUIT").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse_command("export").unwrap(),
            Some(Command::Dispatch(Signal::ExportRequested))
        );
        assert_eq!(
            parse_command("goto http://localhost:3000/#/overlay").unwrap(),
            Some(Command::Dispatch(Signal::LocationChanged {
                location: "http://localhost:3000/#/overlay".into()
            }))
        );
    }

    #[test]
    fn test_parse_errors() {
        for line in [
            "set",
            "set theme fortnite",
            "set webcam maybe",
            "set scale big",
            "set scale NaN",
            "set ticker-speed -3",
            "set volume 11",
            "goto",
            "dance",
        ] {
            assert!(parse_command(line).is_err(), "'{line}' should not parse");
        }
    }

    #[derive(Default)]
    struct FakeClipboard {
        copied: Vec<String>,
        unavailable: bool,
    }

    impl Clipboard for &mut FakeClipboard {
        fn copy(&mut self, text: &str) -> Result<()> {
            if self.unavailable {
                bail!("xclip not found");
            }
            self.copied.push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_surface_output() {
        let mut clipboard = FakeClipboard::default();
        let mut surface = ConsoleSurface::new(Vec::new(), &mut clipboard);
        surface.render(&OverlayConfig::default());
        surface.copy_to_clipboard("http://x/#/overlay?cfg=abc").unwrap();

        let text = String::from_utf8(surface.into_inner()).unwrap();
        assert!(text.contains("== Valorant overlay =="));
        assert!(text.contains("copied to clipboard"));
        assert!(text.ends_with("http://x/#/overlay?cfg=abc\n"));
        assert_eq!(clipboard.copied, ["http://x/#/overlay?cfg=abc"]);
    }

    #[test]
    fn test_export_without_clipboard_still_prints_url() {
        let mut clipboard = FakeClipboard {
            unavailable: true,
            ..FakeClipboard::default()
        };
        let mut surface = ConsoleSurface::new(Vec::new(), &mut clipboard);
        assert!(surface.copy_to_clipboard("http://x/#/overlay?cfg=abc").is_err());

        let text = String::from_utf8(surface.into_inner()).unwrap();
        assert!(text.contains("copy it by hand"));
        assert!(text.ends_with("http://x/#/overlay?cfg=abc\n"));
    }

    #[test]
    fn test_surface_shows_one_social_callout_at_a_time() {
        let mut clipboard = FakeClipboard::default();
        let mut surface = ConsoleSurface::new(Vec::new(), &mut clipboard);
        surface.render(&OverlayConfig::default());

        let text = String::from_utf8(surface.into_inner()).unwrap();
        let socials = text.lines().find(|line| line.trim_start().starts_with("socials")).unwrap();
        assert!(socials.contains("MyChannel"));
        assert!(!socials.contains(" / "));
    }
}
