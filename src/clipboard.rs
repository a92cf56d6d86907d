//! System clipboard through the display server's copy tool

use anyhow::{Context, Result, anyhow};
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    Wayland,
    X11,
    Unknown,
}

impl DisplayServer {
    /// Detect which display server the session runs on
    pub fn detect() -> Self {
        if env::var("WAYLAND_DISPLAY").is_ok() || env::var("XDG_SESSION_TYPE").as_deref() == Ok("wayland") {
            return DisplayServer::Wayland;
        }

        if env::var("DISPLAY").is_ok() {
            return DisplayServer::X11;
        }

        DisplayServer::Unknown
    }

    /// Copy command reading the text on stdin; `None` without a display server
    pub fn clipboard_command(self) -> Option<Command> {
        match self {
            DisplayServer::X11 => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard"]);
                Some(cmd)
            }
            DisplayServer::Wayland => {
                let mut cmd = Command::new("wl-copy");
                cmd.args(["--type", "text/plain;charset=utf-8"]);
                Some(cmd)
            }
            DisplayServer::Unknown => None,
        }
    }
}

pub trait Clipboard {
    fn copy(&mut self, text: &str) -> Result<()>;
}

#[derive(Debug)]
pub struct SystemClipboard {
    display_server: DisplayServer,
}

impl SystemClipboard {
    pub fn new() -> Self {
        let display_server = DisplayServer::detect();
        debug!(?display_server, "Clipboard display server detected");
        Self { display_server }
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&mut self, text: &str) -> Result<()> {
        let mut cmd = self
            .display_server
            .clipboard_command()
            .ok_or_else(|| anyhow!("no Wayland or X11 session to reach a clipboard"))?;

        // Check tool availability
        let tool = cmd.get_program().to_string_lossy().to_string();
        if !Command::new("which")
            .arg(&tool)
            .output()
            .context("Failed to look up clipboard tool")?
            .status
            .success()
        {
            return Err(anyhow!("{} not found", tool));
        }

        // Both tools keep serving the selection from a forked child, so its
        // output must not be captured
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {tool}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .with_context(|| format!("Failed to pass text to {tool}"))?;
        }

        let status = child.wait().with_context(|| format!("Failed to wait for {tool}"))?;
        if !status.success() {
            return Err(anyhow!("{} failed: {}", tool, status));
        }

        debug!(tool = %tool, bytes = text.len(), "Copied to clipboard");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipboard_command_per_display_server() {
        let wayland = DisplayServer::Wayland.clipboard_command().unwrap();
        assert_eq!(wayland.get_program(), "wl-copy");

        let x11 = DisplayServer::X11.clipboard_command().unwrap();
        assert_eq!(x11.get_program(), "xclip");
        assert_eq!(x11.get_args().collect::<Vec<_>>(), ["-selection", "clipboard"]);

        assert!(DisplayServer::Unknown.clipboard_command().is_none());
    }

    #[test]
    fn test_copy_without_display_server_fails() {
        let mut clipboard = SystemClipboard {
            display_server: DisplayServer::Unknown,
        };
        let err = clipboard.copy("http://localhost:3000/#/overlay?cfg=abc").unwrap_err();
        assert!(err.to_string().contains("clipboard"));
    }
}
