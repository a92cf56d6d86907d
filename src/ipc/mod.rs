//! Broadcast channel between execution contexts
//!
//! Best-effort pub/sub: a message posted on a named channel reaches the
//! other handles open on that channel at the time it is sent. In-process
//! handles share a `LocalHub`; separate processes meet at a Unix socket relay
//! speaking length-prefixed JSON.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::constants::{channel, paths};

mod bus;
mod messages;

pub use bus::{Broadcast, ChannelHub, LocalHub, SocketHub};
pub use messages::BusMessage;

/// Directory holding relay sockets (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_dir() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(paths::APP_DIR));
    }

    // Fallback to cache dir
    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(paths::APP_DIR))
}

/// Write length-prefixed message to stream
pub(crate) fn write_message<W: Write, T: Serialize>(stream: &mut W, msg: &T) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    write_frame(stream, &json)
}

/// Write one raw frame (u32 little-endian length, then payload)
pub(crate) fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > channel::MAX_FRAME_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", payload.len(), channel::MAX_FRAME_SIZE));
    }

    let len = payload.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;

    stream
        .write_all(payload)
        .context("Failed to write message payload")?;

    stream.flush().context("Failed to flush stream")?;

    Ok(())
}

/// Read one raw frame
pub(crate) fn read_frame<R: Read>(stream: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent huge allocation from a corrupt prefix)
    if len > channel::MAX_FRAME_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, channel::MAX_FRAME_SIZE));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .context("Failed to read message payload")?;
    Ok(payload)
}
