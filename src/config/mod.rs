//! Configuration for StreamPulse
//!
//! - **record**: the overlay configuration record shared by every instance
//! - **settings**: per-user application settings (TOML)

pub mod record;
pub mod settings;

// Re-export commonly used types
pub use record::{FieldUpdate, OverlayConfig, Platform, Theme};
pub use settings::AppSettings;
