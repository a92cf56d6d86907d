//! Application-wide constants
//!
//! Well-known names shared by every execution context, plus the ranges the
//! settings surface clamps to. Control and display instances must agree on
//! all of these, so they live in one place.

/// Persistent store names
pub mod store {
    /// Key the current record is stored under (whole-value replace)
    pub const KEY: &str = "stream_overlay_config";

    /// Extension of the file backing a key in the file store
    pub const FILE_EXTENSION: &str = "json";
}

/// Broadcast channel names
pub mod channel {
    /// Channel every instance opens on startup
    pub const NAME: &str = "stream_overlay_channel";

    /// `kind` of a full-state replacement message; anything else is ignored
    pub const UPDATE_KIND: &str = "UPDATE_CONFIG";

    /// Maximum frame size on the socket relay (1 MiB)
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// Socket file extension for the relay
    pub const SOCKET_EXTENSION: &str = "sock";

    /// Pause before a handle that lost its relay dials again
    pub const RECONNECT_DELAY_MS: u64 = 50;
}

/// Location markers
pub mod location {
    /// Fragment prefix selecting the display (overlay) mode
    pub const DISPLAY_MARKER: &str = "/overlay";

    /// Query parameter carrying an embedded snapshot token
    pub const SNAPSHOT_PARAM: &str = "cfg";

    /// Location used when none is given on the command line
    pub const DEFAULT_LOCATION: &str = "http://localhost:3000/";
}

/// Validation ranges enforced by the settings surface
pub mod validation {
    pub const MIN_SCALE: f64 = 0.5;
    pub const MAX_SCALE: f64 = 1.5;
    pub const SCALE_STEP: f64 = 0.05;

    pub const MIN_TICKER_SPEED: u32 = 5;
    pub const MAX_TICKER_SPEED: u32 = 25;

    pub const MIN_POLL_INTERVAL_MS: u64 = 100;
    pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
}

/// Display-side timing
pub mod timing {
    /// Store re-read cadence while no embedded snapshot is present
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// Social callout rotation period
    pub const SOCIAL_ROTATION_MS: u64 = 5000;

    /// Fade between two social callouts
    pub const SOCIAL_FADE_MS: u64 = 500;

    /// Quiet period before the file store reports a write by another process
    pub const STORE_DEBOUNCE_MS: u64 = 100;

    /// Main loop wake-up for console input and shutdown checks
    pub const LOOP_TICK_MS: u64 = 100;
}

/// Config and runtime paths
pub mod paths {
    /// Directory name under the XDG config/data/runtime dirs
    pub const APP_DIR: &str = "streampulse";

    /// Settings file name inside the config dir
    pub const SETTINGS_FILENAME: &str = "settings.toml";
}
