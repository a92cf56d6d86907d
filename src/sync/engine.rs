//! Reconciliation engine
//!
//! Decides which source governs the live record and keeps control and display
//! instances converged. `Engine::handle` is a pure transition function:
//! (state, signal) -> (state, effects). It never touches the store, the
//! channel or a timer; the runtime executes the effects it returns.
//!
//! Precedence on startup: embedded snapshot, then persistent store, then the
//! built-in default. A display instance started from a snapshot is locked to
//! it for the rest of its life.

use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{FieldUpdate, OverlayConfig};
use crate::constants::store;
use crate::ipc::BusMessage;
use crate::location::{self, Mode};
use crate::persistence::StorageEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    /// No snapshot in the location; waiting for the store read
    Loading(Mode),
    /// Editable, sole writer
    ControlSynced,
    /// Trusting an embedded snapshot, ignoring every other source
    DisplayLocked,
    /// Following the store and channel
    DisplayPolling,
}

impl SyncState {
    /// Channel and storage subscription are held in this state
    fn is_wired(self) -> bool {
        matches!(
            self,
            SyncState::ControlSynced | SyncState::DisplayLocked | SyncState::DisplayPolling
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Uninitialized => f.write_str("uninitialized"),
            SyncState::Loading(mode) => write!(f, "loading ({mode})"),
            SyncState::ControlSynced => f.write_str("control-synced"),
            SyncState::DisplayLocked => f.write_str("display-locked"),
            SyncState::DisplayPolling => f.write_str("display-polling"),
        }
    }
}

/// Inbound signal
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Start the instance at a location
    Init { location: String },
    /// Result of a requested store read; `None` when absent or unusable
    StoreLoaded(Option<OverlayConfig>),
    /// Single-field edit from the settings surface
    Edit(FieldUpdate),
    /// Poll timer fired; carries the record read from the store at that moment
    PollTick { stored: Option<OverlayConfig> },
    /// Another context wrote the store
    StorageChanged(StorageEvent),
    /// Message from the broadcast channel
    BroadcastReceived(BusMessage),
    /// Navigation within the same instance
    LocationChanged { location: String },
    /// User asked for the capture URL
    ExportRequested,
    /// Instance is being discarded
    Teardown,
}

/// Side effect for the runtime to perform, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    LoadStore,
    OpenChannel,
    CloseChannel,
    SubscribeStore,
    UnsubscribeStore,
    StartPolling,
    StopPolling,
    Persist(OverlayConfig),
    Broadcast(OverlayConfig),
    Render(OverlayConfig),
    CopyToClipboard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    state: SyncState,
    location: String,
    record: OverlayConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: SyncState::Uninitialized,
            location: String::new(),
            record: OverlayConfig::default(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn record(&self) -> &OverlayConfig {
        &self.record
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Apply one signal, returning the next engine and the effects to run
    pub fn handle(mut self, signal: Signal) -> (Self, Vec<Effect>) {
        let mut effects = Vec::new();
        match signal {
            Signal::Init { location } => self.init(location, &mut effects),
            Signal::StoreLoaded(stored) => self.store_loaded(stored, &mut effects),
            Signal::Edit(update) => self.edit(update, &mut effects),
            Signal::PollTick { stored } => self.poll_tick(stored, &mut effects),
            Signal::StorageChanged(event) => self.storage_changed(event, &mut effects),
            Signal::BroadcastReceived(message) => self.broadcast_received(message, &mut effects),
            Signal::LocationChanged { location } => self.location_changed(location, &mut effects),
            Signal::ExportRequested => self.export(&mut effects),
            Signal::Teardown => self.teardown(&mut effects),
        }
        (self, effects)
    }

    fn init(&mut self, location: String, effects: &mut Vec<Effect>) {
        if self.state != SyncState::Uninitialized {
            warn!(state = %self.state, "Ignoring init on an initialized engine");
            return;
        }

        let mode = location::resolve_mode(&location);
        let snapshot = location::embedded_snapshot(&location);
        self.location = location;

        match snapshot {
            Some(record) => {
                info!(mode = %mode, theme = %record.theme, "Starting from embedded snapshot");
                self.record = record;
                effects.extend([Effect::OpenChannel, Effect::SubscribeStore]);
                self.enter(mode, true, effects);
            }
            None => {
                debug!(mode = %mode, "No embedded snapshot, reading store");
                self.state = SyncState::Loading(mode);
                effects.push(Effect::LoadStore);
            }
        }
    }

    fn store_loaded(&mut self, stored: Option<OverlayConfig>, effects: &mut Vec<Effect>) {
        let SyncState::Loading(mode) = self.state else {
            debug!(state = %self.state, "Ignoring unexpected store read result");
            return;
        };

        self.record = match stored {
            Some(record) => {
                info!(mode = %mode, theme = %record.theme, "Starting from stored config");
                record
            }
            None => {
                info!(mode = %mode, "No usable stored config, starting from defaults");
                OverlayConfig::default()
            }
        };
        effects.extend([Effect::OpenChannel, Effect::SubscribeStore]);
        self.enter(mode, false, effects);
    }

    /// Enter the steady state for `mode`. `locked` asks a display to trust
    /// the current record exclusively.
    fn enter(&mut self, mode: Mode, locked: bool, effects: &mut Vec<Effect>) {
        match (mode, locked) {
            (Mode::Control, _) => {
                self.state = SyncState::ControlSynced;
                effects.extend([
                    Effect::Persist(self.record.clone()),
                    Effect::Broadcast(self.record.clone()),
                ]);
            }
            (Mode::Display, true) => self.state = SyncState::DisplayLocked,
            (Mode::Display, false) => {
                self.state = SyncState::DisplayPolling;
                effects.push(Effect::StartPolling);
            }
        }
        effects.push(Effect::Render(self.record.clone()));
        info!(state = %self.state, "Reconciliation state entered");
    }

    fn edit(&mut self, update: FieldUpdate, effects: &mut Vec<Effect>) {
        if self.state != SyncState::ControlSynced {
            debug!(state = %self.state, update = ?update, "Ignoring edit outside control mode");
            return;
        }
        self.record = self.record.with(update);
        effects.extend([
            Effect::Persist(self.record.clone()),
            Effect::Broadcast(self.record.clone()),
            Effect::Render(self.record.clone()),
        ]);
    }

    fn poll_tick(&mut self, stored: Option<OverlayConfig>, effects: &mut Vec<Effect>) {
        if self.state != SyncState::DisplayPolling {
            return;
        }
        if let Some(record) = stored {
            self.replace(record, "poll", effects);
        }
    }

    fn storage_changed(&mut self, event: StorageEvent, effects: &mut Vec<Effect>) {
        if !self.accepts_external_updates() || event.key != store::KEY {
            return;
        }
        match event.new_value.as_deref().map(OverlayConfig::from_json) {
            Some(Some(record)) => self.replace(record, "storage", effects),
            Some(None) => debug!("Ignoring unparsable storage change"),
            None => debug!("Ignoring storage removal"),
        }
    }

    fn broadcast_received(&mut self, message: BusMessage, effects: &mut Vec<Effect>) {
        if !self.accepts_external_updates() {
            return;
        }
        match message.config_update() {
            Ok(record) => self.replace(record, "broadcast", effects),
            Err(e) => debug!(error = %e, "Ignoring broadcast message"),
        }
    }

    fn accepts_external_updates(&self) -> bool {
        matches!(self.state, SyncState::ControlSynced | SyncState::DisplayPolling)
    }

    /// Last writer wins: adopt the incoming record wholesale
    fn replace(&mut self, record: OverlayConfig, source: &str, effects: &mut Vec<Effect>) {
        if record == self.record {
            return;
        }
        debug!(source, state = %self.state, theme = %record.theme, "Adopting external config");
        self.record = record;
        effects.push(Effect::Render(self.record.clone()));
    }

    fn location_changed(&mut self, location: String, effects: &mut Vec<Effect>) {
        let new_mode = location::resolve_mode(&location);
        let current = self.state;
        self.location = location;

        match current {
            SyncState::Uninitialized => {}
            SyncState::Loading(mode) if mode != new_mode => {
                self.state = SyncState::Loading(new_mode);
            }
            SyncState::Loading(_) => {}
            SyncState::ControlSynced if new_mode == Mode::Display => {
                info!("Switching to display mode");
                match location::embedded_snapshot(&self.location) {
                    Some(record) => {
                        self.record = record;
                        self.enter(Mode::Display, true, effects);
                    }
                    None => self.enter(Mode::Display, false, effects),
                }
            }
            SyncState::DisplayLocked | SyncState::DisplayPolling if new_mode == Mode::Control => {
                info!("Switching to control mode");
                if current == SyncState::DisplayPolling {
                    effects.push(Effect::StopPolling);
                }
                self.enter(Mode::Control, false, effects);
            }
            // Same mode: a locked display stays locked for its lifetime
            _ => {}
        }
    }

    fn export(&mut self, effects: &mut Vec<Effect>) {
        if self.state != SyncState::ControlSynced {
            debug!(state = %self.state, "Export is only available in control mode");
            return;
        }
        effects.push(Effect::CopyToClipboard(location::export_url_for(
            &self.location,
            &self.record,
        )));
    }

    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        if self.state == SyncState::DisplayPolling {
            effects.push(Effect::StopPolling);
        }
        if self.state.is_wired() {
            effects.extend([Effect::UnsubscribeStore, Effect::CloseChannel]);
        }
        if self.state != SyncState::Uninitialized {
            info!(state = %self.state, "Reconciliation engine torn down");
        }
        self.state = SyncState::Uninitialized;
    }
}
