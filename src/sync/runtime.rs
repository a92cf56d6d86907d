//! Runtime around the reconciliation engine
//!
//! Owns the store, the channel handle, the storage subscription and the poll
//! timer. Adapter threads only enqueue `Signal`s; the owner drains the queue
//! and feeds each one to `dispatch`, so transitions never interleave.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::{Effect, Engine, Signal, SyncState};
use crate::config::OverlayConfig;
use crate::constants::channel;
use crate::ipc::{Broadcast, BusMessage, ChannelHub};
use crate::persistence::{ConfigStore, Subscription};

/// Where renders and exported URLs end up
pub trait Surface {
    fn render(&mut self, config: &OverlayConfig);

    fn copy_to_clipboard(&mut self, text: &str) -> Result<()>;
}

/// Poll timer thread
struct Poller {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    fn spawn<S: ConfigStore + 'static>(
        store: Arc<S>,
        interval: Duration,
        signals: Sender<Signal>,
        token: Arc<()>,
    ) -> Self {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _token = token;
            debug!(interval_ms = interval.as_millis() as u64, "Poll timer started");
            while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                let stored = store.load();
                if signals.send(Signal::PollTick { stored }).is_err() {
                    break;
                }
            }
            debug!("Poll timer stopped");
        });
        Self { stop, handle }
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("Poll timer thread panicked");
        }
    }
}

pub struct Reconciler<S: ConfigStore + 'static, H: ChannelHub, V: Surface> {
    engine: Engine,
    store: Arc<S>,
    hub: H,
    surface: V,
    signals: Sender<Signal>,
    poll_interval: Duration,
    channel: Option<H::Channel>,
    subscription: Option<Subscription>,
    poller: Option<Poller>,
    /// One clone per live timer thread
    timer_token: Arc<()>,
}

impl<S: ConfigStore + 'static, H: ChannelHub, V: Surface> Reconciler<S, H, V> {
    /// `signals` is the sending half of the queue the owner drains
    pub fn new(store: S, hub: H, surface: V, poll_interval: Duration, signals: Sender<Signal>) -> Self {
        Self {
            engine: Engine::new(),
            store: Arc::new(store),
            hub,
            surface,
            signals,
            poll_interval,
            channel: None,
            subscription: None,
            poller: None,
            timer_token: Arc::new(()),
        }
    }

    pub fn state(&self) -> SyncState {
        self.engine.state()
    }

    pub fn record(&self) -> &OverlayConfig {
        self.engine.record()
    }

    pub fn location(&self) -> &str {
        self.engine.location()
    }

    #[cfg(test)]
    pub fn surface(&self) -> &V {
        &self.surface
    }

    #[cfg(test)]
    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Number of poll timer threads still running
    #[cfg(test)]
    pub fn live_timers(&self) -> usize {
        Arc::strong_count(&self.timer_token) - 1
    }

    /// Run one signal (and any follow-up it produces) to completion
    pub fn dispatch(&mut self, signal: Signal) {
        let mut pending = VecDeque::from([signal]);
        while let Some(signal) = pending.pop_front() {
            let (engine, effects) = std::mem::take(&mut self.engine).handle(signal);
            self.engine = engine;
            for effect in effects {
                if let Some(follow_up) = self.execute(effect) {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<Signal> {
        match effect {
            Effect::LoadStore => return Some(Signal::StoreLoaded(self.store.load())),
            Effect::OpenChannel => self.open_channel(),
            Effect::CloseChannel => {
                if let Some(mut channel) = self.channel.take() {
                    channel.close();
                }
            }
            Effect::SubscribeStore => self.subscribe_store(),
            Effect::UnsubscribeStore => {
                if let Some(mut subscription) = self.subscription.take() {
                    subscription.cancel();
                }
            }
            Effect::StartPolling => self.start_polling(),
            Effect::StopPolling => self.stop_polling(),
            Effect::Persist(config) => {
                if let Err(e) = self.store.save(&config) {
                    warn!(error = ?e, "Failed to persist config");
                }
            }
            Effect::Broadcast(config) => match self.channel.as_mut() {
                Some(channel) => {
                    if let Err(e) = channel.post(&BusMessage::update(&config)) {
                        warn!(channel = %channel.name(), error = ?e, "Failed to broadcast config");
                    }
                }
                None => debug!("No open channel, skipping broadcast"),
            },
            Effect::Render(config) => self.surface.render(&config),
            Effect::CopyToClipboard(text) => {
                if let Err(e) = self.surface.copy_to_clipboard(&text) {
                    warn!(error = ?e, "Failed to copy export URL");
                }
            }
        }
        None
    }

    fn open_channel(&mut self) {
        if self.channel.is_some() {
            return;
        }
        match self.hub.open(channel::NAME) {
            Ok(mut handle) => {
                let signals = self.signals.clone();
                handle.on_message(Box::new(move |message| {
                    let _ = signals.send(Signal::BroadcastReceived(message));
                }));
                self.channel = Some(handle);
            }
            Err(e) => warn!(channel = channel::NAME, error = ?e, "Broadcast channel unavailable"),
        }
    }

    fn subscribe_store(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let signals = self.signals.clone();
        match self.store.subscribe(Box::new(move |event| {
            let _ = signals.send(Signal::StorageChanged(event));
        })) {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => warn!(error = ?e, "Storage notifications unavailable"),
        }
    }

    fn start_polling(&mut self) {
        self.stop_polling();
        self.poller = Some(Poller::spawn(
            Arc::clone(&self.store),
            self.poll_interval,
            self.signals.clone(),
            Arc::clone(&self.timer_token),
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }

    /// Release the timer, subscription and channel. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        let running = self.engine.state() != SyncState::Uninitialized;
        if running {
            self.dispatch(Signal::Teardown);
        }
        self.stop_polling();
        self.subscription = None;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if running {
            info!("Reconciler released");
        }
    }
}

impl<S: ConfigStore + 'static, H: ChannelHub, V: Surface> Drop for Reconciler<S, H, V> {
    fn drop(&mut self) {
        self.teardown();
    }
}
