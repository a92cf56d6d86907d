//! Broadcast channel implementations
//!
//! Both implementations deliver on a background thread and hold the
//! handle's callback slot while invoking it. `close` empties the slot under
//! the same lock, so once it returns no callback can run.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fs;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak, mpsc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BusMessage, read_frame, write_frame, write_message};
use crate::constants::channel;

pub type MessageCallback = Box<dyn Fn(BusMessage) + Send + Sync>;

type Slot = Arc<Mutex<Option<MessageCallback>>>;

/// One open handle on a named channel
pub trait Broadcast: Send {
    fn name(&self) -> &str;

    /// Fan the message out to every other open handle on the channel
    fn post(&mut self, message: &BusMessage) -> Result<()>;

    /// Set the delivery callback, replacing any previous one
    fn on_message(&mut self, callback: MessageCallback);

    /// Release the handle. Idempotent; no callback runs after it returns.
    fn close(&mut self);
}

/// Factory for channel handles
pub trait ChannelHub {
    type Channel: Broadcast;

    fn open(&self, name: &str) -> Result<Self::Channel>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(slot: &Slot, message: BusMessage) {
    let slot = lock(slot);
    if let Some(callback) = slot.as_ref() {
        callback(message);
    }
}

// ==============================================================================
// In-process hub
// ==============================================================================

/// Channel hub shared by execution contexts living in one process
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<LocalRegistry>>,
}

#[derive(Default)]
struct LocalRegistry {
    next_id: u64,
    endpoints: HashMap<String, Vec<(u64, mpsc::Sender<BusMessage>)>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open handles on a channel
    #[cfg(test)]
    pub fn open_count(&self, name: &str) -> usize {
        lock(&self.inner).endpoints.get(name).map_or(0, Vec::len)
    }
}

impl ChannelHub for LocalHub {
    type Channel = LocalChannel;

    fn open(&self, name: &str) -> Result<LocalChannel> {
        let (tx, rx) = mpsc::channel::<BusMessage>();
        let id = {
            let mut registry = lock(&self.inner);
            registry.next_id += 1;
            let id = registry.next_id;
            registry.endpoints.entry(name.to_string()).or_default().push((id, tx));
            id
        };

        let slot: Slot = Arc::new(Mutex::new(None));
        let delivery_slot = Arc::clone(&slot);
        // Ends once the registry drops our sender on close
        thread::spawn(move || {
            for message in rx {
                deliver(&delivery_slot, message);
            }
        });

        debug!(channel = %name, handle = id, "Opened local channel");
        Ok(LocalChannel {
            name: name.to_string(),
            id,
            hub: Arc::downgrade(&self.inner),
            slot,
            closed: false,
        })
    }
}

pub struct LocalChannel {
    name: String,
    id: u64,
    hub: Weak<Mutex<LocalRegistry>>,
    slot: Slot,
    closed: bool,
}

impl Broadcast for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&mut self, message: &BusMessage) -> Result<()> {
        if self.closed {
            bail!("channel '{}' is closed", self.name);
        }
        let Some(hub) = self.hub.upgrade() else {
            return Ok(());
        };
        let registry = lock(&hub);
        if let Some(endpoints) = registry.endpoints.get(&self.name) {
            for (id, tx) in endpoints {
                if *id != self.id {
                    // Receiver gone means that handle is closing
                    let _ = tx.send(message.clone());
                }
            }
        }
        Ok(())
    }

    fn on_message(&mut self, callback: MessageCallback) {
        if !self.closed {
            *lock(&self.slot) = Some(callback);
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        lock(&self.slot).take();
        if let Some(hub) = self.hub.upgrade() {
            let mut registry = lock(&hub);
            if let Some(endpoints) = registry.endpoints.get_mut(&self.name) {
                endpoints.retain(|(id, _)| *id != self.id);
                if endpoints.is_empty() {
                    registry.endpoints.remove(&self.name);
                }
            }
        }
        debug!(channel = %self.name, handle = self.id, "Closed local channel");
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ==============================================================================
// Unix socket relay (separate processes)
// ==============================================================================

/// Channel hub whose handles meet at `<dir>/<name>.sock`
#[derive(Debug, Clone)]
pub struct SocketHub {
    dir: PathBuf,
}

impl SocketHub {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(super::default_socket_dir()?))
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", channel::SOCKET_EXTENSION))
    }
}

impl ChannelHub for SocketHub {
    type Channel = SocketChannel;

    fn open(&self, name: &str) -> Result<SocketChannel> {
        SocketChannel::open(name, self.socket_path(name))
    }
}

/// Handle connected to the relay.
///
/// The first process that finds no relay listening hosts one itself. When the
/// connection drops (the hosting process went away), the handle dials again
/// and hosts a new relay if nobody answers; messages in between are lost.
pub struct SocketChannel {
    link: Arc<Link>,
}

/// Connection shared between a handle and its reader thread
struct Link {
    name: String,
    path: PathBuf,
    slot: Slot,
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    writer: Option<UnixStream>,
    relay: Option<Relay>,
    /// Bumped on every connect; only the current reader may reconnect
    generation: u64,
    closed: bool,
}

impl SocketChannel {
    fn open(name: &str, path: PathBuf) -> Result<Self> {
        let link = Arc::new(Link {
            name: name.to_string(),
            path,
            slot: Arc::new(Mutex::new(None)),
            state: Mutex::new(LinkState::default()),
        });
        {
            let mut state = lock(&link.state);
            link.connect(&mut state)?;
        }
        Ok(Self { link })
    }

    /// True when this process hosts the relay
    #[cfg(test)]
    pub fn is_relay_host(&self) -> bool {
        lock(&self.link.state).relay.is_some()
    }
}

impl Link {
    fn connect(self: &Arc<Self>, state: &mut LinkState) -> Result<()> {
        if let Some(old) = state.writer.take() {
            let _ = old.shutdown(Shutdown::Both);
        }

        let stream = match UnixStream::connect(&self.path) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No relay listening, hosting one");
                // A previous relay of ours would delete the new socket file on drop
                state.relay.take();
                match Relay::bind(self.path.clone()) {
                    Ok(relay) => {
                        state.relay = Some(relay);
                        UnixStream::connect(&self.path).with_context(|| {
                            format!("Failed to connect to relay at {}", self.path.display())
                        })?
                    }
                    // Another handle started hosting in the meantime
                    Err(bind_err) => match UnixStream::connect(&self.path) {
                        Ok(stream) => stream,
                        Err(_) => return Err(bind_err),
                    },
                }
            }
        };

        let reader = stream.try_clone().context("Failed to clone relay stream")?;
        state.generation += 1;
        spawn_reader(reader, Arc::downgrade(self), Arc::clone(&self.slot), state.generation);
        state.writer = Some(stream);
        info!(channel = %self.name, host = state.relay.is_some(), "Connected to channel relay");
        Ok(())
    }

    /// Called by the reader of `generation` when its stream ended
    fn reconnect_after_loss(self: &Arc<Self>, generation: u64) {
        thread::sleep(Duration::from_millis(channel::RECONNECT_DELAY_MS));
        let mut state = lock(&self.state);
        if state.closed || state.generation != generation {
            return;
        }
        warn!(channel = %self.name, "Relay connection lost, reconnecting");
        if let Err(e) = self.connect(&mut state) {
            warn!(channel = %self.name, error = ?e, "Relay reconnect failed, next post retries");
        }
    }
}

fn spawn_reader(mut stream: UnixStream, link: Weak<Link>, slot: Slot, generation: u64) {
    thread::spawn(move || {
        loop {
            let frame = match read_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(generation, error = ?e, "Channel reader stopped");
                    break;
                }
            };
            let message = serde_json::from_slice(&frame).ok().and_then(BusMessage::from_value);
            match message {
                Some(message) => deliver(&slot, message),
                None => debug!(bytes = frame.len(), "Ignoring frame without message shape"),
            }
        }
        if let Some(link) = link.upgrade() {
            link.reconnect_after_loss(generation);
        }
    });
}

impl Broadcast for SocketChannel {
    fn name(&self) -> &str {
        &self.link.name
    }

    fn post(&mut self, message: &BusMessage) -> Result<()> {
        let mut state = lock(&self.link.state);
        if state.closed {
            bail!("channel '{}' is closed", self.link.name);
        }
        if let Some(writer) = state.writer.as_mut()
            && write_message(writer, message).is_ok()
        {
            return Ok(());
        }

        warn!(channel = %self.link.name, "Relay connection lost, reconnecting");
        self.link.connect(&mut state)?;
        match state.writer.as_mut() {
            Some(writer) => write_message(writer, message),
            None => bail!("channel '{}' has no relay connection", self.link.name),
        }
    }

    fn on_message(&mut self, callback: MessageCallback) {
        if !lock(&self.link.state).closed {
            *lock(&self.link.slot) = Some(callback);
        }
    }

    fn close(&mut self) {
        let mut state = lock(&self.link.state);
        if state.closed {
            return;
        }
        state.closed = true;
        lock(&self.link.slot).take();
        if let Some(writer) = state.writer.take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        state.relay.take();
        debug!(channel = %self.link.name, "Closed socket channel");
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

type Clients = Arc<Mutex<Vec<(u64, UnixStream)>>>;

/// Fan-out relay hosted by one process
struct Relay {
    path: PathBuf,
    stopping: Arc<AtomicBool>,
    clients: Clients,
}

impl Relay {
    fn bind(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory: {}", parent.display()))?;
        }

        if path.exists() {
            if UnixStream::connect(&path).is_ok() {
                bail!("a relay is already listening at {}", path.display());
            }
            // Nobody answered on it, so the socket file is stale
            fs::remove_file(&path)
                .context(format!("Failed to remove stale socket: {}", path.display()))?;
        }

        let listener = UnixListener::bind(&path)
            .context(format!("Failed to bind socket at {}", path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let clients: Clients = Arc::new(Mutex::new(Vec::new()));
        spawn_acceptor(listener, Arc::clone(&stopping), Arc::clone(&clients));

        info!(socket = %path.display(), "Channel relay started");
        Ok(Self { path, stopping, clients })
    }
}

fn spawn_acceptor(listener: UnixListener, stopping: Arc<AtomicBool>, clients: Clients) {
    thread::spawn(move || {
        let mut next_id = 0u64;
        for incoming in listener.incoming() {
            if stopping.load(Ordering::SeqCst) {
                break;
            }
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to accept relay connection");
                    continue;
                }
            };
            let writer = match stream.try_clone() {
                Ok(writer) => writer,
                Err(e) => {
                    warn!(error = %e, "Failed to clone relay connection");
                    continue;
                }
            };
            next_id += 1;
            lock(&clients).push((next_id, writer));
            debug!(client = next_id, "Relay client connected");
            spawn_forwarder(stream, next_id, Arc::clone(&clients));
        }
        debug!("Relay acceptor stopped");
    });
}

fn spawn_forwarder(mut stream: UnixStream, id: u64, clients: Clients) {
    thread::spawn(move || {
        while let Ok(frame) = read_frame(&mut stream) {
            let mut clients = lock(&clients);
            clients.retain_mut(|(client, out)| *client == id || write_frame(out, &frame).is_ok());
        }
        lock(&clients).retain(|(client, _)| *client != id);
        debug!(client = id, "Relay client disconnected");
    });
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Wake the acceptor so it sees the flag
        let _ = UnixStream::connect(&self.path);
        for (_, stream) in lock(&self.clients).drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let _ = fs::remove_file(&self.path);
        info!(socket = %self.path.display(), "Channel relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldUpdate, OverlayConfig, Theme};
    use std::time::Instant;

    fn collector() -> (MessageCallback, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: MessageCallback = Box::new(move |message| {
            let _ = lock(&tx).send(message);
        });
        (callback, rx)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_local_post_reaches_other_handles_only() {
        let hub = LocalHub::new();
        let mut a = hub.open("test").unwrap();
        let mut b = hub.open("test").unwrap();
        let mut other = hub.open("elsewhere").unwrap();

        let (cb_a, rx_a) = collector();
        let (cb_b, rx_b) = collector();
        let (cb_o, rx_o) = collector();
        a.on_message(cb_a);
        b.on_message(cb_b);
        other.on_message(cb_o);

        let message = BusMessage::update(&OverlayConfig::default().with(FieldUpdate::Theme(Theme::Cs2)));
        a.post(&message).unwrap();

        assert_eq!(rx_b.recv_timeout(WAIT).unwrap(), message);
        assert!(rx_a.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(rx_o.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_local_late_joiner_misses_earlier_messages() {
        let hub = LocalHub::new();
        let mut early = hub.open("test").unwrap();
        early.post(&BusMessage::update(&OverlayConfig::default())).unwrap();

        let mut late = hub.open("test").unwrap();
        let (cb, rx) = collector();
        late.on_message(cb);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_local_close_stops_delivery_and_is_idempotent() {
        let hub = LocalHub::new();
        let mut sender = hub.open("test").unwrap();
        let mut receiver = hub.open("test").unwrap();
        let (cb, rx) = collector();
        receiver.on_message(cb);
        assert_eq!(hub.open_count("test"), 2);

        receiver.close();
        receiver.close();
        assert_eq!(hub.open_count("test"), 1);
        assert!(receiver.post(&BusMessage::update(&OverlayConfig::default())).is_err());

        sender.post(&BusMessage::update(&OverlayConfig::default())).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(sender);
        assert_eq!(hub.open_count("test"), 0);
    }

    #[test]
    fn test_socket_relay_fans_out_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SocketHub::new(dir.path().to_path_buf());

        let mut host = hub.open("test").unwrap();
        assert!(host.is_relay_host());
        let mut guest = hub.open("test").unwrap();
        assert!(!guest.is_relay_host());

        let (cb_host, rx_host) = collector();
        let (cb_guest, rx_guest) = collector();
        host.on_message(cb_host);
        guest.on_message(cb_guest);

        let message = BusMessage::update(&OverlayConfig::default().with(FieldUpdate::TickerSpeed(6)));
        guest.post(&message).unwrap();
        assert_eq!(rx_host.recv_timeout(WAIT).unwrap(), message);
        assert!(rx_guest.recv_timeout(Duration::from_millis(50)).is_err());

        let reply = BusMessage::update(&OverlayConfig::default());
        host.post(&reply).unwrap();
        assert_eq!(rx_guest.recv_timeout(WAIT).unwrap(), reply);
    }

    #[test]
    fn test_socket_relay_removed_when_host_closes() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SocketHub::new(dir.path().to_path_buf());
        let mut host = hub.open("test").unwrap();
        assert!(hub.socket_path("test").exists());

        host.close();
        assert!(!hub.socket_path("test").exists());
    }

    #[test]
    fn test_socket_guest_hears_new_host_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SocketHub::new(dir.path().to_path_buf());

        let mut host = hub.open("test").unwrap();
        let mut guest = hub.open("test").unwrap();
        let (cb, rx) = collector();
        guest.on_message(cb);

        // Control panel restarts: the relay goes away with it
        host.close();
        let mut restarted = hub.open("test").unwrap();

        let message = BusMessage::update(&OverlayConfig::default().with(FieldUpdate::Theme(Theme::Roblox)));
        let deadline = Instant::now() + WAIT;
        let mut received = None;
        while received.is_none() && Instant::now() < deadline {
            restarted.post(&message).unwrap();
            received = rx.recv_timeout(Duration::from_millis(100)).ok();
        }
        assert_eq!(received, Some(message));
        assert!(restarted.is_relay_host() != guest.is_relay_host());
    }

    #[test]
    fn test_socket_guest_rehosts_when_alone() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SocketHub::new(dir.path().to_path_buf());

        let mut host = hub.open("test").unwrap();
        let guest = hub.open("test").unwrap();
        host.close();

        let deadline = Instant::now() + WAIT;
        while !guest.is_relay_host() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(guest.is_relay_host());
        assert!(hub.socket_path("test").exists());
    }
}
