/// Broker session: presence bracketing and the connect/reconnect loop
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::mqtt::operations::{presence_payload, StateReport, Topics, POWER_FILTER};
use crate::mqtt::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    ShuttingDown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("broker session is not connected")]
    Offline,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn broker session thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Timing of the session loop
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Pause after a failed connect or a broken connection
    pub backoff: Duration,
    /// Poll interval; also the longest uninterrupted sleep
    pub tick: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            tick: Duration::from_secs(1),
        }
    }
}

/// Owns the broker connection and keeps it alive from a background thread
///
/// The background thread is the only place the session state changes.
/// Other threads publish through [`BrokerSession::publish_state`], which
/// never blocks on the network.
pub struct BrokerSession<T: Transport> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T> {
    transport: T,
    topics: Topics,
    report: StateReport,
    timing: SessionTiming,
    state: Mutex<SessionState>,
    shutdown: AtomicBool,
}

impl<T: Transport> BrokerSession<T> {
    /// Start the session loop; the first connect attempt happens on the loop thread
    pub fn start(
        transport: T,
        topics: Topics,
        report: StateReport,
        timing: SessionTiming,
    ) -> Result<Self, SessionError> {
        let shared = Arc::new(Shared {
            transport,
            topics,
            report,
            timing,
            state: Mutex::new(SessionState::Disconnected),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("broker-session".to_string())
            .spawn(move || worker_shared.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Publish a STATE document with the given mean current and voltage
    pub fn publish_state(&self, readings: Option<(f64, f64)>) -> Result<(), PublishError> {
        self.shared.publish_state(readings)
    }

    /// Stop the loop thread and close the connection
    ///
    /// The loop thread publishes the offline presence on its way out, so it
    /// is always the last presence message. Only the first call has any
    /// effect.
    pub fn shutdown(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };

        self.shared.shutdown.store(true, Ordering::SeqCst);
        if worker.join().is_err() {
            error!("Broker session thread panicked");
        }
        self.shared.transport.disconnect();
        info!("Broker session closed");
    }
}

impl<T: Transport> Drop for BrokerSession<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> Shared<T> {
    fn run(&self) {
        info!("Broker session loop started");
        let mut state = SessionState::Disconnected;
        while !self.shutdown_requested() {
            state = self.step(state);
            self.set_state(state);
        }
        self.set_state(SessionState::ShuttingDown);
        self.publish_presence(false);
        info!("Broker session loop finished");
    }

    /// Perform the work of `state` and return the state to move to
    fn step(&self, state: SessionState) -> SessionState {
        match state {
            SessionState::Disconnected => SessionState::Connecting,
            SessionState::Connecting | SessionState::Reconnecting => match self.transport.connect() {
                Ok(()) => {
                    // Shutdown raced the connect: no Online, the loop exits next
                    if self.shutdown_requested() {
                        return SessionState::Connected;
                    }
                    self.set_state(SessionState::Connected);
                    self.on_connected();
                    SessionState::Connected
                }
                Err(e) => {
                    error!("Can't connect to broker: {}", e);
                    self.sleep_backoff();
                    state
                }
            },
            SessionState::Connected => match self.transport.poll(self.timing.tick) {
                Ok(Some(msg)) => {
                    info!(
                        "Got message @ {}: ({} bytes, {}) '{}'",
                        msg.topic,
                        msg.payload.len(),
                        if msg.retain { "R" } else { "!r" },
                        String::from_utf8_lossy(&msg.payload)
                    );
                    SessionState::Connected
                }
                Ok(None) => SessionState::Connected,
                Err(e) if !e.needs_backoff() => {
                    warn!("Broker connection gone ({}), reconnecting", e);
                    SessionState::Reconnecting
                }
                Err(e) => {
                    error!("Broker loop error: {}", e);
                    self.set_state(SessionState::Reconnecting);
                    self.transport.disconnect();
                    error!("Disconnected from broker, retrying in {:?}", self.timing.backoff);
                    self.sleep_backoff();
                    SessionState::Reconnecting
                }
            },
            SessionState::ShuttingDown => SessionState::ShuttingDown,
        }
    }

    fn on_connected(&self) {
        info!("Connected to broker");
        match self.transport.subscribe(POWER_FILTER) {
            Ok(()) => debug!("Subscribed to {}", POWER_FILTER),
            Err(e) => error!("Can't subscribe to {}: {}", POWER_FILTER, e),
        }
        self.publish_presence(true);
        // Result already logged
        let _ = self.publish_state(None);
    }

    /// Presence goes straight to the transport: it brackets the connection
    /// and must also go out while the loop is winding down.
    fn publish_presence(&self, online: bool) {
        let payload = presence_payload(online);
        info!("Publish {}: {}", self.topics.lwt, payload);
        if let Err(e) = self.transport.publish(&self.topics.lwt, payload.as_bytes(), true) {
            error!("Can't publish to broker: {}", e);
        }
    }

    fn publish_state(&self, readings: Option<(f64, f64)>) -> Result<(), PublishError> {
        if self.state() != SessionState::Connected {
            return Err(PublishError::Offline);
        }

        let payload = self.report.render(readings);
        info!("{} {}", self.topics.state, payload);
        self.transport
            .publish(&self.topics.state, payload.as_bytes(), false)
            .map_err(|e| {
                error!("Can't publish to broker: {}", e);
                PublishError::from(e)
            })
    }

    /// Sleep for the backoff period in slices of at most one tick, returning
    /// early once shutdown is requested.
    fn sleep_backoff(&self) {
        let deadline = Instant::now() + self.timing.backoff;
        while !self.shutdown_requested() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(self.timing.tick));
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!("Broker session {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
