/// Broker transport: the I/O seam under the broker session
use log::debug;
use rumqttc::{
    Client, ClientError, ConnectReturnCode, Connection, ConnectionError, Event, Incoming,
    LastWill, MqttOptions, Outgoing, QoS, RecvTimeoutError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::MqttConfig;
use crate::models::InboundMessage;
use crate::mqtt::operations::{Topics, OFFLINE};

const REQUEST_CAPACITY: usize = 10;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no active connection")]
    NoConnection,
    #[error("connection refused ({0})")]
    Refused(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("socket error: {0}")]
    Io(String),
    #[error("client error: {0}")]
    Client(String),
    #[error("timed out")]
    Timeout,
}

impl TransportError {
    /// Whether recovering from this error needs an explicit disconnect and
    /// a backoff before reconnecting. A missing connection is retried
    /// immediately.
    pub fn needs_backoff(&self) -> bool {
        !matches!(self, TransportError::NoConnection)
    }
}

/// One logical connection to a message broker
///
/// `connect`, `poll` and `disconnect` are only called from the session
/// loop thread. `publish` may be called from any thread at any time and
/// must not wait on the network.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> Result<(), TransportError>;

    /// Drive the connection for up to `tick`, returning an inbound message if one arrived
    fn poll(&self, tick: Duration) -> Result<Option<InboundMessage>, TransportError>;

    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    fn disconnect(&self);
}

/// [`Transport`] over the blocking rumqttc client
///
/// The client half (used for publishing) and the connection half (the
/// event loop) sit behind separate locks so publishing never waits for a
/// poll in progress.
pub struct RumqttTransport {
    options: MqttOptions,
    connect_timeout: Duration,
    client: Mutex<Option<Client>>,
    connection: Mutex<Option<Connection>>,
    /// Cleared once the event loop reports an error; driving it again would reconnect
    healthy: AtomicBool,
}

impl RumqttTransport {
    pub fn new(config: &MqttConfig, topics: &Topics, connect_timeout: Duration) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options
            .set_keep_alive(Duration::from_secs(config.keepalive_secs))
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                topics.lwt.clone(),
                OFFLINE,
                QoS::AtMostOnce,
                true,
            ));
        if let Some(username) = &config.username {
            options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        Self {
            options,
            connect_timeout,
            client: Mutex::new(None),
            connection: Mutex::new(None),
            healthy: AtomicBool::new(false),
        }
    }
}

impl Transport for RumqttTransport {
    fn connect(&self) -> Result<(), TransportError> {
        // Any previous pair is dropped only after the new one is up
        let (client, mut connection) = Client::new(self.options.clone(), REQUEST_CAPACITY);
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Incoming::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Refused(describe_refusal(ack.code).into()));
                    }
                    break;
                }
                Ok(Ok(event)) => debug!("MQTT event while connecting: {:?}", event),
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::NoConnection),
            }
        }

        *lock(&self.client) = Some(client);
        *lock(&self.connection) = Some(connection);
        self.healthy.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn poll(&self, tick: Duration) -> Result<Option<InboundMessage>, TransportError> {
        let mut guard = lock(&self.connection);
        let connection = guard.as_mut().ok_or(TransportError::NoConnection)?;

        match connection.recv_timeout(tick) {
            Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => Ok(Some(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            })),
            Ok(Ok(event)) => {
                debug!("MQTT event: {:?}", event);
                Ok(None)
            }
            Ok(Err(e)) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(e.into())
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(TransportError::NoConnection)
            }
        }
    }

    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let mut guard = lock(&self.client);
        let client = guard.as_mut().ok_or(TransportError::NoConnection)?;
        client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(TransportError::from)
    }

    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let mut guard = lock(&self.client);
        let client = guard.as_mut().ok_or(TransportError::NoConnection)?;
        client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(TransportError::from)
    }

    /// Queue a DISCONNECT behind anything already queued and drive the
    /// connection until it has been written out. A connection that already
    /// failed is dropped as is.
    fn disconnect(&self) {
        let client = lock(&self.client).take();
        let connection = lock(&self.connection).take();
        let healthy = self.healthy.swap(false, Ordering::SeqCst);

        let (Some(mut client), Some(mut connection)) = (client, connection) else {
            return;
        };
        if !healthy {
            debug!("Dropping failed broker connection");
            return;
        }
        if let Err(e) = client.try_disconnect() {
            debug!("Failed to queue disconnect: {}", e);
            return;
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Timed out waiting for disconnect to be sent");
                break;
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    debug!("Connection closed while disconnecting: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::ConnectionRefused(code) => {
                TransportError::Refused(describe_refusal(code).into())
            }
            ConnectionError::Io(e) => TransportError::Io(e.to_string()),
            ConnectionError::MqttState(e) => TransportError::Protocol(e.to_string()),
            ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
                TransportError::Timeout
            }
            other => TransportError::ConnectionLost(other.to_string()),
        }
    }
}

impl From<ClientError> for TransportError {
    fn from(e: ClientError) -> Self {
        TransportError::Client(e.to_string())
    }
}

fn describe_refusal(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "unacceptable protocol version",
        ConnectReturnCode::BadClientId => "identifier rejected",
        ConnectReturnCode::ServiceUnavailable => "broker unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad user name or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
        #[allow(unreachable_patterns)]
        _ => "unknown reason",
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
