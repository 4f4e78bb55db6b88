//! MQTT subscriber session
//!
//! Connect and subscribe happen on the calling thread and block until the
//! broker acknowledges them; either failing is a startup error. After that the
//! `rumqttc` connection is driven by a dedicated worker thread that delivers
//! every publish to the registered handler and keeps reconnecting (with
//! backoff) until shutdown is requested through the shared cancellation token.

use anyhow::{Context, Result, anyhow, bail};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Packet, Publish,
    QoS, SubscribeReasonCode,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BrokerAddress;
use crate::constants::mqtt;
use crate::identity::ClientId;

/// Called on the worker thread with `(topic, payload)` for each publish
pub type DeliveryHandler = Box<dyn Fn(&str, &[u8]) + Send + 'static>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Terminated,
}

/// Inputs that drive [`SessionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    ConnAck,
    ConnectionLost,
    ShutdownRequested,
}

impl SessionState {
    pub fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Terminated, _) | (_, ShutdownRequested) => Terminated,
            (Disconnected, ConnectRequested) => Connecting,
            (Connecting | Reconnecting, ConnAck) => Connected,
            (Connecting, ConnectionLost) => Disconnected,
            (Connected | Reconnecting, ConnectionLost) => Reconnecting,
            (state, _) => state,
        }
    }
}

/// Exponential reconnect delay
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: mqtt::RECONNECT_DELAY_INITIAL,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(mqtt::RECONNECT_DELAY_MAX);
        delay
    }

    fn reset(&mut self) {
        self.current = mqtt::RECONNECT_DELAY_INITIAL;
    }
}

/// Subscriber session to one broker
pub struct MqttSubscriber {
    client: Client,
    /// Held between `connect` and `subscribe`, then moved to the worker
    connection: Option<Connection>,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl MqttSubscriber {
    /// Open a session and block until the broker accepts it
    pub fn connect(
        address: &BrokerAddress,
        client_id: &ClientId,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (client, mut connection) =
            Client::new(mqtt_options(address, client_id), mqtt::REQUEST_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(SessionState::Disconnected));

        transition(&state, SessionEvent::ConnectRequested);
        info!(host = %address.host, port = address.port, client_id = %client_id, "Connecting to broker");

        if let Err(err) = wait_for_connack(&mut connection) {
            transition(&state, SessionEvent::ConnectionLost);
            return Err(err).with_context(|| {
                format!("Failed to connect to broker {}:{}", address.host, address.port)
            });
        }

        transition(&state, SessionEvent::ConnAck);
        info!(host = %address.host, port = address.port, "Connected");

        Ok(Self {
            client,
            connection: Some(connection),
            state,
            cancel,
            worker: None,
        })
    }

    /// Subscribe at QoS 1 and start delivering to `handler`
    ///
    /// Blocks until the SubAck arrives. Publishes that race ahead of the
    /// SubAck are already delivered to `handler`.
    pub fn subscribe(&mut self, topic: &str, handler: DeliveryHandler) -> Result<()> {
        let mut connection = self
            .connection
            .take()
            .ok_or_else(|| anyhow!("Session is already subscribed"))?;

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .context("Failed to queue subscribe request")?;

        wait_for_suback(&mut connection, &handler)
            .with_context(|| format!("Failed to subscribe to topic '{topic}'"))?;
        info!(topic = %topic, "Subscribed");

        let worker = Worker {
            connection,
            client: self.client.clone(),
            handler,
            driver: SessionDriver::new(
                topic.to_string(),
                Arc::clone(&self.state),
                self.cancel.clone(),
            ),
        };
        let handle = thread::Builder::new()
            .name("mqtt-worker".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn MQTT worker thread")?;
        self.worker = Some(handle);

        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Disconnect and wait for the worker to finish
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        transition(&self.state, SessionEvent::ShutdownRequested);

        if let Err(err) = self.client.try_disconnect() {
            debug!(error = %err, "Disconnect request not queued");
        }

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("MQTT worker thread panicked");
        }

        info!("Disconnected from broker");
    }
}

/// What the worker does next for one connection notification
#[derive(Debug)]
enum Step {
    Deliver(Publish),
    Resubscribe,
    Sleep(Duration),
    Stop,
    Continue,
}

/// Per-notification decisions of the worker, kept free of I/O
struct SessionDriver {
    topic: String,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    backoff: Backoff,
}

impl SessionDriver {
    fn new(topic: String, state: Arc<Mutex<SessionState>>, cancel: CancellationToken) -> Self {
        Self {
            topic,
            state,
            cancel,
            backoff: Backoff::new(),
        }
    }

    fn on_notification(&mut self, notification: Result<Event, ConnectionError>) -> Step {
        if self.cancel.is_cancelled() {
            return Step::Stop;
        }

        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), dup = publish.dup, "Publish received");
                Step::Deliver(publish)
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                transition(&self.state, SessionEvent::ConnAck);
                self.backoff.reset();
                info!(session_present = ack.session_present, "Reconnected");

                // A clean session forgets subscriptions
                if ack.session_present {
                    Step::Continue
                } else {
                    Step::Resubscribe
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                match check_suback(&ack.return_codes) {
                    Ok(()) => info!(topic = %self.topic, "Re-subscribed"),
                    Err(err) => error!(topic = %self.topic, error = %err, "Re-subscribe rejected"),
                }
                Step::Continue
            }
            Ok(_) => Step::Continue,
            Err(err) => {
                let previous = transition(&self.state, SessionEvent::ConnectionLost);
                let delay = self.backoff.next_delay();
                if previous == SessionState::Connected {
                    warn!(error = %err, retry_in = ?delay, "Connection lost");
                } else {
                    warn!(error = %err, retry_in = ?delay, "Reconnect attempt failed");
                }
                Step::Sleep(delay)
            }
        }
    }
}

/// Owns the connection after subscribe
struct Worker {
    connection: Connection,
    client: Client,
    handler: DeliveryHandler,
    driver: SessionDriver,
}

impl Worker {
    fn run(mut self) {
        debug!(topic = %self.driver.topic, "MQTT worker started");

        for notification in self.connection.iter() {
            match self.driver.on_notification(notification) {
                Step::Deliver(publish) => (self.handler)(&publish.topic, &publish.payload),
                Step::Resubscribe => {
                    if let Err(err) = self
                        .client
                        .try_subscribe(self.driver.topic.as_str(), QoS::AtLeastOnce)
                    {
                        error!(topic = %self.driver.topic, error = %err, "Failed to queue re-subscribe");
                    }
                }
                Step::Sleep(delay) => {
                    if sleep_unless_cancelled(&self.driver.cancel, delay) {
                        break;
                    }
                }
                Step::Stop => break,
                Step::Continue => {}
            }
        }

        transition(&self.driver.state, SessionEvent::ShutdownRequested);
        debug!("MQTT worker stopped");
    }
}

/// Session options: clean session, QoS 1 subscriber, room for long SMS bodies
fn mqtt_options(address: &BrokerAddress, client_id: &ClientId) -> MqttOptions {
    let mut options = MqttOptions::new(client_id.as_str(), address.host.as_str(), address.port);
    options.set_keep_alive(mqtt::KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_max_packet_size(mqtt::MAX_PACKET_SIZE, mqtt::MAX_PACKET_SIZE);
    options
}

/// Apply `event`, returning the state before it
fn transition(state: &Mutex<SessionState>, event: SessionEvent) -> SessionState {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = *guard;
    *guard = previous.on(event);
    if previous != *guard {
        debug!(from = ?previous, to = ?*guard, "Session state changed");
    }
    previous
}

fn wait_for_connack(connection: &mut Connection) -> Result<()> {
    for notification in connection.iter() {
        match notification? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    bail!("Broker refused connection: {:?}", ack.code);
                }
                return Ok(());
            }
            other => debug!(event = ?other, "Event before ConnAck"),
        }
    }
    bail!("Connection closed before ConnAck")
}

fn wait_for_suback(connection: &mut Connection, handler: &DeliveryHandler) -> Result<()> {
    for notification in connection.iter() {
        match notification.context("Connection lost before SubAck")? {
            Event::Incoming(Packet::SubAck(ack)) => return check_suback(&ack.return_codes),
            Event::Incoming(Packet::Publish(publish)) => handler(&publish.topic, &publish.payload),
            other => debug!(event = ?other, "Event before SubAck"),
        }
    }
    bail!("Connection closed before SubAck")
}

fn check_suback(return_codes: &[SubscribeReasonCode]) -> Result<()> {
    if return_codes.is_empty() {
        bail!("Broker sent an empty SubAck");
    }
    if return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        bail!("Broker rejected the subscription");
    }
    Ok(())
}

/// Returns `true` if cancelled before `delay` elapsed
fn sleep_unless_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(mqtt::CANCEL_POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent::*;
    use SessionState::*;

    #[test]
    fn test_initial_connect_path() {
        let state = Disconnected.on(ConnectRequested);
        assert_eq!(state, Connecting);
        assert_eq!(state.on(ConnAck), Connected);
    }

    #[test]
    fn test_initial_connect_failure_returns_to_disconnected() {
        assert_eq!(Connecting.on(ConnectionLost), Disconnected);
    }

    #[test]
    fn test_reconnect_cycle() {
        let state = Connected.on(ConnectionLost);
        assert_eq!(state, Reconnecting);
        assert_eq!(state.on(ConnectionLost), Reconnecting);
        assert_eq!(state.on(ConnAck), Connected);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        for state in [Disconnected, Connecting, Connected, Reconnecting] {
            assert_eq!(state.on(ShutdownRequested), Terminated);
        }
        for event in [ConnectRequested, ConnAck, ConnectionLost] {
            assert_eq!(Terminated.on(event), Terminated);
        }
    }

    #[test]
    fn test_transition_returns_previous() {
        let state = Mutex::new(Connected);
        assert_eq!(transition(&state, ConnectionLost), Connected);
        assert_eq!(*state.lock().unwrap(), Reconnecting);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), mqtt::RECONNECT_DELAY_MAX);

        backoff.reset();
        assert_eq!(backoff.next_delay(), mqtt::RECONNECT_DELAY_INITIAL);
    }

    #[test]
    fn test_check_suback() {
        assert!(check_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]).is_ok());
        // Broker may downgrade QoS; still a successful subscription
        assert!(check_suback(&[SubscribeReasonCode::Success(QoS::AtMostOnce)]).is_ok());
        assert!(check_suback(&[SubscribeReasonCode::Failure]).is_err());
        assert!(check_suback(&[]).is_err());
    }

    #[test]
    fn test_sleep_unless_cancelled() {
        let cancel = CancellationToken::new();
        assert!(!sleep_unless_cancelled(&cancel, Duration::from_millis(10)));

        cancel.cancel();
        let started = Instant::now();
        assert!(sleep_unless_cancelled(&cancel, Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    fn driver(initial: SessionState) -> SessionDriver {
        SessionDriver::new(
            "phone/sms".to_string(),
            Arc::new(Mutex::new(initial)),
            CancellationToken::new(),
        )
    }

    fn connack(session_present: bool) -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::ConnAck(rumqttc::ConnAck {
            session_present,
            code: ConnectReturnCode::Success,
        })))
    }

    fn io_error() -> Result<Event, ConnectionError> {
        Err(ConnectionError::Io(std::io::Error::other("connection reset")))
    }

    fn current(driver: &SessionDriver) -> SessionState {
        *driver.state.lock().unwrap()
    }

    #[test]
    fn test_driver_delivers_publish() {
        let mut driver = driver(Connected);
        let publish = Publish::new("phone/sms", QoS::AtLeastOnce, br#"{"smsCode":"1"}"#.to_vec());

        match driver.on_notification(Ok(Event::Incoming(Packet::Publish(publish)))) {
            Step::Deliver(publish) => {
                assert_eq!(publish.topic, "phone/sms");
                assert_eq!(&publish.payload[..], br#"{"smsCode":"1"}"#);
            }
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn test_driver_resubscribes_after_clean_connack() {
        let mut driver = driver(Reconnecting);
        assert!(matches!(driver.on_notification(connack(false)), Step::Resubscribe));
        assert_eq!(current(&driver), Connected);
    }

    #[test]
    fn test_driver_keeps_subscription_when_session_present() {
        let mut driver = driver(Reconnecting);
        assert!(matches!(driver.on_notification(connack(true)), Step::Continue));
        assert_eq!(current(&driver), Connected);
    }

    #[test]
    fn test_driver_backs_off_until_connack() {
        let mut driver = driver(Connected);

        assert!(matches!(driver.on_notification(io_error()), Step::Sleep(d) if d == Duration::from_secs(1)));
        assert_eq!(current(&driver), Reconnecting);
        assert!(matches!(driver.on_notification(io_error()), Step::Sleep(d) if d == Duration::from_secs(2)));
        assert_eq!(current(&driver), Reconnecting);

        driver.on_notification(connack(true));
        assert!(matches!(driver.on_notification(io_error()), Step::Sleep(d) if d == Duration::from_secs(1)));
    }

    #[test]
    fn test_driver_ignores_other_events() {
        let mut driver = driver(Connected);
        let ping = Ok(Event::Outgoing(rumqttc::Outgoing::PingReq));
        assert!(matches!(driver.on_notification(ping), Step::Continue));

        let suback = Ok(Event::Incoming(Packet::SubAck(rumqttc::SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Failure],
        })));
        assert!(matches!(driver.on_notification(suback), Step::Continue));
        assert_eq!(current(&driver), Connected);
    }

    #[test]
    fn test_driver_stops_once_cancelled() {
        let mut driver = driver(Connected);
        driver.cancel.cancel();

        let publish = Publish::new("phone/sms", QoS::AtLeastOnce, b"{}".to_vec());
        let notifications = [
            io_error(),
            connack(false),
            Ok(Event::Incoming(Packet::Publish(publish))),
            Ok(Event::Outgoing(rumqttc::Outgoing::PingReq)),
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)),
        ];
        for notification in notifications {
            assert!(matches!(driver.on_notification(notification), Step::Stop));
        }
        // Nothing after cancellation touches the session state
        assert_eq!(current(&driver), Connected);
    }

    #[test]
    fn test_mqtt_options() {
        let address = BrokerAddress {
            host: "broker.local".to_string(),
            port: 1884,
        };
        let client_id = ClientId::generate().unwrap();
        let options = mqtt_options(&address, &client_id);

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), client_id.as_str());
        assert_eq!(options.keep_alive(), mqtt::KEEP_ALIVE);
        assert!(options.clean_session());
        assert_eq!(options.max_packet_size(), mqtt::MAX_PACKET_SIZE);
    }

    #[test]
    fn test_connect_to_unreachable_broker_fails() {
        // Port 1 on localhost is reserved and closed in test environments
        let address = BrokerAddress {
            host: "127.0.0.1".to_string(),
            port: 1,
        };
        let client_id = ClientId::generate().unwrap();
        let result = MqttSubscriber::connect(&address, &client_id, CancellationToken::new());
        assert!(result.is_err());
    }
}
