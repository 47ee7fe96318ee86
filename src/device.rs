// Printer device session: connect -> create device -> ready, and job dispatch

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

use crate::errors::{ConnectionError, PrintError};
use crate::receipt::PrintPrimitive;

/// Logical device name requested from the transport
pub const DEVICE_NAME: &str = "local_printer";

/// Capability flags every kiosk device is created with
pub const DEVICE_OPTIONS: DeviceOptions = DeviceOptions {
    secure: true,
    buffered: false,
};

/// Bound on every printer response once the device exists
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceOptions {
    pub secure: bool,
    pub buffered: bool,
}

/// Asynchronous outcome of a job that was already handed to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PrintEvent {
    Completed { job_id: JobId },
    Failed { job_id: JobId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open, device not created yet
    Connected,
    Ready,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Validate without touching the network
    pub fn resolve(&self) -> Result<(String, u16), ConnectionError> {
        let host = self.host.trim();
        let port = self.port.trim().parse::<u16>().ok().filter(|p| *p != 0);
        match port {
            Some(port) if !host.is_empty() => Ok((host.to_string(), port)),
            _ => Err(ConnectionError::InvalidEndpoint {
                host: self.host.clone(),
                port: self.port.clone(),
            }),
        }
    }
}

// ============================================================================
// Capability interface
// ============================================================================

/// Phase one: open a session to the printer host
#[async_trait]
pub trait PrinterTransport: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn TransportSession>, ConnectionError>;

    fn type_name(&self) -> &'static str;
}

/// Phase two: create the logical printer on an open session
#[async_trait]
pub trait TransportSession: Send {
    /// `events` receives the completion or failure of every job sent later.
    async fn create_device(
        &mut self,
        name: &str,
        options: DeviceOptions,
        timeout: Duration,
        events: mpsc::UnboundedSender<PrintEvent>,
    ) -> Result<Box<dyn PrinterDevice>, ConnectionError>;
}

#[async_trait]
pub trait PrinterDevice: Send + Sync {
    /// Hand the job to the printer. Returns once the bytes are sent; the
    /// physical outcome arrives later as a `PrintEvent`.
    async fn send(&self, job_id: JobId, primitives: &[PrintPrimitive]) -> Result<(), PrintError>;
}

// ============================================================================
// Session
// ============================================================================

/// The kiosk's single printer connection.
///
/// Callers share it behind an async mutex, so a render that arrives while a
/// connect is running waits for the connect to finish.
pub struct DeviceSession {
    transport: Arc<dyn PrinterTransport>,
    state: watch::Sender<ConnectionState>,
    endpoint: Option<Endpoint>,
    device: Option<Box<dyn PrinterDevice>>,
    established: bool,
    next_job: JobId,
    events_tx: mpsc::UnboundedSender<PrintEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<PrintEvent>>,
}

impl DeviceSession {
    pub fn new(transport: Arc<dyn PrinterTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            state,
            endpoint: None,
            device: None,
            established: false,
            next_job: 1,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Observe state changes without locking the session
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.type_name()
    }

    /// True once any connect has reached `Ready`
    pub fn has_been_established(&self) -> bool {
        self.established
    }

    /// Completion events of sent jobs. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PrintEvent>> {
        self.events_rx.take()
    }

    fn set_state(&self, state: ConnectionState) {
        info!(?state, "Printer connection state");
        self.state.send_replace(state);
    }

    #[instrument(skip(self), fields(transport = self.transport.type_name()))]
    pub async fn connect(&mut self, host: &str, port: &str) -> Result<(), ConnectionError> {
        let endpoint = Endpoint::new(host, port);
        let (host, port) = endpoint.resolve()?;
        self.endpoint = Some(endpoint);
        self.device = None;

        self.set_state(ConnectionState::Connecting);
        let mut session = match self.transport.connect(&host, port).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Printer transport failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        self.set_state(ConnectionState::Connected);

        let device = match session
            .create_device(
                DEVICE_NAME,
                DEVICE_OPTIONS,
                RESPONSE_TIMEOUT,
                self.events_tx.clone(),
            )
            .await
        {
            Ok(device) => device,
            Err(e) => {
                warn!("Printer device creation failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.device = Some(device);
        self.established = true;
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Send one job, connecting first with the last-known endpoint when not ready.
    #[instrument(skip(self, primitives), fields(primitives = primitives.len()))]
    pub async fn render(&mut self, primitives: &[PrintPrimitive]) -> Result<JobId, PrintError> {
        if self.state() != ConnectionState::Ready || self.device.is_none() {
            let endpoint = self.endpoint.clone().ok_or(ConnectionError::NoEndpoint)?;
            info!("Printer not ready, reconnecting to {}:{}", endpoint.host, endpoint.port);
            self.connect(&endpoint.host, &endpoint.port).await?;
        }

        let device = self
            .device
            .as_ref()
            .ok_or(PrintError::Connection(ConnectionError::NoEndpoint))?;

        let job_id = self.next_job;
        self.next_job += 1;

        let sent = device.send(job_id, primitives).await;
        match sent {
            Ok(()) => {
                info!(job_id, "Print job sent");
                Ok(job_id)
            }
            Err(e) => {
                warn!(job_id, "Print job failed: {}", e);
                self.device = None;
                self.set_state(ConnectionState::Error(e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printers::MockPrinter;

    fn job() -> Vec<PrintPrimitive> {
        vec![PrintPrimitive::EmitText("hi\n".to_string()), PrintPrimitive::Cut]
    }

    #[test]
    fn test_endpoint_validation() {
        assert_eq!(
            Endpoint::new("192.168.0.121", "8008").resolve().unwrap(),
            ("192.168.0.121".to_string(), 8008)
        );
        assert!(Endpoint::new("", "8008").resolve().is_err());
        assert!(Endpoint::new("host", "0").resolve().is_err());
        assert!(Endpoint::new("host", "http").resolve().is_err());
        assert!(Endpoint::new("host", "70000").resolve().is_err());
    }

    #[tokio::test]
    async fn test_connect_reaches_ready() {
        let printer = Arc::new(MockPrinter::new());
        let mut session = DeviceSession::new(printer.clone());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.has_been_established());

        session.connect("10.0.0.5", "9100").await.unwrap();

        assert_eq!(session.state(), ConnectionState::Ready);
        assert!(session.has_been_established());
        assert_eq!(printer.created_devices(), vec![(DEVICE_NAME.to_string(), DEVICE_OPTIONS)]);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_never_reaches_transport() {
        let printer = Arc::new(MockPrinter::new());
        let mut session = DeviceSession::new(printer.clone());

        let err = session.connect("10.0.0.5", "abc").await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidEndpoint { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(printer.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_stays_disconnected() {
        let printer = Arc::new(MockPrinter::unreachable());
        let mut session = DeviceSession::new(printer);

        let err = session.connect("10.0.0.5", "9100").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(_)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.has_been_established());
    }

    #[tokio::test]
    async fn test_device_creation_failure_reverts() {
        let printer = Arc::new(MockPrinter::rejecting_device());
        let mut session = DeviceSession::new(printer);

        let err = session.connect("10.0.0.5", "9100").await.unwrap_err();
        assert!(matches!(err, ConnectionError::DeviceCreation(_)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_render_when_disconnected_connects_first() {
        let printer = Arc::new(MockPrinter::new());
        let mut session = DeviceSession::new(printer.clone());
        session.connect("10.0.0.5", "9100").await.unwrap();
        printer.set_fail_sends(true);
        assert!(session.render(&job()).await.is_err());
        assert!(matches!(session.state(), ConnectionState::Error(_)));

        printer.set_fail_sends(false);
        let job_id = session.render(&job()).await.unwrap();

        assert_eq!(job_id, 2);
        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(printer.connect_attempts(), 2);
        assert_eq!(printer.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_render_without_endpoint() {
        let mut session = DeviceSession::new(Arc::new(MockPrinter::new()));
        let err = session.render(&job()).await.unwrap_err();
        assert!(matches!(err, PrintError::Connection(ConnectionError::NoEndpoint)));
    }

    #[tokio::test]
    async fn test_implicit_connect_failure_wraps_reason() {
        let printer = Arc::new(MockPrinter::new());
        let mut session = DeviceSession::new(printer.clone());
        session.connect("10.0.0.5", "9100").await.unwrap();
        printer.set_fail_sends(true);
        let _ = session.render(&job()).await;
        printer.set_reachable(false);

        let err = session.render(&job()).await.unwrap_err();
        match err {
            PrintError::Connection(ConnectionError::Transport(reason)) => {
                assert!(reason.contains("unreachable"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_completion_events_are_delivered() {
        let mut session = DeviceSession::new(Arc::new(MockPrinter::new()));
        let mut events = session.take_events().unwrap();
        assert!(session.take_events().is_none());

        session.connect("10.0.0.5", "9100").await.unwrap();
        let job_id = session.render(&job()).await.unwrap();

        assert_eq!(events.recv().await, Some(PrintEvent::Completed { job_id }));
    }

    #[tokio::test]
    async fn test_state_watch() {
        let mut session = DeviceSession::new(Arc::new(MockPrinter::new()));
        let watcher = session.watch_state();
        session.connect("10.0.0.5", "9100").await.unwrap();
        assert_eq!(*watcher.borrow(), ConnectionState::Ready);
    }
}
