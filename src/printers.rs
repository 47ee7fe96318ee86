use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};

use crate::device::{
    DeviceOptions, JobId, PrintEvent, PrinterDevice, PrinterTransport, TransportSession,
};
use crate::errors::{ConnectionError, PrintError};
use crate::escpos;
use crate::receipt::PrintPrimitive;

// ============================================================================
// ESC/POS over TCP
// ============================================================================

/// Thermal printer reachable over a raw TCP socket
pub struct NetworkPrinter;

#[async_trait]
impl PrinterTransport for NetworkPrinter {
    #[instrument(skip(self))]
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn TransportSession>, ConnectionError> {
        let addr = format!("{}:{}", host, port);
        info!("Connecting to printer at {}", addr);

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ConnectionError::Transport(format!("{}: {}", addr, e)))?;

        info!("Transport open to {}", addr);
        Ok(Box::new(EscPosSession {
            addr,
            stream: Some(stream),
        }))
    }

    fn type_name(&self) -> &'static str {
        "ESC/POS network printer"
    }
}

struct EscPosSession {
    addr: String,
    stream: Option<TcpStream>,
}

#[async_trait]
impl TransportSession for EscPosSession {
    async fn create_device(
        &mut self,
        name: &str,
        options: DeviceOptions,
        timeout: Duration,
        events: mpsc::UnboundedSender<PrintEvent>,
    ) -> Result<Box<dyn PrinterDevice>, ConnectionError> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| ConnectionError::DeviceCreation("session already used".to_string()))?;

        if options.secure {
            warn!(
                "Printer at {} is plain TCP; secure channel not available",
                self.addr
            );
        }

        let handshake = async {
            stream.write_all(&escpos::INITIALIZE).await?;
            stream.write_all(&escpos::STATUS_PRINTER).await?;
            stream.flush().await?;
            stream.read_u8().await
        };
        let status = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| {
                ConnectionError::DeviceCreation(format!(
                    "{} did not answer the status request",
                    self.addr
                ))
            })?
            .map_err(|e| ConnectionError::DeviceCreation(format!("{}: {}", self.addr, e)))?;

        if !escpos::is_status_byte(status) {
            return Err(ConnectionError::DeviceCreation(format!(
                "{} answered 0x{:02X}, not an ESC/POS printer",
                self.addr, status
            )));
        }

        info!("Device '{}' created on {} (status 0x{:02X})", name, self.addr, status);
        Ok(Box::new(EscPosDevice {
            addr: self.addr.clone(),
            stream: Arc::new(AsyncMutex::new(stream)),
            options,
            timeout,
            events,
        }))
    }
}

struct EscPosDevice {
    addr: String,
    stream: Arc<AsyncMutex<TcpStream>>,
    options: DeviceOptions,
    timeout: Duration,
    events: mpsc::UnboundedSender<PrintEvent>,
}

#[async_trait]
impl PrinterDevice for EscPosDevice {
    async fn send(&self, job_id: JobId, primitives: &[PrintPrimitive]) -> Result<(), PrintError> {
        let data = escpos::encode(primitives);
        info!("Sending job {} ({} bytes) to {}", job_id, data.len(), self.addr);

        // Held until the job's status is confirmed, so jobs never overlap
        let mut stream = self.stream.clone().lock_owned().await;

        let write = async {
            stream.write_all(&data).await?;
            if !self.options.buffered {
                stream.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| PrintError::Timeout(self.timeout.as_secs()))??;

        let events = self.events.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let event = match confirm_paper(&mut stream, timeout).await {
                Ok(()) => PrintEvent::Completed { job_id },
                Err(reason) => PrintEvent::Failed { job_id, reason },
            };
            if events.send(event).is_err() {
                warn!("Print event for job {} dropped: no listener", job_id);
            }
        });

        Ok(())
    }
}

async fn confirm_paper(stream: &mut TcpStream, timeout: Duration) -> Result<(), String> {
    let query = async {
        stream.write_all(&escpos::STATUS_PAPER).await?;
        stream.flush().await?;
        stream.read_u8().await
    };
    match tokio::time::timeout(timeout, query).await {
        Err(_) => Err(format!("no status within {} seconds", timeout.as_secs())),
        Ok(Err(e)) => Err(format!("status read failed: {}", e)),
        Ok(Ok(b)) if !escpos::is_status_byte(b) => Err(format!("unexpected status 0x{:02X}", b)),
        Ok(Ok(b)) if escpos::paper_out(b) => Err("paper end".to_string()),
        Ok(Ok(_)) => Ok(()),
    }
}

// ============================================================================
// Mock printer
// ============================================================================

/// Printer stand-in for kiosks without hardware and for tests.
/// Accepts every job and reports completion immediately.
pub struct MockPrinter {
    reachable: AtomicBool,
    accept_device: bool,
    fail_sends: Arc<AtomicBool>,
    connect_attempts: AtomicUsize,
    devices: Arc<Mutex<Vec<(String, DeviceOptions)>>>,
    jobs: Arc<Mutex<Vec<Vec<PrintPrimitive>>>>,
}

impl MockPrinter {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            accept_device: true,
            fail_sends: Arc::new(AtomicBool::new(false)),
            connect_attempts: AtomicUsize::new(0),
            devices: Arc::new(Mutex::new(Vec::new())),
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every connect fails at the transport phase
    pub fn unreachable() -> Self {
        let printer = Self::new();
        printer.set_reachable(false);
        printer
    }

    /// Transport opens but device creation fails
    pub fn rejecting_device() -> Self {
        Self {
            accept_device: false,
            ..Self::new()
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn created_devices(&self) -> Vec<(String, DeviceOptions)> {
        self.devices.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Primitives of every job that was sent successfully
    pub fn jobs(&self) -> Vec<Vec<PrintPrimitive>> {
        self.jobs.lock().map(|j| j.clone()).unwrap_or_default()
    }
}

impl Default for MockPrinter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrinterTransport for MockPrinter {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn TransportSession>, ConnectionError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport(format!(
                "mock printer unreachable at {}:{}",
                host, port
            )));
        }
        info!("Mock printer session opened for {}:{}", host, port);
        Ok(Box::new(MockSession {
            accept_device: self.accept_device,
            fail_sends: self.fail_sends.clone(),
            devices: self.devices.clone(),
            jobs: self.jobs.clone(),
        }))
    }

    fn type_name(&self) -> &'static str {
        "Mock Printer"
    }
}

struct MockSession {
    accept_device: bool,
    fail_sends: Arc<AtomicBool>,
    devices: Arc<Mutex<Vec<(String, DeviceOptions)>>>,
    jobs: Arc<Mutex<Vec<Vec<PrintPrimitive>>>>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn create_device(
        &mut self,
        name: &str,
        options: DeviceOptions,
        _timeout: Duration,
        events: mpsc::UnboundedSender<PrintEvent>,
    ) -> Result<Box<dyn PrinterDevice>, ConnectionError> {
        if !self.accept_device {
            return Err(ConnectionError::DeviceCreation(format!(
                "mock printer refused device '{}'",
                name
            )));
        }
        if let Ok(mut devices) = self.devices.lock() {
            devices.push((name.to_string(), options));
        }
        Ok(Box::new(MockDevice {
            fail_sends: self.fail_sends.clone(),
            jobs: self.jobs.clone(),
            events,
        }))
    }
}

struct MockDevice {
    fail_sends: Arc<AtomicBool>,
    jobs: Arc<Mutex<Vec<Vec<PrintPrimitive>>>>,
    events: mpsc::UnboundedSender<PrintEvent>,
}

#[async_trait]
impl PrinterDevice for MockDevice {
    async fn send(&self, job_id: JobId, primitives: &[PrintPrimitive]) -> Result<(), PrintError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PrintError::SendFailed("mock printer rejected the job".to_string()));
        }

        info!("MOCK PRINT: job {} with {} primitives", job_id, primitives.len());
        for primitive in primitives {
            if let PrintPrimitive::EmitText(text) = primitive {
                debug!("MOCK PRINT: {}", text.trim_end());
            }
        }

        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(primitives.to_vec());
        }
        let _ = self.events.send(PrintEvent::Completed { job_id });
        Ok(())
    }
}

/// Create the printer transport for this kiosk
pub fn new_printer(use_mock: bool) -> Arc<dyn PrinterTransport> {
    if use_mock {
        info!("Using mock printer");
        Arc::new(MockPrinter::new())
    } else {
        info!("Using ESC/POS network printer");
        Arc::new(NetworkPrinter)
    }
}
