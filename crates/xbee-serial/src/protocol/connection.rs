//! Connection management
//!
//! [`SerialXbee`] owns one link to an XBee module. Connecting spawns a
//! background thread running a single-threaded tokio runtime; that thread
//! owns the transport, decodes incoming frames, performs queued writes and
//! runs every handler, so handlers never execute concurrently.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::serial::open_port;
use super::stream::{FrameReader, Transport};
use super::{
    Frame, HexFormat, Result, TransmitRequest, XbeeError, DEFAULT_BAUD_RATE, DEFAULT_PORT,
    DEFAULT_READ_TIMEOUT_MS,
};

/// Pause after a failed read before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Callback for every decoded frame
pub type ReadHandler = Box<dyn FnMut(&Frame) + Send>;

/// Callback for every completed write, with its outcome
pub type WriteHandler = Box<dyn FnMut(&Frame, std::result::Result<(), &XbeeError>) + Send>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No background I/O running
    Disconnected,
    /// Transport open and the read pipeline running
    Connected,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XbeeConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Timeout for each header/payload read in milliseconds, 0 disables it
    pub read_timeout_ms: u64,
}

impl Default for XbeeConfig {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl XbeeConfig {
    /// Parse a JSON configuration; missing keys take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| XbeeError::Config(e.to_string()))
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Read timeout as a duration, `None` when disabled
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

/// Snapshot of link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Frames decoded and handed to the read handler
    pub frames_received: u64,
    /// Frames fully written to the transport
    pub frames_sent: u64,
    /// Bytes consumed from the transport, including discarded ones
    pub bytes_received: u64,
    /// Bytes written to the transport
    pub bytes_sent: u64,
    /// Frames dropped as malformed
    pub decode_errors: u64,
    /// Failed or timed-out reads and failed writes
    pub transport_errors: u64,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    decode_errors: AtomicU64,
    transport_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

struct Handlers {
    read: ReadHandler,
    write: WriteHandler,
}

/// State shared between the caller and the I/O thread
struct Shared {
    handlers: Mutex<Handlers>,
    stats: Counters,
}

impl Shared {
    fn dispatch_read(&self, frame: &Frame) {
        let mut handlers = lock(&self.handlers);
        (handlers.read)(frame);
    }

    fn dispatch_write(&self, frame: &Frame, outcome: std::result::Result<(), &XbeeError>) {
        let mut handlers = lock(&self.handlers);
        (handlers.write)(frame, outcome);
    }
}

/// Handle on a running I/O thread
struct Worker {
    /// Cleared by the I/O thread when its read pipeline ends
    running: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<TransmitRequest>,
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Cancel the I/O loop and join the thread, unless called from that thread
    fn shutdown(self) {
        self.cancel.cancel();
        drop(self.outbound);

        if self.thread.thread().id() == thread::current().id() {
            warn!("stop() called from a handler; I/O thread exits once it returns");
            return;
        }
        if self.thread.join().is_err() {
            error!("XBee I/O thread panicked");
        }
    }
}

/// Clears the running flag when the I/O thread exits, including by panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
        if thread::panicking() {
            error!("Handler panicked, XBee I/O thread stopped");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn print_frame(frame: &Frame) {
    println!("{}", frame.to_hex_string(HexFormat::ByteSpacing));
}

/// XBee engine: one link, one background I/O thread
pub struct SerialXbee {
    config: XbeeConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl SerialXbee {
    /// Create an engine (not yet connected); both handlers print frames as hex
    pub fn new(config: XbeeConfig) -> Self {
        let handlers = Handlers {
            read: Box::new(print_frame),
            write: Box::new(|frame: &Frame, _: std::result::Result<(), &XbeeError>| {
                print_frame(frame)
            }),
        };
        Self {
            config,
            shared: Arc::new(Shared {
                handlers: Mutex::new(handlers),
                stats: Counters::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &XbeeConfig {
        &self.config
    }

    /// Replace the handler invoked with every decoded frame.
    ///
    /// Handlers run on the I/O thread and must not call `set_*_handler`.
    pub fn set_read_handler<F>(&self, handler: F)
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        lock(&self.shared.handlers).read = Box::new(handler);
    }

    /// Replace the handler invoked after every write attempt
    pub fn set_write_handler<F>(&self, handler: F)
    where
        F: FnMut(&Frame, std::result::Result<(), &XbeeError>) + Send + 'static,
    {
        lock(&self.shared.handlers).write = Box::new(handler);
    }

    /// Open `port_name` at `baud_rate` and start the I/O thread
    pub fn connect(&self, port_name: &str, baud_rate: u32) -> Result<()> {
        info!(port = port_name, baud_rate, "Connecting to XBee");
        self.start(port_name, || open_port(port_name, baud_rate))
            .inspect_err(|e| error!(port = port_name, error = %e, "Unable to open serial port"))
    }

    /// Connect using the port and baud rate from the configuration
    pub fn connect_with_config(&self) -> Result<()> {
        self.connect(&self.config.port_name, self.config.baud_rate)
    }

    /// Run the engine over an already-open transport
    pub fn attach<T: Transport>(&self, transport: T) -> Result<()> {
        self.start("attached transport", move || Ok(transport))
    }

    fn start<T, F>(&self, label: &str, open: F) -> Result<()>
    where
        T: Transport,
        F: FnOnce() -> Result<T>,
    {
        // A worker whose transport closed (or whose thread died) is reaped first
        let finished = {
            let mut worker = lock(&self.worker);
            match worker.as_ref().map(|w| w.running.load(Ordering::SeqCst)) {
                Some(true) => return Err(XbeeError::AlreadyConnected),
                Some(false) => worker.take(),
                None => None,
            }
        };
        if let Some(finished) = finished {
            debug!("Reaping finished XBee I/O thread");
            finished.shutdown();
        }

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(XbeeError::AlreadyConnected);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| XbeeError::ConnectionFailed(e.to_string()))?;

        // Async serial streams register with the reactor when opened
        let transport = {
            let _guard = runtime.enter();
            open()?
        };

        let (outbound, requests) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let read_timeout = self.config.read_timeout();

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("xbee-io".to_string())
            .spawn(move || {
                let _running = RunningGuard(Arc::clone(&flag));
                runtime.block_on(run_io(transport, requests, token, shared, flag, read_timeout));
            })
            .map_err(|e| XbeeError::ConnectionFailed(e.to_string()))?;

        info!(link = label, "XBee engine started");
        *worker = Some(Worker {
            running,
            outbound,
            cancel,
            thread,
        });
        Ok(())
    }

    /// Queue a Transmit Request; returns without waiting for the write
    pub fn send(&self, frame: TransmitRequest) -> Result<()> {
        let worker = lock(&self.worker);
        let worker = worker.as_ref().ok_or(XbeeError::NotConnected)?;
        worker
            .outbound
            .send(frame)
            .map_err(|_| XbeeError::NotConnected)
    }

    /// Build and queue a Transmit Request carrying `data`.
    ///
    /// Without `target_16` the request uses the "unknown" 16-bit address and
    /// the radio routes by `target_64`.
    pub fn send_data(
        &self,
        data: impl AsRef<[u8]>,
        target_64: u64,
        target_16: Option<u16>,
    ) -> Result<()> {
        let mut request = match target_16 {
            Some(target_16) => TransmitRequest::with_addresses(target_64, target_16),
            None => TransmitRequest::with_mac_64(target_64),
        };
        request.set_data(data)?;
        self.send(request)
    }

    /// Cancel in-flight I/O, close the transport and join the I/O thread.
    ///
    /// No handler runs after this returns. Calling it from inside a handler
    /// only requests the shutdown, since the I/O thread cannot join itself.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };

        debug!("Stopping XBee engine");
        worker.shutdown();
        info!("XBee engine stopped");
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        let worker = lock(&self.worker);
        if worker
            .as_ref()
            .is_some_and(|w| w.running.load(Ordering::SeqCst))
        {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether the engine is connected
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Link counters since the engine was created
    pub fn stats(&self) -> LinkStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for SerialXbee {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_io<T: Transport>(
    transport: T,
    requests: mpsc::UnboundedReceiver<TransmitRequest>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    read_timeout: Option<Duration>,
) {
    let (reader, writer) = tokio::io::split(transport);
    let reader = FrameReader::new(reader, read_timeout);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => debug!("I/O loop cancelled"),
        _ = async {
            tokio::join!(
                read_pipeline(reader, &shared, &running, &cancel),
                write_pipeline(writer, requests, &shared, &cancel),
            )
        } => debug!("I/O loop finished"),
    }
    // Dropping both halves here closes the transport
}

async fn read_pipeline<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    shared: &Shared,
    running: &AtomicBool,
    cancel: &CancellationToken,
) {
    let stats = &shared.stats;
    loop {
        let before = reader.bytes_read();
        let result = reader.read_frame().await;
        Counters::bump(&stats.bytes_received, reader.bytes_read() - before);

        match result {
            Ok(frame) => {
                if cancel.is_cancelled() {
                    break;
                }
                Counters::bump(&stats.frames_received, 1);
                debug!(
                    frame_type = ?frame.frame_type(),
                    length = frame.length(),
                    "Dispatching frame"
                );
                shared.dispatch_read(&frame);
            }
            Err(XbeeError::Closed) => {
                running.store(false, Ordering::SeqCst);
                warn!("Transport closed, read pipeline stopped");
                break;
            }
            Err(e) if e.is_decode_error() => {
                Counters::bump(&stats.decode_errors, 1);
                warn!(error = %e, "Dropping malformed frame");
            }
            Err(e) => {
                Counters::bump(&stats.transport_errors, 1);
                warn!(error = %e, "Read failed");
                if matches!(e, XbeeError::Io(_)) {
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn write_pipeline<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut requests: mpsc::UnboundedReceiver<TransmitRequest>,
    shared: &Shared,
    cancel: &CancellationToken,
) {
    let stats = &shared.stats;
    while let Some(request) = requests.recv().await {
        let bytes = request.serialize();
        let result = write_frame(&mut writer, &bytes)
            .await
            .map_err(XbeeError::from);

        match &result {
            Ok(()) => {
                Counters::bump(&stats.frames_sent, 1);
                Counters::bump(&stats.bytes_sent, bytes.len() as u64);
                debug!(
                    target_64 = %format!("{:016X}", request.target_mac_64()),
                    len = bytes.len(),
                    "Frame written"
                );
            }
            Err(e) => {
                Counters::bump(&stats.transport_errors, 1);
                warn!(error = %e, "Write failed");
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        let frame = Frame::Transmit(request);
        shared.dispatch_write(&frame, result.as_ref().map(|_| ()));
    }
}
