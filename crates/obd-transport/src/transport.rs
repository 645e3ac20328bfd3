//! Adapter Transport Implementation

use crate::framer::{Frame, LineFramer};
use obd_protocol::ObdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// How long a single read may block before the reader re-polls
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Read chunk size
const READ_CHUNK: usize = 256;

/// Longest wait honoured by a single exchange
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Send/receive half guarded by the exchange lock
struct Exchange {
    writer: Option<Writer>,
    inbox: mpsc::UnboundedReceiver<Frame>,
}

impl Exchange {
    fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.inbox.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    async fn write_line(&mut self, command: &str) -> Result<(), ObdError> {
        let writer = self.writer.as_mut().ok_or(ObdError::NotConnected)?;
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\r');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Collect lines until the prompt or the deadline, whichever comes first
    async fn read_until_prompt(&mut self, timeout: Duration) -> String {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + MAX_WAIT);
        let mut lines = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(Frame::Line(line))) => lines.push(line),
                Ok(Some(Frame::Prompt)) => break,
                Ok(None) => {
                    debug!("Reader gone while waiting for prompt");
                    break;
                }
                Err(_) => {
                    debug!(
                        "No prompt within {}ms, returning {} partial line(s)",
                        timeout.as_millis(),
                        lines.len()
                    );
                    break;
                }
            }
        }
        lines.join("\n")
    }
}

/// Line-framed duplex connection to one adapter
///
/// The reader task owns the read half and feeds an unbounded inbox; every
/// command goes through [`AdapterTransport::transact`], which holds one lock
/// across drain, write and read-until-prompt so a keepalive ping and a
/// caller command can never interleave.
pub struct AdapterTransport {
    label: String,
    exchange: Mutex<Exchange>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl AdapterTransport {
    /// Take ownership of a connected stream and start the reader task
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<S>(stream: S, label: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            read_half,
            inbox_tx,
            Arc::clone(&connected),
            shutdown_rx,
            label.clone(),
        ));

        info!("Transport {} started", label);

        Self {
            label,
            exchange: Mutex::new(Exchange {
                writer: Some(Box::new(write_half)),
                inbox: inbox_rx,
            }),
            connected,
            shutdown: shutdown_tx,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Label given at construction (e.g. `tcp://192.168.0.10:35000`)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once the peer closed the stream, a read failed, or `close` ran
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Drain stale input, send `command` and wait for the prompt
    ///
    /// A deadline is not an error: whatever arrived before it is returned,
    /// possibly empty. Only a missing or failed link produces `Err`.
    pub async fn transact(&self, command: &str, timeout: Duration) -> Result<String, ObdError> {
        let mut exchange = self.exchange.lock().await;
        if !self.is_connected() {
            return Err(ObdError::NotConnected);
        }

        let stale = exchange.drain();
        if stale > 0 {
            debug!("Dropped {} stale frame(s) before {}", stale, command);
        }

        if let Err(e) = exchange.write_line(command).await {
            warn!("Write of {} to {} failed: {}", command, self.label, e);
            self.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        trace!("TX {}", command);

        let response = exchange.read_until_prompt(timeout).await;
        trace!("RX {:?}", response);
        Ok(response)
    }

    /// Discard every frame received so far
    pub async fn drain_input(&self) -> usize {
        self.exchange.lock().await.drain()
    }

    /// Close the stream, then join the reader
    ///
    /// The reader may be parked in a read that will never complete, so it is
    /// told to drop its half before we wait on it; joining first would hang.
    pub async fn close(&self, join_timeout: Duration) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        {
            let mut exchange = self.exchange.lock().await;
            if let Some(mut writer) = exchange.writer.take() {
                if let Err(e) = writer.shutdown().await {
                    debug!("Shutdown of {} writer: {}", self.label, e);
                }
            }
        }

        let handle = self.reader.lock().await.take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(_) => debug!("Reader for {} joined", self.label),
                Err(_) => {
                    warn!("Reader for {} did not stop, aborting", self.label);
                    abort.abort();
                }
            }
        }
        info!("Transport {} closed", self.label);
    }
}

impl Drop for AdapterTransport {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn read_loop<R>(
    mut reader: ReadHalf<R>,
    inbox: mpsc::UnboundedSender<Frame>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    label: String,
) where
    R: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];

    'read: loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("Reader for {} told to stop", label);
                break 'read;
            }
            read = tokio::time::timeout(READ_POLL_INTERVAL, reader.read(&mut buf)) => match read {
                // Nothing arrived this round, the link may just be idle
                Err(_) => continue,
                Ok(Ok(0)) => {
                    info!("Adapter closed the stream on {}", label);
                    break 'read;
                }
                Ok(Ok(n)) => {
                    for frame in framer.push(&buf[..n]) {
                        if inbox.send(frame).is_err() {
                            break 'read;
                        }
                    }
                }
                Ok(Err(e)) if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) => continue,
                Ok(Err(e)) => {
                    warn!("Read from {} failed: {}", label, e);
                    break 'read;
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}
