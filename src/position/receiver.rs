use std::{io, path::Path, time::Duration};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};

/// Longest line kept. NMEA sentences are at most 82 bytes; anything longer is noise.
const MAX_LINE_BYTES: usize = 256;

/// Result of one bounded line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    TimedOut,
    Closed,
}

/// Line-oriented NMEA receiver over any buffered byte stream.
///
/// In the field this wraps the GPS serial device node; its line settings
/// (baud rate, raw mode) are expected to be configured by the OS.
pub struct NmeaReceiver {
    name: String,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    // Survives a timed-out read so a partially received line is completed next time.
    pending: Vec<u8>,
}

impl NmeaReceiver {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(path.display().to_string(), BufReader::new(file)))
    }

    pub fn from_reader<R>(name: impl Into<String>, reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            pending: Vec::with_capacity(MAX_LINE_BYTES),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one line, waiting at most `timeout`. Invalid UTF-8 is replaced, not rejected.
    ///
    /// A run of `MAX_LINE_BYTES` without a line break is handed back as one
    /// (unparseable) line so the buffer stays bounded.
    pub async fn read_line(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        let room = MAX_LINE_BYTES.saturating_sub(self.pending.len()) as u64;
        let mut limited = (&mut self.reader).take(room);
        let read = limited.read_until(b'\n', &mut self.pending);
        match tokio::time::timeout(timeout, read).await {
            Err(_) => Ok(ReadOutcome::TimedOut),
            Ok(Ok(0)) if self.pending.is_empty() => Ok(ReadOutcome::Closed),
            Ok(Ok(_)) => {
                if self.pending.len() >= MAX_LINE_BYTES && !self.pending.ends_with(b"\n") {
                    log::debug!(
                        "position receiver {}: discarding {} bytes without a line break",
                        self.name,
                        self.pending.len()
                    );
                }
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                Ok(ReadOutcome::Line(line))
            }
            Ok(Err(err)) => {
                self.pending.clear();
                Err(err)
            }
        }
    }

    pub fn close(self) {
        log::info!("position receiver {} closed", self.name);
    }
}

/// Whether a position receiver exists for this session. Resolved once at startup.
pub enum ReceiverCapability {
    NoReceiver,
    Receiver(NmeaReceiver),
}

impl ReceiverCapability {
    /// Open the receiver at `port`, falling back to `NoReceiver` when absent or unopenable.
    pub async fn open(port: Option<&Path>) -> Self {
        let Some(port) = port else {
            log::info!("no position receiver configured, using testing coordinate");
            return ReceiverCapability::NoReceiver;
        };

        match NmeaReceiver::open(port).await {
            Ok(receiver) => {
                log::info!("position receiver opened on {}", port.display());
                ReceiverCapability::Receiver(receiver)
            }
            Err(err) => {
                log::warn!(
                    "could not open position receiver {}: {err}; using testing coordinate",
                    port.display()
                );
                ReceiverCapability::NoReceiver
            }
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, ReceiverCapability::Receiver(_))
    }
}
