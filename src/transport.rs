//! One round trip with the microcontroller: open the port, send a framed
//! spectrogram, and wait for the verdict.
//!
//! Everything the harness does to the device goes through a [DeviceLink], so
//! the exchange logic can be driven by an in-memory link in tests. The real
//! link is a [SerialLink] over [serial2]. A link is owned by exactly one
//! round trip and is closed when it is dropped, on every exit path.

use crate::diagnosis::Diagnosis;
use crate::reply_decoder::parse_reply_line;
use crate::spectrogram::Spectrogram;
use crate::wire::{send_frame, Normalization, Pacing, CHUNK_DELAY, CHUNK_SIZE};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serial2::SerialPort;
use std::{
    borrow::Cow,
    fmt, io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

/// Baud rate the firmware's UART is configured for.
pub const BAUD_RATE: u32 = 115200;

/// How long a single read waits for bytes before the loop checks the deadline.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reply deadline for a single interactive sample.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

/// Reply deadline used for unattended batches, where inference on a busy
/// board can take much longer.
pub const BATCH_REPLY_TIMEOUT: Duration = Duration::from_secs(100);

/// The seam between the exchange logic and the device.
pub trait DeviceLink {
    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push buffered bytes out to the device.
    fn flush(&mut self) -> io::Result<()>;

    /// Read whatever arrived within one poll interval. Returns `Ok(0)` if
    /// nothing did.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Serial settings for one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// UART speed
    pub baud_rate: u32,
    /// payload bytes per write
    pub chunk_size: usize,
    /// pause after each write
    pub chunk_delay: Duration,
    /// read timeout, which is also the polling cadence
    pub poll_interval: Duration,
    /// how long to wait for a verdict after the end byte
    pub reply_timeout: Duration,
    /// time to spend draining the device's banner before sending
    pub settle: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            baud_rate: BAUD_RATE,
            chunk_size: CHUNK_SIZE,
            chunk_delay: CHUNK_DELAY,
            poll_interval: POLL_INTERVAL,
            reply_timeout: REPLY_TIMEOUT,
            settle: Duration::ZERO,
        }
    }
}

impl TransportConfig {
    /// Chunking parameters for the framer.
    pub fn pacing(&self) -> Pacing {
        Pacing {
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay,
        }
    }
}

/// What went wrong during a round trip. Timeouts are not errors; they come
/// back as a [Diagnosis] with [Status::Timeout](crate::diagnosis::Status::Timeout).
#[derive(Debug)]
pub enum TransportError {
    /// Returned when the port could not be opened or configured.
    Connect {
        /// the device path
        path: PathBuf,
        /// the underlying error
        source: io::Error,
    },

    /// Returned when writing the frame failed.
    Send(io::Error),

    /// Returned when reading the reply failed.
    Receive(io::Error),
}

impl TransportError {
    /// True if the device does not exist, as opposed to existing but failing.
    pub fn is_device_absent(&self) -> bool {
        matches!(self, TransportError::Connect { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TransportError as TE;
        let msg = match self {
            TE::Connect { path, source } => Cow::from(format!(
                "could not open {}: {}",
                path.display(),
                source
            )),
            TE::Send(error) => Cow::from(format!("send failed: {}", error)),
            TE::Receive(error) => Cow::from(format!("receive failed: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Connect { source, .. } => Some(source),
            TransportError::Send(e) | TransportError::Receive(e) => Some(e),
        }
    }
}

/// List the serial devices the OS knows about.
pub fn available_ports() -> io::Result<Vec<PathBuf>> {
    SerialPort::available_ports()
}

/// A [DeviceLink] over a real serial port.
pub struct SerialLink {
    port: SerialPort,
    path: PathBuf,
}

impl SerialLink {
    /// Open the port, set the poll timeout, and throw away anything left in
    /// either direction from a previous session.
    pub fn open(path: impl AsRef<Path>, config: &TransportConfig) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let connect_err = |source| TransportError::Connect {
            path: path.clone(),
            source,
        };

        let mut port = SerialPort::open(&path, config.baud_rate).map_err(connect_err)?;
        port.set_read_timeout(config.poll_interval)
            .map_err(connect_err)?;
        port.discard_buffers().map_err(connect_err)?;

        info!("Connected to {} at {} baud", path.display(), config.baud_rate);
        Ok(SerialLink { port, path })
    }
}

impl DeviceLink for SerialLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        debug!("Closing {}", self.path.display());
    }
}

/// Decode device text, silently dropping invalid byte sequences.
fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace(char::REPLACEMENT_CHARACTER, "")
}

/// Splits incoming bytes into lines and scans each complete line for a
/// verdict. Lines are split on raw bytes so a multi-byte character split
/// across two reads still decodes.
#[derive(Debug, Default)]
struct LineScanner {
    pending: Vec<u8>,
    transcript: String,
}

impl LineScanner {
    fn push(&mut self, bytes: &[u8]) -> Option<Diagnosis> {
        self.pending.extend_from_slice(bytes);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = decode(&line);
            debug!("<< {}", text.trim_end());
            self.transcript.push_str(&text);

            if let Some(diagnosis) = parse_reply_line(&text) {
                return Some(diagnosis);
            }
        }
        None
    }

    /// Called at the deadline. The unterminated tail gets one last look.
    fn finish(mut self) -> Diagnosis {
        let tail = decode(&self.pending);
        if let Some(diagnosis) = parse_reply_line(&tail) {
            return diagnosis;
        }
        self.transcript.push_str(&tail);
        Diagnosis::timeout(self.transcript)
    }
}

/// One read from the link. A read that comes back empty before `poll` has
/// passed sleeps out the rest of it, without overshooting `deadline`.
fn poll_once<L>(link: &mut L, buf: &mut [u8], poll: Duration, deadline: Instant) -> io::Result<usize>
where
    L: DeviceLink + ?Sized,
{
    let started = Instant::now();
    let n = link.read_available(buf)?;
    if n == 0 {
        let wake = (started + poll).min(deadline);
        let now = Instant::now();
        if wake > now {
            spin_sleep::sleep(wake - now);
        }
    }
    Ok(n)
}

/// Poll the link every `poll` until a verdict line arrives or `timeout`
/// elapses.
pub fn await_reply<L>(link: &mut L, timeout: Duration, poll: Duration) -> io::Result<Diagnosis>
where
    L: DeviceLink + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut scanner = LineScanner::default();
    let mut buf = [0u8; 256];

    while Instant::now() < deadline {
        let n = poll_once(link, &mut buf, poll, deadline)?;
        if n == 0 {
            continue;
        }
        if let Some(diagnosis) = scanner.push(&buf[..n]) {
            return Ok(diagnosis);
        }
    }

    let diagnosis = scanner.finish();
    if diagnosis.prediction().is_none() {
        warn!("No diagnosis within {:?}", timeout);
    }
    Ok(diagnosis)
}

/// Read and log whatever the device prints for `settle`, typically its
/// start-up banner, so it isn't mistaken for a reply.
pub fn drain_banner<L>(link: &mut L, settle: Duration, poll: Duration) -> io::Result<()>
where
    L: DeviceLink + ?Sized,
{
    let deadline = Instant::now() + settle;
    let mut banner = Vec::new();
    let mut buf = [0u8; 256];

    while Instant::now() < deadline {
        let n = poll_once(link, &mut buf, poll, deadline)?;
        banner.extend_from_slice(&buf[..n]);
    }

    let banner = decode(&banner);
    for line in banner.lines().filter(|l| !l.trim().is_empty()) {
        info!("Device says: {}", line.trim());
    }
    Ok(())
}

/// Send one sample over an already open link and wait for the verdict.
pub fn exchange<L, F>(
    link: &mut L,
    sample: &Spectrogram,
    normalization: Normalization,
    config: &TransportConfig,
    progress: F,
) -> Result<Diagnosis, TransportError>
where
    L: DeviceLink + ?Sized,
    F: FnMut(usize, usize),
{
    if !config.settle.is_zero() {
        drain_banner(link, config.settle, config.poll_interval).map_err(TransportError::Receive)?;
    }

    let payload = normalization.encode(sample);
    info!(
        "Sending {} data points ({} normalization)",
        payload.len(),
        normalization
    );
    send_frame(link, &payload, &config.pacing(), progress).map_err(TransportError::Send)?;

    info!("Waiting for diagnosis...");
    await_reply(link, config.reply_timeout, config.poll_interval).map_err(TransportError::Receive)
}

/// Open `port`, run one [exchange], and close the port again.
pub fn round_trip<F>(
    port: impl AsRef<Path>,
    sample: &Spectrogram,
    normalization: Normalization,
    config: &TransportConfig,
    progress: F,
) -> Result<Diagnosis, TransportError>
where
    F: FnMut(usize, usize),
{
    let mut link = SerialLink::open(port, config)?;
    exchange(&mut link, sample, normalization, config, progress)
}
