//! The device link.
//!
//! A [`Link`] owns one duplex connection to a flight computer or ground
//! station dongle and one background reader task. The device speaks a
//! newline-terminated ASCII protocol with no request ids, so the protocol
//! is strictly sequential: send a command, then await its reply. Telemetry
//! lines arrive interleaved at any time and fan out to subscribers without
//! touching the reply path.
//!
//! # Reader classification
//!
//! Every incoming line is classified exactly once, in order: a
//! caller-armed substring match diverts the line to the reply channel even
//! mid-telemetry-stream; telemetry markers (`TELEM`, `GPS`, `RSSI`) go to
//! the broadcast; everything else is a reply. Arming `expect_binary`
//! switches the reader to consume the next N raw bytes as a single binary
//! reply before returning to line mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// EEPROM bytes returned by one block dump command.
pub const EEPROM_BLOCK_SIZE: usize = 256;

/// Line prefixes that mark telemetry rather than replies.
const TELEMETRY_MARKERS: [&str; 3] = ["TELEM", "GPS", "RSSI"];

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reader task has exited; the connection is gone.
    #[error("Link disconnected")]
    Disconnected,

    /// No reply arrived in time. Retryable.
    #[error("Timed out waiting for a reply")]
    Timeout,

    /// Remote mode is running; stop it before reconfiguring the radio.
    #[error("Remote mode is active; exit it before changing link parameters")]
    RemoteActive,
}

/// Telemetry rate steps. Each step slower doubles how long a reply can
/// reasonably take, so reply timeouts scale by [`TelemetryRate::timeout_factor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelemetryRate {
    #[default]
    Fast,
    Medium,
    Slow,
}

impl TelemetryRate {
    pub fn timeout_factor(self) -> u32 {
        match self {
            Self::Fast => 1,
            Self::Medium => 2,
            Self::Slow => 4,
        }
    }

    /// The numeric rate argument of the `c T` command.
    pub fn wire(self) -> u8 {
        match self {
            Self::Fast => 0,
            Self::Medium => 1,
            Self::Slow => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Base reply timeout at the fast telemetry rate.
    pub reply_timeout: Duration,
    /// Telemetry fan-out queue depth per subscriber.
    pub broadcast_capacity: usize,
    pub telemetry_rate: TelemetryRate,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(1),
            broadcast_capacity: 64,
            telemetry_rate: TelemetryRate::Fast,
        }
    }
}

/// Parameters for store-and-forward (repeater) operation.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub frequency_khz: u32,
    pub callsign: String,
    pub rate: TelemetryRate,
}

#[derive(Debug)]
enum Reply {
    Line(String),
    Binary(Vec<u8>),
}

/// State the reader task shares with the link handle.
struct SharedState {
    broadcast_tx: broadcast::Sender<String>,
    match_pattern: Mutex<Option<String>>,
    binary_tx: watch::Sender<Option<usize>>,
    abort_tx: watch::Sender<u64>,
    connected: AtomicBool,
}

/// One duplex device connection with its background reader.
pub struct Link {
    state: Arc<SharedState>,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    reply_rx: tokio::sync::Mutex<mpsc::Receiver<Reply>>,
    abort_rx: watch::Receiver<u64>,
    config: LinkConfig,
    rate: Mutex<TelemetryRate>,
    remote_active: AtomicBool,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    /// Take ownership of a connection and start the reader task.
    pub fn spawn<R, W>(reader: R, writer: W, config: LinkConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity);
        let (reply_tx, reply_rx) = mpsc::channel(64);
        let (binary_tx, binary_rx) = watch::channel(None);
        let (abort_tx, abort_rx) = watch::channel(0u64);
        let state = Arc::new(SharedState {
            broadcast_tx,
            match_pattern: Mutex::new(None),
            binary_tx,
            abort_tx,
            connected: AtomicBool::new(true),
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reader_task(
            reader,
            reply_tx,
            Arc::clone(&state),
            binary_rx,
            cancel.clone(),
        ));
        let rate = config.telemetry_rate;
        Self {
            state,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            reply_rx: tokio::sync::Mutex::new(reply_rx),
            abort_rx,
            config,
            rate: Mutex::new(rate),
            remote_active: AtomicBool::new(false),
            cancel,
            reader: Mutex::new(Some(handle)),
        }
    }

    /// Whether the reader task is still consuming the connection.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Subscribe to the telemetry fan-out.
    ///
    /// The queue is bounded; a subscriber that falls behind loses the
    /// oldest lines and keeps receiving, it never blocks the reader.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.state.broadcast_tx.subscribe()
    }

    /// Write one newline-terminated command.
    pub async fn send(&self, command: &str) -> Result<(), LinkError> {
        trace!(command, "link send");
        let mut writer = self.writer.lock().await;
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// The reply timeout scaled for the current telemetry rate.
    pub fn reply_timeout(&self) -> Duration {
        let factor = self.current_rate().timeout_factor();
        self.config.reply_timeout * factor
    }

    fn current_rate(&self) -> TelemetryRate {
        match self.rate.lock() {
            Ok(rate) => *rate,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_current_rate(&self, rate: TelemetryRate) {
        match self.rate.lock() {
            Ok(mut r) => *r = rate,
            Err(poisoned) => *poisoned.into_inner() = rate,
        }
    }

    /// Wait for the next text reply.
    ///
    /// `Ok(None)` means no data: the timeout elapsed or [`Link::abort`]
    /// unblocked the wait. The protocol is strictly sequential; callers
    /// must have sent exactly one command whose reply they are awaiting.
    pub async fn await_reply(&self, timeout: Duration) -> Result<Option<String>, LinkError> {
        match self.await_any(timeout).await? {
            Some(Reply::Line(line)) => Ok(Some(line)),
            Some(Reply::Binary(_)) => {
                // A stale binary reply from an aborted dump; drop it
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Wait for the next binary reply armed with [`Link::expect_binary`].
    pub async fn await_binary(&self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        match self.await_any(timeout).await? {
            Some(Reply::Binary(bytes)) => Ok(Some(bytes)),
            Some(Reply::Line(line)) => {
                debug!(line, "discarding text reply while awaiting binary");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn await_any(&self, timeout: Duration) -> Result<Option<Reply>, LinkError> {
        let mut rx = self.reply_rx.lock().await;
        let mut abort = self.abort_rx.clone();
        // Mark the current abort generation seen; only a later abort()
        // unblocks this wait
        abort.borrow_and_update();
        tokio::select! {
            _ = abort.changed() => {
                debug!("reply wait aborted");
                Ok(None)
            }
            result = tokio::time::timeout(timeout, rx.recv()) => match result {
                Err(_) => Ok(None),
                Ok(None) => Err(LinkError::Disconnected),
                Ok(Some(reply)) => Ok(Some(reply)),
            }
        }
    }

    /// Send a command and wait for its reply at the rate-scaled timeout.
    pub async fn request(&self, command: &str) -> Result<String, LinkError> {
        self.send(command).await?;
        self.await_reply(self.reply_timeout())
            .await?
            .ok_or(LinkError::Timeout)
    }

    /// Divert the next line containing `pattern` to the reply channel,
    /// even if it would otherwise classify as telemetry.
    pub fn set_reply_match(&self, pattern: &str) {
        match self.state.match_pattern.lock() {
            Ok(mut p) => *p = Some(pattern.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(pattern.to_string()),
        }
    }

    /// Arm the reader to capture the next `len` raw bytes as one binary
    /// reply.
    pub fn expect_binary(&self, len: usize) {
        let _ = self.state.binary_tx.send(Some(len));
    }

    /// Cooperatively unblock the in-flight reply wait, if any.
    ///
    /// The unblocked wait returns `Ok(None)` with no bytes consumed.
    /// Idempotent: aborting with no wait outstanding has no effect on a
    /// later wait.
    pub fn abort(&self) {
        self.state.abort_tx.send_modify(|generation| *generation += 1);
    }

    // ---- device commands ----

    /// Firmware version banner (`v`).
    pub async fn version(&self) -> Result<String, LinkError> {
        self.request("v").await
    }

    /// Current device configuration (`c s`).
    pub async fn show_config(&self) -> Result<String, LinkError> {
        self.request("c s").await
    }

    /// Store accelerometer calibration values (`c a`).
    pub async fn set_accel_cal(&self, plus: i32, minus: i32) -> Result<(), LinkError> {
        self.send(&format!("c a {plus} {minus}")).await
    }

    /// Tune the radio (`F`). Refused while remote mode is running.
    pub async fn set_frequency(&self, khz: u32) -> Result<(), LinkError> {
        if self.remote_active.load(Ordering::Acquire) {
            return Err(LinkError::RemoteActive);
        }
        self.send(&format!("F {khz}")).await
    }

    /// Select the telemetry rate (`c T`). Refused while remote mode is
    /// running.
    pub async fn set_telemetry_rate(&self, rate: TelemetryRate) -> Result<(), LinkError> {
        if self.remote_active.load(Ordering::Acquire) {
            return Err(LinkError::RemoteActive);
        }
        self.send(&format!("c T {}", rate.wire())).await?;
        self.set_current_rate(rate);
        Ok(())
    }

    /// Enter monitor mode (`m`).
    pub async fn monitor(&self, mode: u8) -> Result<(), LinkError> {
        self.send(&format!("m {mode}")).await
    }

    /// List stored flight logs (`l`).
    pub async fn list_logs(&self) -> Result<String, LinkError> {
        self.request("l").await
    }

    /// Dump one EEPROM block (`e`) through the binary sub-mode.
    pub async fn dump_block(&self, block: u16) -> Result<Vec<u8>, LinkError> {
        self.expect_binary(EEPROM_BLOCK_SIZE);
        self.send(&format!("e {block}")).await?;
        self.await_binary(self.reply_timeout())
            .await?
            .ok_or(LinkError::Timeout)
    }

    /// Configure the radio and start the store-and-forward repeater (`p`).
    ///
    /// While remote mode runs, frequency and rate changes are refused;
    /// use [`Link::reconfigure_remote`] to change them.
    pub async fn enter_remote(&self, remote: &RemoteConfig) -> Result<(), LinkError> {
        if self.remote_active.load(Ordering::Acquire) {
            return Err(LinkError::RemoteActive);
        }
        self.send(&format!("F {}", remote.frequency_khz)).await?;
        self.send(&format!("c c {}", remote.callsign)).await?;
        self.send(&format!("c T {}", remote.rate.wire())).await?;
        self.set_current_rate(remote.rate);
        self.send("p").await?;
        self.remote_active.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the repeater (`~`). A no-op when remote mode is not running.
    pub async fn exit_remote(&self) -> Result<(), LinkError> {
        if !self.remote_active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.send("~").await
    }

    /// The stop, reconfigure, restart bracket.
    pub async fn reconfigure_remote(&self, remote: &RemoteConfig) -> Result<(), LinkError> {
        self.exit_remote().await?;
        self.enter_remote(remote).await
    }

    /// Stop the reader task and drop the connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = match self.state_reader_handle() {
            Some(handle) => handle,
            None => return,
        };
        if let Err(e) = handle.await {
            warn!(error = %e, "link reader task panicked");
        }
    }

    fn state_reader_handle(&self) -> Option<JoinHandle<()>> {
        match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reader_task<R>(
    reader: R,
    reply_tx: mpsc::Sender<Reply>,
    state: Arc<SharedState>,
    mut binary_rx: watch::Receiver<Option<usize>>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let expected = *binary_rx.borrow_and_update();
        if let Some(len) = expected {
            let mut bytes = vec![0u8; len];
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = reader.read_exact(&mut bytes) => {
                    // Disarm before delivering so line mode resumes
                    let _ = state.binary_tx.send(None);
                    match result {
                        Ok(_) => {
                            if reply_tx.try_send(Reply::Binary(bytes)).is_err() {
                                debug!("binary reply dropped, channel full");
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "link read failed in binary mode");
                            break;
                        }
                    }
                }
            }
            continue;
        }

        // read_until keeps partial data in buf across cancellation, so
        // switching to binary mode mid-line loses nothing
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = binary_rx.changed() => continue,
            result = reader.read_until(b'\n', &mut buf) => match result {
                Ok(0) => {
                    debug!("link closed by peer");
                    break;
                }
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        let line = String::from_utf8_lossy(&buf).trim().to_string();
                        buf.clear();
                        if !line.is_empty() {
                            classify(line, &reply_tx, &state);
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "link read failed");
                    break;
                }
            }
        }
    }
    state.connected.store(false, Ordering::Release);
}

fn classify(line: String, reply_tx: &mpsc::Sender<Reply>, state: &SharedState) {
    // An armed match diverts the line no matter how it would classify
    let diverted = {
        let mut pattern = match state.match_pattern.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match pattern.as_deref() {
            Some(p) if line.contains(p) => {
                *pattern = None;
                true
            }
            _ => false,
        }
    };
    if !diverted && TELEMETRY_MARKERS.iter().any(|m| line.starts_with(m)) {
        // Fan out; no subscribers is fine
        let _ = state.broadcast_tx.send(line);
        return;
    }
    trace!(%line, diverted, "link reply");
    if reply_tx.try_send(Reply::Line(line)).is_err() {
        debug!("reply dropped, channel full");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn test_link() -> (Link, tokio::io::DuplexStream) {
        let (device, station) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(station);
        let link = Link::spawn(read_half, write_half, LinkConfig::default());
        (link, device)
    }

    #[tokio::test]
    async fn test_reply_round_trip() {
        let (link, mut device) = test_link();
        link.send("v").await.unwrap();

        let mut cmd = [0u8; 2];
        device.read_exact(&mut cmd).await.unwrap();
        assert_eq!(&cmd, b"v\n");
        device.write_all(b"1.9.2\n").await.unwrap();

        let reply = link.await_reply(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("1.9.2"));
    }

    #[tokio::test]
    async fn test_telemetry_fans_out_not_into_replies() {
        let (link, mut device) = test_link();
        let mut sub_a = link.subscribe();
        let mut sub_b = link.subscribe();

        device.write_all(b"TELEM 1122\nRSSI -40\nok\n").await.unwrap();

        assert_eq!(sub_a.recv().await.unwrap(), "TELEM 1122");
        assert_eq!(sub_a.recv().await.unwrap(), "RSSI -40");
        assert_eq!(sub_b.recv().await.unwrap(), "TELEM 1122");
        // The plain line went to the reply channel instead
        let reply = link.await_reply(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_match_diverts_mid_stream() {
        let (link, mut device) = test_link();
        link.set_reply_match("RSSI");

        device
            .write_all(b"TELEM aa\nRSSI -77\nTELEM bb\n")
            .await
            .unwrap();

        // The RSSI line would normally be telemetry; the armed match pulls
        // it into the reply channel
        let reply = link.await_reply(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("RSSI -77"));
        // The match disarms after one hit
        let mut sub = link.subscribe();
        device.write_all(b"RSSI -60\n").await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), "RSSI -60");
    }

    #[tokio::test]
    async fn test_binary_sub_mode() {
        let (link, mut device) = test_link();
        link.expect_binary(4);
        link.send("e 0").await.unwrap();

        let mut cmd = [0u8; 4];
        device.read_exact(&mut cmd).await.unwrap();
        assert_eq!(&cmd, b"e 0\n");
        device.write_all(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        // Line traffic resumes right after the binary bytes
        device.write_all(b"done\n").await.unwrap();

        let bytes = link.await_binary(Duration::from_secs(1)).await.unwrap();
        assert_eq!(bytes, Some(vec![0xde, 0xad, 0xbe, 0xef]));
        let reply = link.await_reply(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_abort_unblocks_wait_quickly() {
        let (link, _device) = test_link();
        let link = Arc::new(link);

        let waiter = Arc::clone(&link);
        let started = std::time::Instant::now();
        let wait = tokio::spawn(async move { waiter.await_reply(Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        link.abort();

        let result = wait.await.unwrap().unwrap();
        assert!(result.is_none());
        assert!(
            started.elapsed() < Duration::from_millis(50) + Duration::from_millis(10),
            "abort took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_abort_with_no_wait_is_idempotent() {
        let (link, mut device) = test_link();
        // Abort twice with nothing outstanding
        link.abort();
        link.abort();
        // A later wait is unaffected and still receives its reply
        device.write_all(b"hello\n").await.unwrap();
        let reply = link.await_reply(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_remote_mode_guards_reconfiguration() {
        let (link, _device) = test_link();
        let remote = RemoteConfig {
            frequency_khz: 434_550,
            callsign: "N0CALL".to_string(),
            rate: TelemetryRate::Medium,
        };
        link.enter_remote(&remote).await.unwrap();

        assert!(matches!(
            link.set_frequency(435_000).await,
            Err(LinkError::RemoteActive)
        ));
        assert!(matches!(
            link.set_telemetry_rate(TelemetryRate::Slow).await,
            Err(LinkError::RemoteActive)
        ));
        assert!(matches!(
            link.enter_remote(&remote).await,
            Err(LinkError::RemoteActive)
        ));

        // The bracket: stop, change, restart
        let slower = RemoteConfig {
            rate: TelemetryRate::Slow,
            ..remote.clone()
        };
        link.reconfigure_remote(&slower).await.unwrap();
        assert_eq!(link.reply_timeout(), Duration::from_secs(4));

        link.exit_remote().await.unwrap();
        link.set_frequency(435_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_commands_on_the_wire() {
        let (link, mut device) = test_link();
        let remote = RemoteConfig {
            frequency_khz: 434_550,
            callsign: "N0CALL".to_string(),
            rate: TelemetryRate::Fast,
        };
        link.enter_remote(&remote).await.unwrap();
        link.exit_remote().await.unwrap();

        let mut sent = vec![0u8; 64];
        let n = device.read(&mut sent).await.unwrap();
        let text = String::from_utf8_lossy(&sent[..n]).to_string();
        assert_eq!(text, "F 434550\nc c N0CALL\nc T 0\np\n~\n");
    }

    #[tokio::test]
    async fn test_timeout_returns_none_not_error() {
        let (link, _device) = test_link();
        let reply = link.await_reply(Duration::from_millis(20)).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_an_error() {
        let (link, device) = test_link();
        drop(device);
        // Give the reader a moment to see EOF
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!link.is_connected());
        assert!(matches!(
            link.await_reply(Duration::from_secs(1)).await,
            Err(LinkError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_rate_scales_reply_timeout() {
        let (link, _device) = test_link();
        assert_eq!(link.reply_timeout(), Duration::from_secs(1));
        link.set_telemetry_rate(TelemetryRate::Slow).await.unwrap();
        assert_eq!(link.reply_timeout(), Duration::from_secs(4));
    }
}
