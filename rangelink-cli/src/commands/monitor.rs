//! Live telemetry acquisition over a TCP-bridged device link.

use crate::error::CliError;
use rangelink::calibration::CalibrationContext;
use rangelink::config::ConfigFile;
use rangelink::flight::FlightTracker;
use rangelink::link::{Link, LinkConfig, LinkError, RemoteConfig, TelemetryRate};
use rangelink::record::telemetry::{self, TelemetryEvent};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How many times a timed-out request is retried before giving up.
const REQUEST_RETRIES: u32 = 3;

/// Resolved monitor command options after merging CLI flags with config.
pub struct MonitorOptions {
    pub connect: Option<String>,
    pub remote: bool,
    pub frequency: Option<u32>,
    pub callsign: Option<String>,
    pub rate: Option<TelemetryRate>,
}

pub fn run(options: MonitorOptions, config: &ConfigFile) -> Result<(), CliError> {
    let endpoint = options
        .connect
        .clone()
        .or_else(|| config.link.connect.clone())
        .ok_or(CliError::MissingEndpoint)?;

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    runtime.block_on(monitor(&endpoint, &options, config))
}

async fn monitor(
    endpoint: &str,
    options: &MonitorOptions,
    config: &ConfigFile,
) -> Result<(), CliError> {
    let frequency = options.frequency.unwrap_or(config.link.frequency_khz);
    let callsign = options
        .callsign
        .clone()
        .unwrap_or_else(|| config.link.callsign.clone());
    let rate = options.rate.unwrap_or(config.link.telemetry_rate);

    let stream = TcpStream::connect(endpoint)
        .await
        .map_err(|error| CliError::Connect {
            endpoint: endpoint.to_string(),
            error,
        })?;
    let (reader, writer) = stream.into_split();

    let link = Link::spawn(
        reader,
        writer,
        LinkConfig {
            telemetry_rate: rate,
            ..Default::default()
        },
    );

    // Subscribe before enabling telemetry so no frame slips past.
    let mut telemetry_rx = link.subscribe();

    let version = request_with_retry(|| link.version()).await?;
    info!(endpoint, version = version.as_str(), "connected");
    println!("Connected to {} ({})", endpoint, version.trim());

    if options.remote {
        let remote = RemoteConfig {
            frequency_khz: frequency,
            callsign,
            rate,
        };
        link.enter_remote(&remote).await.map_err(CliError::Link)?;
        info!(
            frequency_khz = remote.frequency_khz,
            callsign = remote.callsign.as_str(),
            "remote mode started"
        );
    } else {
        link.set_frequency(frequency).await.map_err(CliError::Link)?;
        link.set_telemetry_rate(rate).await.map_err(CliError::Link)?;
        link.monitor(1).await.map_err(CliError::Link)?;
        info!(frequency_khz = frequency, "monitoring");
    }

    let result = follow_telemetry(&mut telemetry_rx).await;

    if options.remote && result.is_ok() {
        link.exit_remote().await.map_err(CliError::Link)?;
    }
    link.shutdown().await;
    result
}

/// Main acquisition loop: decode telemetry frames, feed the tracker, and
/// print the current flight state once a second until Ctrl-C or
/// disconnection.
async fn follow_telemetry(
    telemetry_rx: &mut broadcast::Receiver<String>,
) -> Result<(), CliError> {
    let mut calibration = CalibrationContext::default();
    let mut tracker = FlightTracker::new();
    let mut last_rssi: Option<i8> = None;
    let mut crc_errors: u64 = 0;

    let mut status = tokio::time::interval(Duration::from_secs(1));
    status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = telemetry_rx.recv() => match line {
                Ok(line) => {
                    if !line.starts_with("TELEM") {
                        continue;
                    }
                    match telemetry::parse_frame(&line) {
                        Ok(TelemetryEvent::CrcInvalid { rssi }) => {
                            crc_errors += 1;
                            last_rssi = Some(rssi);
                            debug!(rssi, crc_errors, "frame failed radio CRC");
                        }
                        Ok(event) => {
                            last_rssi = Some(event.rssi());
                            event.dispatch(&mut calibration, &mut tracker);
                        }
                        Err(e) => debug!(error = %e, line = line.as_str(), "bad frame"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "telemetry receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CliError::Link(LinkError::Disconnected));
                }
            },
            _ = status.tick() => {
                print_status(&tracker, last_rssi, crc_errors);
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                println!();
                return Ok(());
            }
        }
    }
}

fn print_status(tracker: &FlightTracker, rssi: Option<i8>, crc_errors: u64) {
    // Nothing heard yet
    let rssi = match rssi {
        Some(rssi) => rssi,
        None => return,
    };

    let mut line = format!("{:<10}", tracker.state().name());
    if let Some(height) = tracker.height() {
        line.push_str(&format!("  height {:7.1} m", height));
    }
    if let Some(speed) = tracker.speed() {
        line.push_str(&format!("  speed {:6.1} m/s", speed));
    }
    if let Some(fix) = tracker.gps() {
        if let (Some(lat), Some(lon)) = (fix.latitude, fix.longitude) {
            line.push_str(&format!("  gps {:.5},{:.5}", lat, lon));
        }
    }
    line.push_str(&format!("  rssi {}", rssi));
    if crc_errors > 0 {
        line.push_str(&format!("  crc-err {}", crc_errors));
    }
    println!("{}", line);
    info!(state = tracker.state().name(), rssi, "status");
}

/// Run a request, silently retrying transient timeouts.
async fn request_with_retry<F, Fut>(mut request: F) -> Result<String, CliError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, LinkError>>,
{
    let mut attempt = 0;
    loop {
        match request().await {
            Ok(reply) => return Ok(reply),
            Err(LinkError::Timeout) if attempt < REQUEST_RETRIES => {
                attempt += 1;
                debug!(attempt, "request timed out, retrying");
            }
            Err(e) => return Err(CliError::Link(e)),
        }
    }
}
