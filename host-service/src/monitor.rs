// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("no ports specified")]
    NoPortsSpecified,
    #[error("packet capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("packet capture failed: {0}")]
    Capture(String),
}

/// A live capture. Dropping it closes the underlying handle.
pub trait PacketSource: Send {
    /// Blocks until the next packet and returns its capture time, or `None`
    /// when the read timed out with nothing seen.
    fn next_packet(&mut self) -> Result<Option<SystemTime>, MonitorError>;
}

pub trait CaptureOpener: Send + Sync {
    fn open(&self, filter: &str) -> Result<Box<dyn PacketSource>, MonitorError>;
}

/// BPF expression matching traffic on any of `ports`.
pub fn port_filter(ports: &[u16]) -> Result<String, MonitorError> {
    if ports.is_empty() {
        return Err(MonitorError::NoPortsSpecified);
    }
    let ports: Vec<String> = ports.iter().map(ToString::to_string).collect();
    Ok(format!("port ({})", ports.join(" or ")))
}

/// Watches game traffic and cancels its `done` token once nothing has been
/// seen for `idle_threshold`. One-shot: a closed monitor stays closed.
pub struct InactivityMonitor {
    opener: Arc<dyn CaptureOpener>,
    idle_threshold: Duration,
    poll_interval: Duration,
    done: CancellationToken,
}

impl InactivityMonitor {
    pub fn new(
        opener: Arc<dyn CaptureOpener>,
        idle_threshold: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            opener,
            idle_threshold,
            poll_interval,
            done: CancellationToken::new(),
        }
    }

    /// Opens the capture and spawns the reader and poll loops. The returned
    /// token is cancelled when the idle threshold is crossed or on `close`.
    pub fn start(&self, ports: &[u16]) -> Result<CancellationToken, MonitorError> {
        let filter = port_filter(ports)?;
        let mut source = self.opener.open(&filter)?;
        info!(
            filter = %filter,
            idle_threshold = ?self.idle_threshold,
            "inactivity monitor started"
        );

        let last_packet = Arc::new(Mutex::new(SystemTime::now()));

        let reader_last_packet = last_packet.clone();
        let reader_done = self.done.clone();
        tokio::task::spawn_blocking(move || {
            while !reader_done.is_cancelled() {
                match source.next_packet() {
                    Ok(Some(seen)) => {
                        if let Ok(mut last) = reader_last_packet.lock() {
                            *last = seen;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(error = %error, "packet capture stopped");
                        break;
                    }
                }
            }
            drop(source);
            debug!("packet capture closed");
        });

        let done = self.done.clone();
        let idle_threshold = self.idle_threshold;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = ticker.tick() => {
                        let last = last_packet
                            .lock()
                            .map(|last| *last)
                            .unwrap_or_else(|_| SystemTime::now());
                        let elapsed = SystemTime::now()
                            .duration_since(last)
                            .unwrap_or_default();
                        if elapsed >= idle_threshold {
                            info!(idle_for = ?elapsed, "no game traffic within idle threshold");
                            done.cancel();
                            break;
                        }
                    }
                }
            }
        });

        Ok(self.done.clone())
    }

    /// Closes the capture and the done signal without waiting for idleness.
    pub fn close(&self) {
        if !self.done.is_cancelled() {
            info!("inactivity monitor closed");
        }
        self.done.cancel();
    }
}

#[cfg(not(feature = "pcap"))]
mod capture {
    use super::{CaptureOpener, MonitorError, PacketSource};

    pub struct UnavailableOpener;

    impl CaptureOpener for UnavailableOpener {
        fn open(&self, _filter: &str) -> Result<Box<dyn PacketSource>, MonitorError> {
            Err(MonitorError::CaptureUnavailable(
                "host-service was built without the pcap feature".to_string(),
            ))
        }
    }

    pub fn opener(_device: &str) -> UnavailableOpener {
        UnavailableOpener
    }
}

#[cfg(feature = "pcap")]
mod capture {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::{CaptureOpener, MonitorError, PacketSource};

    const READ_TIMEOUT_MS: i32 = 250;

    pub struct PcapOpener {
        device: String,
    }

    impl CaptureOpener for PcapOpener {
        fn open(&self, filter: &str) -> Result<Box<dyn PacketSource>, MonitorError> {
            let unavailable = |error: pcap::Error| MonitorError::CaptureUnavailable(error.to_string());
            let mut capture = pcap::Capture::from_device(self.device.as_str())
                .map_err(unavailable)?
                .promisc(false)
                .timeout(READ_TIMEOUT_MS)
                .open()
                .map_err(unavailable)?;
            capture
                .filter(filter, true)
                .map_err(|error| MonitorError::Capture(error.to_string()))?;
            Ok(Box::new(PcapSource { capture }))
        }
    }

    struct PcapSource {
        capture: pcap::Capture<pcap::Active>,
    }

    impl PacketSource for PcapSource {
        fn next_packet(&mut self) -> Result<Option<SystemTime>, MonitorError> {
            match self.capture.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts;
                    let seen = UNIX_EPOCH
                        + Duration::from_secs(ts.tv_sec.max(0) as u64)
                        + Duration::from_micros(ts.tv_usec.max(0) as u64);
                    Ok(Some(seen))
                }
                Err(pcap::Error::TimeoutExpired) => Ok(None),
                Err(error) => Err(MonitorError::Capture(error.to_string())),
            }
        }
    }

    pub fn opener(device: &str) -> PcapOpener {
        PcapOpener {
            device: device.to_string(),
        }
    }
}

/// The capture backend this build was compiled with.
pub fn capture_opener(device: &str) -> Arc<dyn CaptureOpener> {
    Arc::new(capture::opener(device))
}
