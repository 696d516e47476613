//! gpsd client.
//!
//! Connects to the daemon, enables JSON watch mode with
//! `?WATCH={"enable":true,"json":true};` and turns every `TPV` report that
//! carries a 2D or 3D fix into a [`PositionFix`]. Fixes are throttled to one
//! per `min_interval_secs`. A dropped connection is re-established after a
//! short delay until the subscription ends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{PositionError, PositionSource, Subscription};
use crate::config::PositionConfig;
use crate::geo::PositionFix;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    time: Option<String>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
}

/// Parse one gpsd JSON line. `None` for anything other than a `TPV` report
/// with at least a 2D fix and both coordinates.
///
/// Accuracy is `eph` when present, else the larger of `epx`/`epy`; with
/// neither it is unknown (`f64::INFINITY`).
pub fn parse_report(line: &str) -> Option<PositionFix> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    let (latitude, longitude) = (report.lat?, report.lon?);

    let accuracy_m = report
        .eph
        .or(match (report.epx, report.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(f64::INFINITY);

    let observed_at = report
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(PositionFix {
        latitude,
        longitude,
        accuracy_m,
        observed_at,
    })
}

/// Passes at most one fix per `min_interval`.
#[derive(Debug)]
struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct GpsdPositionSource {
    addr: String,
    min_interval: Duration,
}

impl GpsdPositionSource {
    pub fn from_config(config: &PositionConfig) -> Self {
        Self {
            addr: config.gpsd_addr.clone(),
            min_interval: Duration::from_secs(config.min_interval_secs),
        }
    }
}

#[async_trait]
impl PositionSource for GpsdPositionSource {
    async fn subscribe(
        &self,
        tx: mpsc::Sender<PositionFix>,
    ) -> Result<Subscription, PositionError> {
        // Connect up front so an absent daemon fails the subscription.
        let stream = connect(&self.addr).await?;
        log::info!("position: watching gpsd at {}", self.addr);

        let task = tokio::spawn(stream_fixes(
            self.addr.clone(),
            stream,
            tx,
            Throttle::new(self.min_interval),
        ));
        Ok(Subscription::from_task(task))
    }
}

async fn connect(addr: &str) -> Result<TcpStream, PositionError> {
    let connect_err = |reason: String| PositionError::Connect {
        addr: addr.to_string(),
        reason,
    };
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| connect_err("timed out".into()))?
        .map_err(|e| connect_err(e.to_string()))?;
    stream.write_all(WATCH_COMMAND).await?;
    Ok(stream)
}

async fn stream_fixes(
    addr: String,
    first: TcpStream,
    tx: mpsc::Sender<PositionFix>,
    mut throttle: Throttle,
) {
    let mut next = Some(first);
    loop {
        let stream = match next.take() {
            Some(stream) => stream,
            None => {
                tokio::time::sleep(RECONNECT_DELAY).await;
                match connect(&addr).await {
                    Ok(stream) => {
                        log::info!("position: reconnected to gpsd at {addr}");
                        stream
                    }
                    Err(e) => {
                        log::warn!("position: {e}");
                        continue;
                    }
                }
            }
        };

        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(fix) = parse_report(&line) else {
                        continue;
                    };
                    if !throttle.admit(Instant::now()) {
                        continue;
                    }
                    if tx.send(fix).await.is_err() {
                        log::debug!("position: receiver closed, stopping gpsd reader");
                        return;
                    }
                }
                Ok(None) => {
                    log::warn!("position: gpsd closed the connection");
                    break;
                }
                Err(e) => {
                    log::warn!("position: gpsd read failed: {e}");
                    break;
                }
            }
        }

        if tx.is_closed() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_3d_fix() {
        let line = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2024-05-01T10:00:00.000Z","lat":40.4168,"lon":-3.7038,"alt":650.0,"eph":8.5,"epx":4.0,"epy":6.0}"#;
        let fix = parse_report(line).unwrap();
        assert_eq!(fix.latitude, 40.4168);
        assert_eq!(fix.longitude, -3.7038);
        assert_eq!(fix.accuracy_m, 8.5);
        assert_eq!(fix.observed_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn accuracy_falls_back_to_epx_epy() {
        let line = r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0,"epx":4.0,"epy":6.0}"#;
        assert_eq!(parse_report(line).unwrap().accuracy_m, 6.0);

        let line = r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0}"#;
        assert!(parse_report(line).unwrap().accuracy_m.is_infinite());
    }

    #[test]
    fn ignores_no_fix_and_other_classes() {
        assert!(parse_report(r#"{"class":"TPV","mode":1,"lat":1.0,"lon":2.0}"#).is_none());
        assert!(parse_report(r#"{"class":"TPV","mode":3}"#).is_none());
        assert!(parse_report(r#"{"class":"SKY","satellites":[]}"#).is_none());
        assert!(parse_report(r#"{"class":"VERSION","release":"3.25"}"#).is_none());
        assert!(parse_report("garbage").is_none());
    }

    #[test]
    fn throttle_spaces_fixes() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        let t0 = Instant::now();
        assert!(throttle.admit(t0));
        assert!(!throttle.admit(t0 + Duration::from_secs(10)));
        assert!(throttle.admit(t0 + Duration::from_secs(15)));
        assert!(!throttle.admit(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn zero_interval_admits_everything() {
        let mut throttle = Throttle::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(throttle.admit(t0));
        assert!(throttle.admit(t0));
    }

    #[tokio::test]
    async fn subscribe_fails_without_daemon() {
        // Bind then drop a listener to get a port nobody serves.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let source = GpsdPositionSource::from_config(&PositionConfig {
            gpsd_addr: addr,
            min_interval_secs: 0,
        });
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            source.subscribe(tx).await,
            Err(PositionError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn streams_fixes_from_local_daemon() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let daemon = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; WATCH_COMMAND.len()];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, WATCH_COMMAND);
            sock.write_all(b"{\"class\":\"VERSION\"}\n").await.unwrap();
            sock.write_all(b"{\"class\":\"TPV\",\"mode\":3,\"lat\":0.0,\"lon\":0.0018,\"eph\":3.0}\n")
                .await
                .unwrap();
            // Keep the socket open until the reader is aborted.
            std::future::pending::<()>().await;
        });

        let source = GpsdPositionSource::from_config(&PositionConfig {
            gpsd_addr: addr,
            min_interval_secs: 0,
        });
        let (tx, mut rx) = mpsc::channel(4);
        let sub = source.subscribe(tx).await.unwrap();

        let fix = rx.recv().await.unwrap();
        assert_eq!(fix.longitude, 0.0018);
        assert_eq!(fix.accuracy_m, 3.0);

        drop(sub);
        // Reader aborted: its sender is dropped and the channel closes.
        assert!(rx.recv().await.is_none());
        daemon.abort();
    }
}
