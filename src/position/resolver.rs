use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::fix::{Coordinate, PositionFix};
use super::nmea::parse_sentence;
use super::receiver::{ReadOutcome, ReceiverCapability};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Back-off after a transport error so a failing device does not spin the loop.
const READ_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Turns the receiver capability into one fix per cycle.
pub struct PositionResolver {
    capability: ReceiverCapability,
    testing: Coordinate,
}

impl PositionResolver {
    pub fn new(capability: ReceiverCapability, testing: Coordinate) -> Self {
        Self {
            capability,
            testing,
        }
    }

    pub fn has_receiver(&self) -> bool {
        self.capability.is_present()
    }

    /// Best-effort fix within `timeout`.
    ///
    /// Without a receiver this returns the testing coordinate immediately. With
    /// one, lines are read until a GGA/RMC sentence parses or the deadline
    /// passes, in which case a degraded (0, 0) fix is returned. Unparseable
    /// lines never extend the deadline. `None` means `cancel` fired first.
    pub async fn resolve_fix(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<PositionFix> {
        let receiver = match &mut self.capability {
            ReceiverCapability::NoReceiver => {
                return Some(PositionFix::unavailable(self.testing, Utc::now()));
            }
            ReceiverCapability::Receiver(receiver) => receiver,
        };

        let deadline = Instant::now() + timeout;
        let mut skipped = 0usize;

        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return None,
                outcome = receiver.read_line(remaining) => outcome,
            };

            match outcome {
                Ok(ReadOutcome::Line(line)) => match parse_sentence(&line) {
                    Some(coordinate) => {
                        log_debug!("position fix {coordinate} after {skipped} skipped lines");
                        return Some(PositionFix::fixed(coordinate, Utc::now()));
                    }
                    None => skipped += 1,
                },
                Ok(ReadOutcome::TimedOut) => break,
                Ok(ReadOutcome::Closed) => {
                    log_warn!(
                        "position receiver {} reached end of stream; waiting out the fix timeout",
                        receiver.name()
                    );
                    if !pause_until(deadline, cancel).await {
                        return None;
                    }
                    break;
                }
                Err(err) => {
                    log_debug!("position receiver read error: {err}");
                    skipped += 1;
                    let pause_end = deadline.min(Instant::now() + READ_ERROR_PAUSE);
                    if !pause_until(pause_end, cancel).await {
                        return None;
                    }
                }
            }
        }

        log_warn!("no position fix within {timeout:?} ({skipped} lines skipped), using (0, 0)");
        Some(PositionFix::degraded(Utc::now()))
    }

    /// Close the receiver handle, if any. Subsequent calls are no-ops.
    pub fn release(&mut self) -> bool {
        match std::mem::replace(&mut self.capability, ReceiverCapability::NoReceiver) {
            ReceiverCapability::Receiver(receiver) => {
                receiver.close();
                true
            }
            ReceiverCapability::NoReceiver => false,
        }
    }
}

/// Sleep until `until` unless cancelled. Returns false on cancellation.
async fn pause_until(until: Instant, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(until) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{FixQuality, NmeaReceiver};
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

    const TESTING: Coordinate = Coordinate::new(40.0, -86.0);

    fn duplex_resolver() -> (PositionResolver, DuplexStream) {
        let (client, server) = tokio::io::duplex(1024);
        let receiver = NmeaReceiver::from_reader("duplex", BufReader::new(client));
        let resolver = PositionResolver::new(ReceiverCapability::Receiver(receiver), TESTING);
        (resolver, server)
    }

    #[tokio::test]
    async fn no_receiver_returns_testing_coordinate_immediately() {
        let mut resolver = PositionResolver::new(ReceiverCapability::NoReceiver, TESTING);
        let started = Instant::now();

        let fix = resolver
            .resolve_fix(Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(fix.quality, FixQuality::Unavailable);
        assert_eq!(fix.coordinate, TESTING);
        assert!(!fix.is_fixed());
    }

    #[tokio::test]
    async fn parses_first_valid_sentence() {
        let (mut resolver, mut server) = duplex_resolver();
        server
            .write_all(b"garbage\r\n$GPGSV,3,1,11\r\n$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n")
            .await
            .unwrap();

        let fix = resolver
            .resolve_fix(Duration::from_secs(2), &CancellationToken::new())
            .await
            .unwrap();

        assert!(fix.is_fixed());
        assert!((fix.latitude() - 48.1173).abs() < 1e-4);
        assert!((fix.longitude() - 11.516_666).abs() < 1e-4);
    }

    #[tokio::test]
    async fn silent_receiver_degrades_after_full_timeout() {
        let (mut resolver, _server) = duplex_resolver();
        let timeout = Duration::from_millis(300);
        let started = Instant::now();

        let fix = resolver
            .resolve_fix(timeout, &CancellationToken::new())
            .await
            .unwrap();

        let waited = started.elapsed();
        assert!(waited >= timeout, "returned after {waited:?}");
        assert!(waited < timeout + Duration::from_millis(250));
        assert_eq!(fix.quality, FixQuality::Degraded);
        assert_eq!(fix.coordinate, Coordinate::ORIGIN);
    }

    #[tokio::test]
    async fn malformed_lines_do_not_reset_the_deadline() {
        let (mut resolver, mut server) = duplex_resolver();
        let writer = tokio::spawn(async move {
            for _ in 0..20 {
                if server.write_all(b"$GPGGA,,,,,,0,,,,,,,,\r\n").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            server
        });

        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let fix = resolver
            .resolve_fix(timeout, &CancellationToken::new())
            .await
            .unwrap();

        let waited = started.elapsed();
        assert!(waited >= timeout);
        assert!(waited < timeout + Duration::from_millis(200));
        assert_eq!(fix.quality, FixQuality::Degraded);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn closed_stream_still_waits_out_the_timeout() {
        let (mut resolver, server) = duplex_resolver();
        drop(server);
        let timeout = Duration::from_millis(150);
        let started = Instant::now();

        let fix = resolver
            .resolve_fix(timeout, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= timeout);
        assert_eq!(fix.quality, FixQuality::Degraded);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let (mut resolver, _server) = duplex_resolver();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let fix = resolver.resolve_fix(Duration::from_secs(10), &cancel).await;

        assert!(fix.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn release_closes_receiver_once() {
        let (mut resolver, mut server) = duplex_resolver();
        assert!(resolver.has_receiver());

        assert!(resolver.release());
        assert!(!resolver.release());
        assert!(!resolver.has_receiver());
        assert!(server.write_all(b"$GPGGA\r\n").await.is_err());
    }
}
