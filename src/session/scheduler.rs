use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::{read_core_current, CycleMetrics, CycleOutcome, MetricsCollector};
use crate::ndvi::compute_index;
use crate::output::{
    render_preview, ArtifactAssembler, AssembledFrame, GeoTiffWriter, OutputArtifact,
    OutputError, PngPreviewWriter, PreviewWriter, RasterSpec, RasterWriter,
};
use crate::position::{FixQuality, PositionResolver};
use crate::sensing::{CaptureError, CaptureSynchronizer, FramePair};

use super::state::{CaptureSession, SessionConfig, SessionEnd, SessionPhase, SessionReport};

// Set to false to silence per-cycle chatter from this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sensor startup failed")]
    Startup(#[source] CaptureError),

    #[error("capture failed unrecoverably")]
    Unrecoverable(#[source] CaptureError),

    #[error("blocking worker failed: {0}")]
    Worker(String),
}

impl From<JoinError> for SessionError {
    fn from(err: JoinError) -> Self {
        SessionError::Worker(err.to_string())
    }
}

enum CycleResult {
    Persisted(OutputArtifact),
    Skipped,
    WriteFailed,
    Cancelled,
}

#[derive(Default)]
struct CycleTimings {
    capture_ms: u64,
    frame_skew_us: Option<u64>,
    fix_ms: Option<u64>,
    fix_quality: Option<FixQuality>,
    index_ms: Option<u64>,
    write_ms: Option<u64>,
}

#[derive(Default)]
struct Tally {
    cycles: u64,
    artifacts: Vec<OutputArtifact>,
    skipped: u64,
    failed_writes: u64,
}

/// Drives one capture session from sensor startup to release.
///
/// Owns the sensor pair and the position receiver for its whole lifetime.
/// Blocking work (sensor reads, index math, file writes) runs one step at a
/// time on the blocking pool, so consecutive cycles never overlap.
pub struct SessionScheduler {
    config: SessionConfig,
    phase: SessionPhase,
    // Lent to the blocking pool for each sensor call and put back afterwards.
    capture: Option<CaptureSynchronizer>,
    resolver: PositionResolver,
    assembler: ArtifactAssembler,
    raster: Arc<dyn RasterWriter>,
    preview: Arc<dyn PreviewWriter>,
    metrics: MetricsCollector,
}

impl SessionScheduler {
    pub fn new(
        config: SessionConfig,
        capture: CaptureSynchronizer,
        resolver: PositionResolver,
        assembler: ArtifactAssembler,
    ) -> Self {
        Self {
            config,
            phase: SessionPhase::default(),
            capture: Some(capture),
            resolver,
            assembler,
            raster: Arc::new(GeoTiffWriter),
            preview: Arc::new(PngPreviewWriter),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_writers(mut self, raster: Arc<dyn RasterWriter>, preview: Arc<dyn PreviewWriter>) -> Self {
        self.raster = raster;
        self.preview = preview;
        self
    }

    /// Run until `max_duration` elapses, `cancel` fires, or capture fails unrecoverably.
    ///
    /// Sensors and receiver are released on every path before this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SessionReport, SessionError> {
        let session = CaptureSession::begin(self.config.interval, self.config.max_duration);
        log_info!(
            "session {} initializing (interval {:?}, max duration {:?}, receiver: {})",
            session.id,
            session.interval,
            session.max_duration,
            if self.resolver.has_receiver() { "present" } else { "none" }
        );

        if let Err(err) = self.start_sensors().await {
            log_error!("session {} failed to start sensors: {err:?}", session.id);
            self.transition(SessionPhase::Draining);
            self.drain().await;
            self.transition(SessionPhase::Stopped);
            return Err(err);
        }

        self.transition(SessionPhase::Running);
        let mut tally = Tally::default();
        let outcome = self.run_cycles(&session, &cancel, &mut tally).await;

        self.transition(SessionPhase::Draining);
        self.drain().await;
        self.transition(SessionPhase::Stopped);

        let end = match &outcome {
            Ok(end) => *end,
            Err(_) => SessionEnd::Failed,
        };
        let report = SessionReport {
            session_id: session.id.clone(),
            started_at: session.started_at,
            stopped_at: Utc::now(),
            end,
            cycles: tally.cycles,
            artifacts: tally.artifacts,
            skipped_cycles: tally.skipped,
            failed_writes: tally.failed_writes,
            metrics: self.metrics.get_snapshot().await,
        };

        match serde_json::to_string(&report) {
            Ok(json) => log_info!("session report: {json}"),
            Err(err) => log_warn!("failed to serialize session report: {err}"),
        }

        outcome.map(|_| report)
    }

    fn transition(&mut self, next: SessionPhase) {
        log_debug!("session phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    async fn start_sensors(&mut self) -> Result<(), SessionError> {
        let mut capture = self.take_capture()?;
        let format = self.config.pixel_format;
        let resolution = self.config.resolution;

        let (capture, started) = tokio::task::spawn_blocking(move || {
            let started = capture.start(format, resolution);
            (capture, started)
        })
        .await?;

        self.capture = Some(capture);
        started.map_err(SessionError::Startup)
    }

    async fn run_cycles(
        &mut self,
        session: &CaptureSession,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<SessionEnd, SessionError> {
        let mut cycle = 0u64;

        loop {
            if cancel.is_cancelled() {
                log_info!("session {} cancelled after {} cycles", session.id, tally.cycles);
                return Ok(SessionEnd::Cancelled);
            }

            cycle += 1;
            let cycle_start = Instant::now();
            match self.run_cycle(cycle, cancel).await? {
                CycleResult::Persisted(artifact) => tally.artifacts.push(artifact),
                CycleResult::Skipped => tally.skipped += 1,
                CycleResult::WriteFailed => tally.failed_writes += 1,
                CycleResult::Cancelled => {
                    log_info!("session {} cancelled during cycle {cycle}", session.id);
                    return Ok(SessionEnd::Cancelled);
                }
            }
            tally.cycles += 1;

            if !session.within_duration() {
                return Ok(completed(session, tally));
            }

            let pause = session.next_pause(cycle_start.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => {
                    log_info!("session {} cancelled while waiting for cycle {}", session.id, cycle + 1);
                    return Ok(SessionEnd::Cancelled);
                }
                _ = tokio::time::sleep(pause) => {}
            }

            // The sleep can carry the session past its limit; only the first cycle is unconditional.
            if !session.within_duration() {
                return Ok(completed(session, tally));
            }
        }
    }

    async fn run_cycle(
        &mut self,
        cycle: u64,
        cancel: &CancellationToken,
    ) -> Result<CycleResult, SessionError> {
        let cycle_start = Instant::now();
        let timestamp = Utc::now();
        let mut timings = CycleTimings::default();

        let capture_start = Instant::now();
        let captured = self.capture_pair().await?;
        timings.capture_ms = elapsed_ms(capture_start);

        let pair = match captured {
            Ok(pair) => pair,
            Err(err) if err.is_recoverable() => {
                log_warn!("cycle {cycle}: capture failed, skipping: {err}");
                self.record(cycle, timestamp, CycleOutcome::CaptureSkipped, timings, cycle_start)
                    .await;
                return Ok(CycleResult::Skipped);
            }
            Err(err) => {
                log_error!("cycle {cycle}: unrecoverable capture failure: {err}");
                return Err(SessionError::Unrecoverable(err));
            }
        };
        timings.frame_skew_us = Some(pair.skew.as_micros() as u64);

        let fix_start = Instant::now();
        let Some(fix) = self.resolver.resolve_fix(self.config.fix_timeout, cancel).await else {
            return Ok(CycleResult::Cancelled);
        };
        timings.fix_ms = Some(elapsed_ms(fix_start));
        timings.fix_quality = Some(fix.quality);

        let index_start = Instant::now();
        let FramePair { nir, red, skew } = pair;
        let (index, stats) = tokio::task::spawn_blocking(move || {
            let index = compute_index(&nir, &red);
            let stats = index.stats();
            (index, stats)
        })
        .await?;
        timings.index_ms = Some(elapsed_ms(index_start));

        let assembled = self.assembler.assemble(index, &fix, timestamp);
        let raster_path = assembled.artifact.raster_path.clone();

        let write_start = Instant::now();
        let raster = Arc::clone(&self.raster);
        let preview = Arc::clone(&self.preview);
        let written = tokio::task::spawn_blocking(move || {
            persist(raster.as_ref(), preview.as_ref(), &assembled).map(|_| assembled.artifact)
        })
        .await?;
        timings.write_ms = Some(elapsed_ms(write_start));

        match written {
            Ok(artifact) => {
                log_info!(
                    "cycle {cycle}: {} fix {}, skew {}us, ndvi mean {:.3} [{:.3}, {:.3}] -> {}",
                    fix.quality.as_str(),
                    fix.coordinate,
                    skew.as_micros(),
                    stats.mean,
                    stats.min,
                    stats.max,
                    raster_path.display()
                );
                self.record(cycle, timestamp, CycleOutcome::Persisted, timings, cycle_start)
                    .await;
                Ok(CycleResult::Persisted(artifact))
            }
            Err(err) => {
                log_warn!("cycle {cycle}: failed to persist {}: {err}", raster_path.display());
                self.record(cycle, timestamp, CycleOutcome::WriteFailed, timings, cycle_start)
                    .await;
                Ok(CycleResult::WriteFailed)
            }
        }
    }

    async fn capture_pair(&mut self) -> Result<Result<FramePair, CaptureError>, SessionError> {
        let mut capture = self.take_capture()?;
        let (capture, pair) = tokio::task::spawn_blocking(move || {
            let pair = capture.capture_aligned();
            (capture, pair)
        })
        .await?;
        self.capture = Some(capture);
        Ok(pair)
    }

    fn take_capture(&mut self) -> Result<CaptureSynchronizer, SessionError> {
        self.capture
            .take()
            .ok_or_else(|| SessionError::Worker("capture synchronizer lost by an earlier worker".into()))
    }

    async fn record(
        &mut self,
        cycle: u64,
        timestamp: DateTime<Utc>,
        outcome: CycleOutcome,
        timings: CycleTimings,
        cycle_start: Instant,
    ) {
        let system = self.metrics.sample_system_metrics().await;
        let core_current_amps = if self.config.sample_core_current {
            read_core_current().await
        } else {
            None
        };

        self.metrics
            .record_cycle(CycleMetrics {
                cycle,
                timestamp,
                outcome,
                capture_ms: timings.capture_ms,
                frame_skew_us: timings.frame_skew_us,
                fix_ms: timings.fix_ms,
                fix_quality: timings.fix_quality,
                index_ms: timings.index_ms,
                write_ms: timings.write_ms,
                total_ms: elapsed_ms(cycle_start),
                cpu_percent: system.cpu_percent,
                memory_mb: system.memory_mb,
                core_current_amps,
            })
            .await;
    }

    /// Close the receiver, then stop RED and NIR.
    async fn drain(&mut self) {
        if self.resolver.release() {
            log_debug!("position receiver released");
        }

        let Some(mut capture) = self.capture.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || capture.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log_warn!("sensors did not stop cleanly: {err}"),
            Err(err) => log_error!("sensor stop worker failed: {err}"),
        }
    }
}

fn completed(session: &CaptureSession, tally: &Tally) -> SessionEnd {
    log_info!(
        "session {} reached its {:?} limit after {} cycles",
        session.id,
        session.max_duration,
        tally.cycles
    );
    SessionEnd::Completed
}

fn persist(
    raster: &dyn RasterWriter,
    preview: &dyn PreviewWriter,
    frame: &AssembledFrame,
) -> Result<(), OutputError> {
    let index = &frame.index;
    raster.write_raster(&RasterSpec {
        path: &frame.artifact.raster_path,
        width: index.width(),
        height: index.height(),
        crs: &frame.crs,
        transform: frame.transform,
        data: index.values(),
    })?;

    let image = render_preview(index.width(), index.height(), &frame.preview_levels);
    preview.write_preview(&frame.artifact.preview_path, &image)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::io::{AsyncWriteExt, BufReader};

    use super::*;
    use crate::output::{read_raster, DEFAULT_CRS};
    use crate::position::{Coordinate, NmeaReceiver, ReceiverCapability};
    use crate::sensing::synchronizer::tests::ScriptedSource;
    use crate::sensing::{ChannelRole, PixelFormat, Resolution};

    const TESTING: Coordinate = Coordinate::new(40.0, -86.0);

    fn config(interval_ms: u64, max_duration_ms: u64) -> SessionConfig {
        SessionConfig {
            interval: Duration::from_millis(interval_ms),
            max_duration: Duration::from_millis(max_duration_ms),
            fix_timeout: Duration::from_millis(200),
            pixel_format: PixelFormat::Rgb888,
            resolution: Resolution::new(4, 4),
            sample_core_current: false,
        }
    }

    fn build(
        dir: &Path,
        config: SessionConfig,
        nir: ScriptedSource,
        red: ScriptedSource,
        capability: ReceiverCapability,
    ) -> SessionScheduler {
        SessionScheduler::new(
            config,
            CaptureSynchronizer::new(Box::new(nir), Box::new(red)),
            PositionResolver::new(capability, TESTING),
            ArtifactAssembler::new(dir, 1.0, DEFAULT_CRS),
        )
    }

    fn sources() -> (ScriptedSource, ScriptedSource) {
        (
            ScriptedSource::new(ChannelRole::Nir, 200.0),
            ScriptedSource::new(ChannelRole::Red, 50.0),
        )
    }

    fn duplex_receiver() -> (ReceiverCapability, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(256);
        let receiver = NmeaReceiver::from_reader("duplex", BufReader::new(client));
        (ReceiverCapability::Receiver(receiver), server)
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    struct FailingRaster;

    impl RasterWriter for FailingRaster {
        fn write_raster(&self, raster: &RasterSpec<'_>) -> Result<(), OutputError> {
            Err(OutputError::io(
                raster.path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only medium"),
            ))
        }
    }

    #[tokio::test]
    async fn single_cycle_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, red) = sources();
        let (nir_stops, red_stops) = (Arc::clone(&nir.stops), Arc::clone(&red.stops));

        let scheduler = build(dir.path(), config(1000, 0), nir, red, ReceiverCapability::NoReceiver);
        let report = scheduler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(report.end, SessionEnd::Completed);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.metrics.persisted_count, 1);
        assert_eq!(nir_stops.load(Ordering::SeqCst), 1);
        assert_eq!(red_stops.load(Ordering::SeqCst), 1);

        let artifact = &report.artifacts[0];
        assert_eq!(artifact.fix.quality, FixQuality::Unavailable);
        assert_eq!(artifact.fix.coordinate, TESTING);
        assert!(artifact.preview_path.exists());

        let raster = read_raster(&artifact.raster_path).unwrap();
        assert_eq!((raster.width, raster.height), (4, 4));
        assert!(raster.values.iter().all(|v| (v - 0.6).abs() < 1e-4));
        assert_eq!(raster.epsg, Some(4326));
        let transform = raster.transform.unwrap();
        assert_eq!(transform.origin_x, -86.0);
        assert_eq!(transform.origin_y, 40.0);
        assert_eq!(transform.pixel_width, 1.0);
        assert_eq!(transform.pixel_height, -1.0);
    }

    #[tokio::test]
    async fn receiver_fix_sets_raster_origin() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, red) = sources();
        let (capability, mut server) = duplex_receiver();
        server
            .write_all(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n")
            .await
            .unwrap();

        let report = build(dir.path(), config(1000, 0), nir, red, capability)
            .run(CancellationToken::new())
            .await
            .unwrap();

        let artifact = &report.artifacts[0];
        assert!(artifact.fix.is_fixed());
        let transform = read_raster(&artifact.raster_path).unwrap().transform.unwrap();
        assert!((transform.origin_y - 48.1173).abs() < 1e-4);
        assert!((transform.origin_x - 11.516_666).abs() < 1e-4);

        // Receiver was released during draining.
        assert!(server.write_all(b"$GPGGA\r\n").await.is_err());
    }

    #[tokio::test]
    async fn no_cycle_starts_past_max_duration() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, red) = sources();
        let max_duration = Duration::from_millis(150);
        let captures = Arc::clone(&nir.captures);

        let report = build(dir.path(), config(100, 150), nir, red, ReceiverCapability::NoReceiver)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.end, SessionEnd::Completed);
        assert!(report.cycles >= 1);
        assert_eq!(captures.load(Ordering::SeqCst) as u64, report.cycles);
        for artifact in &report.artifacts {
            let offset = (artifact.timestamp - report.started_at).to_std().unwrap();
            assert!(offset < max_duration, "cycle started {offset:?} into the session");
        }
        // 0 ms and ~100 ms; the one due at ~200 ms is past the limit.
        assert!(report.cycles <= 2, "ran {} cycles", report.cycles);
    }

    #[tokio::test]
    async fn cancel_during_sleep_shuts_down_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, red) = sources();
        let (nir_stops, red_stops) = (Arc::clone(&nir.stops), Arc::clone(&red.stops));
        let scheduler = build(dir.path(), config(10_000, 60_000), nir, red, ReceiverCapability::NoReceiver);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let cancelled_at = std::time::Instant::now();
        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(report.end, SessionEnd::Cancelled);
        assert_eq!(report.cycles, 1);
        assert_eq!(nir_stops.load(Ordering::SeqCst), 1);
        assert_eq!(red_stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_during_position_wait_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, red) = sources();
        let (capability, _server) = duplex_receiver();
        let mut slow_fix = config(10_000, 60_000);
        slow_fix.fix_timeout = Duration::from_secs(5);
        let scheduler = build(dir.path(), slow_fix, nir, red, capability);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.end, SessionEnd::Cancelled);
        assert_eq!(report.cycles, 0);
        assert!(report.artifacts.is_empty());
        assert_eq!(file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn transient_capture_failure_skips_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut nir, red) = sources();
        nir.failures.push(CaptureError::ReadFailed {
            role: ChannelRole::Nir,
            reason: "frame dropped".into(),
        });

        let report = build(dir.path(), config(20, 50), nir, red, ReceiverCapability::NoReceiver)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.end, SessionEnd::Completed);
        assert_eq!(report.skipped_cycles, 1);
        assert!(report.cycles >= 2);
        assert!(!report.artifacts.is_empty());
        assert_eq!(report.metrics.skipped_count, 1);
    }

    #[tokio::test]
    async fn closed_device_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut nir, red) = sources();
        nir.failures.push(CaptureError::DeviceClosed { role: ChannelRole::Nir });
        let (nir_stops, red_stops) = (Arc::clone(&nir.stops), Arc::clone(&red.stops));

        let err = build(dir.path(), config(20, 10_000), nir, red, ReceiverCapability::NoReceiver)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Unrecoverable(CaptureError::DeviceClosed { .. })));
        assert_eq!(nir_stops.load(Ordering::SeqCst), 1);
        assert_eq!(red_stops.load(Ordering::SeqCst), 1);
        assert_eq!(file_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn startup_failure_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, mut red) = sources();
        red.fail_start = true;
        let nir_stops = Arc::clone(&nir.stops);
        let red_stops = Arc::clone(&red.stops);
        let captures = Arc::clone(&nir.captures);
        let (capability, mut server) = duplex_receiver();

        let err = build(dir.path(), config(20, 1000), nir, red, capability)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Startup(CaptureError::Unavailable { .. })));
        assert_eq!(nir_stops.load(Ordering::SeqCst), 1);
        assert_eq!(red_stops.load(Ordering::SeqCst), 0);
        assert_eq!(captures.load(Ordering::SeqCst), 0);
        assert!(server.write_all(b"$GPGGA\r\n").await.is_err());
    }

    #[tokio::test]
    async fn write_failure_does_not_end_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (nir, red) = sources();

        let report = build(dir.path(), config(1000, 0), nir, red, ReceiverCapability::NoReceiver)
            .with_writers(Arc::new(FailingRaster), Arc::new(PngPreviewWriter))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.end, SessionEnd::Completed);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.failed_writes, 1);
        assert!(report.artifacts.is_empty());
        assert_eq!(report.metrics.failed_write_count, 1);
    }
}
