pub mod metrics;
pub mod ndvi;
pub mod output;
pub mod position;
pub mod sensing;
pub mod session;
pub mod settings;
pub mod utils;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use output::ArtifactAssembler;
use position::{PositionResolver, ReceiverCapability};
use sensing::{CaptureSynchronizer, ChannelRole, SyntheticSource};

pub use output::{latest_raster, RasterReport};
pub use session::{SessionController, SessionEnd, SessionError, SessionReport, SessionScheduler};
pub use settings::{CaptureSettings, SensorBackend};
pub use utils::init_logging;

/// Run one capture session to completion.
///
/// Returns once the session reaches its duration limit, or after an interrupt
/// (Ctrl-C, or SIGTERM on unix) has drained it.
pub async fn run_session(settings: CaptureSettings) -> Result<SessionReport> {
    settings.validate()?;
    std::fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            settings.output_dir.display()
        )
    })?;

    info!(
        "NDVI capture starting: {:?} backend, {} @ {:?}, output {}",
        settings.backend,
        settings.resolution,
        settings.pixel_format,
        settings.output_dir.display()
    );

    let capture = build_capture(&settings)?;
    let capability = ReceiverCapability::open(settings.gps_port.as_deref()).await;
    let resolver = PositionResolver::new(capability, settings.testing_coordinate);
    let assembler = ArtifactAssembler::new(&settings.output_dir, settings.pixel_size, &settings.crs);
    let scheduler = SessionScheduler::new(settings.session_config(), capture, resolver, assembler);

    let mut controller = SessionController::new();
    controller.start(scheduler)?;
    let signals = tokio::spawn(cancel_on_shutdown_signal(controller.cancel_token()));

    let report = controller.wait().await;
    signals.abort();
    let report = report?;

    info!(
        "Session {} finished ({:?}): {} cycles, {} rasters, {} skipped, {} failed writes",
        report.session_id,
        report.end,
        report.cycles,
        report.artifacts.len(),
        report.skipped_cycles,
        report.failed_writes
    );
    Ok(report)
}

fn build_capture(settings: &CaptureSettings) -> Result<CaptureSynchronizer> {
    match settings.backend {
        SensorBackend::Synthetic => Ok(CaptureSynchronizer::new(
            Box::new(SyntheticSource::vegetation(ChannelRole::Nir)),
            Box::new(SyntheticSource::vegetation(ChannelRole::Red)),
        )),
        #[cfg(feature = "camera")]
        SensorBackend::Camera => Ok(CaptureSynchronizer::new(
            Box::new(sensing::OpenCvSource::new(ChannelRole::Nir, settings.nir_camera)),
            Box::new(sensing::OpenCvSource::new(ChannelRole::Red, settings.red_camera)),
        )),
        #[cfg(not(feature = "camera"))]
        SensorBackend::Camera => {
            anyhow::bail!("the camera backend needs a build with `--features camera`")
        }
    }
}

async fn cancel_on_shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("Ctrl-C handler failed: {err}");
                return;
            }
            info!("Interrupt received, draining session");
        }
        _ = terminate => info!("Termination requested, draining session"),
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndvi::IndexStats;
    use crate::output::read_raster;
    use crate::sensing::Resolution;

    fn bench_settings(dir: &std::path::Path) -> CaptureSettings {
        CaptureSettings {
            output_dir: dir.join("captures"),
            max_duration_secs: 0,
            gps_port: None,
            resolution: Resolution::new(8, 6),
            backend: SensorBackend::Synthetic,
            ..CaptureSettings::default()
        }
    }

    #[tokio::test]
    async fn synthetic_session_writes_one_raster() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_session(bench_settings(dir.path())).await.unwrap();

        assert_eq!(report.end, SessionEnd::Completed);
        assert_eq!(report.cycles, 1);
        let artifact = &report.artifacts[0];
        assert!(artifact.raster_path.starts_with(dir.path().join("captures")));

        let raster = read_raster(&artifact.raster_path).unwrap();
        assert_eq!((raster.width, raster.height), (8, 6));
        let stats = IndexStats::from_values(&raster.values);
        assert!(stats.min > 0.3 && stats.max < 0.9, "unexpected range {stats:?}");
    }

    #[tokio::test]
    async fn invalid_settings_fail_before_startup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CaptureSettings {
            interval_secs: 0,
            ..bench_settings(dir.path())
        };
        assert!(run_session(settings).await.is_err());
        assert!(!dir.path().join("captures").exists());
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn camera_backend_requires_feature() {
        let settings = CaptureSettings {
            backend: SensorBackend::Camera,
            ..CaptureSettings::default()
        };
        assert!(build_capture(&settings).is_err());
    }
}
