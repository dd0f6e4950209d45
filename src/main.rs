use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use ndvi_capture_lib::{
    init_logging, latest_raster, run_session, CaptureSettings, RasterReport, SensorBackend,
};

/// Unattended NIR/RED capture producing geotagged NDVI rasters.
#[derive(Debug, Parser)]
#[command(author, version, about = "Dual-sensor NDVI capture")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture until the session duration elapses or the process is interrupted.
    Run(RunArgs),
    /// Summarize the newest raster in a directory, or one raster file.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// JSON settings file. Defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seconds between cycle starts.
    #[arg(long)]
    interval: Option<u64>,

    /// Total session length in seconds.
    #[arg(long)]
    max_duration: Option<u64>,

    /// Seconds to wait for a GPS fix each cycle.
    #[arg(long)]
    fix_timeout: Option<u64>,

    #[arg(long)]
    nir_camera: Option<i32>,

    #[arg(long)]
    red_camera: Option<i32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// GPS serial device, e.g. /dev/serial0.
    #[arg(long, conflicts_with = "no_gps")]
    gps_port: Option<PathBuf>,

    /// Run without a GPS receiver; rasters use the testing coordinate.
    #[arg(long)]
    no_gps: bool,

    /// Use generated frames instead of cameras.
    #[arg(long)]
    synthetic: bool,
}

impl RunArgs {
    fn settings(&self) -> Result<CaptureSettings> {
        let mut settings = match &self.config {
            Some(path) => CaptureSettings::load(path)?,
            None => CaptureSettings::default(),
        };

        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(secs) = self.interval {
            settings.interval_secs = secs;
        }
        if let Some(secs) = self.max_duration {
            settings.max_duration_secs = secs;
        }
        if let Some(secs) = self.fix_timeout {
            settings.fix_timeout_secs = secs;
        }
        if let Some(index) = self.nir_camera {
            settings.nir_camera = index;
        }
        if let Some(index) = self.red_camera {
            settings.red_camera = index;
        }
        if let Some(width) = self.width {
            settings.resolution.width = width;
        }
        if let Some(height) = self.height {
            settings.resolution.height = height;
        }
        if let Some(port) = &self.gps_port {
            settings.gps_port = Some(port.clone());
        }
        if self.no_gps {
            settings.gps_port = None;
        }
        if self.synthetic {
            settings.backend = SensorBackend::Synthetic;
        }
        Ok(settings)
    }
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Output directory or a specific .tif file.
    target: Option<PathBuf>,

    /// Also export the full pixel matrix as CSV next to the raster.
    #[arg(long)]
    csv: bool,

    /// Rows and columns shown in the matrix preview.
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn inspect(args: &InspectArgs) -> Result<()> {
    let target = args
        .target
        .clone()
        .unwrap_or_else(|| CaptureSettings::default().output_dir);
    let raster = if target.is_dir() {
        latest_raster(&target)?
    } else {
        target
    };

    let report = RasterReport::load(&raster)?;
    print!("{}", report.render(args.limit));
    if args.csv {
        let csv = report.export_csv()?;
        println!("matrix exported to {}", csv.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(err) = try_main().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            run_session(args.settings()?).await?;
        }
        Command::Inspect(args) => inspect(&args)?,
    }
    Ok(())
}
