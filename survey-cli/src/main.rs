use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use survey_cli::{Pipeline, PipelineConfig, RunOptions};
use survey_metadata::{read_table, write_table, Coordinate, StageReport};

#[derive(Parser)]
#[command(name = "transect-pipeline")]
#[command(about = "Assign aerial survey images to transects, correct their GPS and crop them")]
struct Cli {
    /// JSON file overriding the default pipeline configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read EXIF capture time and GPS from every image into a new table
    Extract {
        /// Folder containing the survey images (searched recursively)
        #[arg(long)]
        images: PathBuf,

        /// Table to write
        #[arg(long)]
        out: PathBuf,
    },

    /// Label table records with transects from a boundary CSV
    Assign {
        #[arg(long)]
        table: PathBuf,

        /// CSV with transect_id and start/end images and/or times
        #[arg(long)]
        transects: PathBuf,

        /// Write here instead of overwriting the input table
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Define a transect by two map points, each snapped to its nearest image
    Boundary {
        #[arg(long)]
        table: PathBuf,

        /// Boundary CSV to add the row to (created if missing)
        #[arg(long)]
        transects: PathBuf,

        #[arg(long)]
        id: String,

        /// "lat,lon" near one end of the transect
        #[arg(long, allow_hyphen_values = true, value_parser = parse_coordinate)]
        start: Coordinate,

        /// "lat,lon" near the other end
        #[arg(long, allow_hyphen_values = true, value_parser = parse_coordinate)]
        end: Coordinate,

        /// Furthest an image may be from a point, in metres
        #[arg(long)]
        max_distance: Option<f64>,
    },

    /// Replace GPS with the nearest point of an external track
    Align {
        #[arg(long)]
        table: PathBuf,

        /// Track as CSV or KML
        #[arg(long)]
        track: PathBuf,

        /// Maximum gap in seconds between capture and track point
        #[arg(long)]
        tolerance: Option<f64>,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Renumber, crop and geotag the selected images
    Crop {
        #[arg(long)]
        table: PathBuf,

        /// Folder the table's filepaths live under
        #[arg(long)]
        images: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Pixels removed from each edge
        #[arg(long)]
        crop_amount: Option<u32>,

        #[arg(long)]
        min_altitude: Option<f64>,

        #[arg(long)]
        max_altitude: Option<f64>,
    },

    /// Run every stage, writing the table after each one
    Run {
        #[arg(long)]
        images: PathBuf,

        #[arg(long)]
        transects: PathBuf,

        #[arg(long)]
        track: Option<PathBuf>,

        /// Cropped image folder (default: <images>/cropped_images_on_tx/Images)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Save the per-stage reports as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "survey_metadata={level},survey_crop={level},survey_cli={level},transect_pipeline={level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract { images, out } => {
            let pipeline = Pipeline::new(config)?;
            let (records, report) = pipeline.extract(&images, None)?;
            write_table(&out, &records)?;
            print_report(&report);
        }
        Commands::Assign { table, transects, out } => {
            let pipeline = Pipeline::new(config)?;
            let records = read_table(&table)?;
            let (records, report) = pipeline.assign(records, &transects)?;
            write_table(out.as_deref().unwrap_or(table.as_path()), &records)?;
            print_report(&report);
        }
        Commands::Boundary {
            table,
            transects,
            id,
            start,
            end,
            max_distance,
        } => {
            if let Some(max_distance) = max_distance {
                config.boundary_max_distance_m = max_distance;
            }
            let pipeline = Pipeline::new(config)?;
            let records = read_table(&table)?;
            let boundary = pipeline.add_boundary(&records, &transects, &id, start, end)?;
            println!(
                "📍 {}: {} -> {}",
                boundary.transect_id,
                boundary.start_ref.image.as_deref().unwrap_or("NA"),
                boundary.end_ref.image.as_deref().unwrap_or("NA")
            );
        }
        Commands::Align { table, track, tolerance, out } => {
            if let Some(tolerance) = tolerance {
                config.tolerance_seconds = tolerance;
            }
            let pipeline = Pipeline::new(config)?;
            let records = read_table(&table)?;
            let (records, report) = pipeline.align(records, &track)?;
            write_table(out.as_deref().unwrap_or(table.as_path()), &records)?;
            print_report(&report);
        }
        Commands::Crop {
            table,
            images,
            output,
            crop_amount,
            min_altitude,
            max_altitude,
        } => {
            if let Some(crop_amount) = crop_amount {
                config.crop_amount_px = crop_amount;
            }
            if let Some(min_altitude) = min_altitude {
                config.min_altitude = min_altitude;
            }
            if let Some(max_altitude) = max_altitude {
                config.max_altitude = max_altitude;
            }
            let pipeline = Pipeline::new(config)?;
            let records = read_table(&table)?;
            let (records, report) = pipeline.crop(records, Some(images.as_path()), &output)?;
            write_table(&table, &records)?;
            print_report(&report);
        }
        Commands::Run {
            images,
            transects,
            track,
            output,
            report,
        } => {
            let pipeline = Pipeline::new(config)?;
            println!("🔍 Processing survey images in: {}", images.display());

            let mut options = RunOptions::new(images, transects);
            options.track = track;
            options.output = output;
            let summary = pipeline.run(&options)?;
            summary.print();

            if let Some(report_path) = report {
                let json = serde_json::to_string_pretty(&summary).context("Failed to serialize stage reports")?;
                std::fs::write(&report_path, json)
                    .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
                println!("💾 Reports saved to: {}", report_path.display());
            }
        }
    }

    Ok(())
}

fn parse_coordinate(raw: &str) -> Result<Coordinate, String> {
    let (lat, lon) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lon\", got '{}'", raw))?;
    let number = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("'{}' is not a number", v.trim()))
    };
    let (latitude, longitude) = (number(lat)?, number(lon)?);
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("({}, {}) is not a valid position", latitude, longitude));
    }
    Ok(Coordinate::new(latitude, longitude))
}

fn print_report(report: &StageReport) {
    println!(
        "[{}] {} ok, {} skipped, {} failed, {} warnings",
        report.stage,
        report.succeeded,
        report.skipped,
        report.failed,
        report.warning_count()
    );
}
