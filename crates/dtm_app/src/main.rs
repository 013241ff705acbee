mod commands;
mod render;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dtm_core::{BoundingBox, ClipBounds, CoverageMode, WEB_MERCATOR};
use dtm_logging::{dtm_error, LogDestination};
use log::LevelFilter;

use crate::commands::FetchArgs;
use crate::settings::{load_settings, DEFAULT_SETTINGS_FILE};

#[derive(Debug, Parser)]
#[command(name = "dtm", version, about = "Search and download Ontario lidar DTM tiles")]
struct Cli {
    /// RON settings file.
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Also write the log to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tiles and dataset versions intersecting an area.
    Search {
        #[arg(long, num_args = 4, value_names = ["XMIN", "YMIN", "XMAX", "YMAX"], allow_negative_numbers = true)]
        bbox: Vec<f64>,
        #[arg(long, default_value_t = WEB_MERCATOR)]
        srid: u32,
        #[arg(long)]
        json: bool,
    },
    /// Download, merge and save one dataset version for an area.
    Fetch {
        #[arg(long, num_args = 4, value_names = ["XMIN", "YMIN", "XMAX", "YMAX"], allow_negative_numbers = true)]
        bbox: Vec<f64>,
        #[arg(long, default_value_t = WEB_MERCATOR)]
        srid: u32,
        /// Version key as printed by `search`; defaults to the newest.
        #[arg(long)]
        version: Option<String>,
        /// selected, blend or fallback.
        #[arg(long, default_value_t = CoverageMode::SelectedOnly)]
        coverage: CoverageMode,
        /// Clip rectangle in the output spatial reference.
        #[arg(long, num_args = 4, value_names = ["XMIN", "YMIN", "XMAX", "YMAX"], allow_negative_numbers = true)]
        clip: Option<Vec<f64>>,
        /// zstd, lzma, deflate or lzw.
        #[arg(long)]
        compression: Option<String>,
        #[arg(long, short)]
        output: PathBuf,
        /// Print progress as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Report whether the GDAL tools can be run.
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let settings = load_settings(&cli.settings);
    let destination = match cli.log_file.clone().or_else(|| settings.log_file.clone()) {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    dtm_logging::initialize(destination, level);

    match run(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            dtm_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, settings: settings::AppSettings) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start tokio runtime")?;

    match cli.command {
        Command::Search { bbox, srid, json } => {
            runtime.block_on(commands::search(&settings, to_bbox(&bbox, srid), json))
        }
        Command::Fetch {
            bbox,
            srid,
            version,
            coverage,
            clip,
            compression,
            output,
            json,
        } => {
            let args = FetchArgs {
                bbox: to_bbox(&bbox, srid),
                version,
                coverage,
                clip: clip.as_deref().map(to_clip),
                compression,
                output,
                json,
            };
            runtime.block_on(commands::fetch(&settings, args))
        }
        Command::Check => runtime.block_on(commands::check(&settings)),
    }
}

// clap guarantees exactly four values.
fn to_bbox(values: &[f64], srid: u32) -> BoundingBox {
    BoundingBox::new(values[0], values[1], values[2], values[3], srid)
}

fn to_clip(values: &[f64]) -> ClipBounds {
    ClipBounds::new(values[0], values[1], values[2], values[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fetch_arguments_parse() {
        let cli = Cli::try_parse_from([
            "dtm",
            "fetch",
            "--bbox",
            "-8850000",
            "5400000",
            "-8830000",
            "5420000",
            "--coverage",
            "blend",
            "--compression",
            "zstd",
            "-o",
            "out.tif",
        ])
        .unwrap();
        match cli.command {
            Command::Fetch {
                bbox,
                coverage,
                clip,
                output,
                ..
            } => {
                assert_eq!(bbox, vec![-8_850_000.0, 5_400_000.0, -8_830_000.0, 5_420_000.0]);
                assert_eq!(coverage, CoverageMode::Blend);
                assert_eq!(clip, None);
                assert_eq!(output, PathBuf::from("out.tif"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn bad_coverage_is_rejected() {
        let result = Cli::try_parse_from([
            "dtm", "fetch", "--bbox", "0", "0", "1", "1", "--coverage", "newest", "-o", "x.tif",
        ]);
        assert!(result.is_err());
    }
}
