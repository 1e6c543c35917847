use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use sfm_core::RunConfig;
use sfm_pipeline::{RunContext, RunReport, Toolchain, run_pipeline};

/// Sparse reconstruction pipeline: retrieval, local features, matching,
/// incremental mapping with exhaustive fallback, and undistortion.
///
/// The output directory must not be used by another run at the same time.
#[derive(Debug, Parser)]
#[command(author, version, about = "Retrieval-based structure-from-motion pipeline")]
struct Args {
    /// Directory holding the input images.
    #[arg(long)]
    images: Option<PathBuf>,

    /// Directory receiving every artifact of the run.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Optional JSON RunConfig. Command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// COLMAP executable used for the fallback, undistortion and statistics.
    #[arg(long, default_value = "colmap")]
    colmap: PathBuf,

    /// Python interpreter with hloc installed.
    #[arg(long, default_value = "python3")]
    python: PathBuf,

    /// Number of retrieved neighbours per image (K).
    #[arg(long)]
    num_matched: Option<usize>,

    /// Longest image side for local feature extraction.
    #[arg(long)]
    resize_max: Option<u32>,

    /// Longest side of the undistorted images.
    #[arg(long)]
    max_image_size: Option<u32>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_json_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

fn build_config(args: &Args) -> Result<RunConfig> {
    let mut config = match (&args.config, &args.images, &args.output) {
        (Some(path), _, _) => load_config(path)?,
        (None, Some(images), Some(output)) => RunConfig::new(images, output),
        (None, _, _) => bail!("--images and --output are required without --config"),
    };

    if let Some(images) = &args.images {
        config.image_dir = images.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(k) = args.num_matched {
        config.retrieval.num_matched = k;
    }
    if let Some(resize_max) = args.resize_max {
        config.features.resize_max = resize_max;
    }
    if let Some(size) = args.max_image_size {
        config.undistort.max_image_size = size;
    }

    config.validate()?;
    Ok(config)
}

fn run_from_args(args: &Args) -> Result<RunReport> {
    let config = build_config(args)?;
    info!(
        "reconstructing {} into {}",
        config.image_dir.display(),
        config.output_dir.display()
    );
    let tools = Toolchain::external(&args.python, &args.colmap);
    let mut ctx = RunContext::new(config)?;
    run_pipeline(&mut ctx, &tools)
}

fn print_summary(report: &RunReport) {
    println!("Timing Information:");
    println!("{}", "-".repeat(40));
    for stage in &report.stages {
        println!("{}: {:.2} seconds", stage.label, stage.elapsed_s);
    }
    println!("Total: {:.2} seconds", report.total_s);
    if !report.errors.is_empty() {
        println!("\nErrors:");
        for err in &report.errors {
            println!("  {err}");
        }
    }
    println!("\nReport: {}", report.markdown_path.display());
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let report = run_from_args(&args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}
