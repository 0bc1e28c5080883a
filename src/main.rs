use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use rootcause::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use mdlunpack::mdl::{DecodeConfig, DecodedModel, decode_model_file};

/// Decode KPKy model containers and report what they hold.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Container files, or directories to scan for .mdl files.
    inputs: Vec<PathBuf>,

    /// Print each decoded model as JSON instead of a summary.
    #[clap(long)]
    json: bool,

    /// Directory searched for textures instead of each container's own.
    #[clap(long)]
    texture_dir: Option<PathBuf>,

    /// Do not resolve texture paths.
    #[clap(long)]
    skip_textures: bool,

    /// Resolve only the albedo slot of each material.
    #[clap(long)]
    albedo_only: bool,

    /// Force the vertex dedup pass on or off instead of the platform default.
    #[clap(long)]
    optimize: Option<bool>,

    /// Sampler role to skip, replacing the platform defaults. May repeat.
    #[clap(long = "ignore-role")]
    ignore_role: Option<Vec<String>>,

    /// More logging; repeat for more detail.
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Report> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    // logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut files = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            for entry in
                fs::read_dir(input).context_with(|| format!("could not list {}", input.display()))?
            {
                let path = entry.context("could not read directory entry")?.path();
                if path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mdl"))
                {
                    files.push(path);
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(rootcause::report!("no .mdl containers to decode"));
    }

    let config = DecodeConfig::builder()
        .maybe_texture_dir(args.texture_dir.clone())
        .skip_textures(args.skip_textures)
        .albedo_only(args.albedo_only)
        .maybe_optimize(args.optimize)
        .maybe_ignored_roles(args.ignore_role.clone())
        .build();

    let bar = ProgressBar::new(files.len() as u64);
    let results: Vec<(PathBuf, Result<DecodedModel, Report>)> = files
        .into_par_iter()
        .progress_with(bar)
        .map(|path| {
            let result = decode_model_file(&path, &config);
            (path, result)
        })
        .collect();

    let mut failures = 0usize;
    for (path, result) in results {
        match result {
            Ok(model) => {
                if args.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&model).context("could not serialize model")?
                    );
                } else {
                    print_summary(&path, &model);
                }
            }
            Err(report) => {
                failures += 1;
                eprintln!("{}: {report:?}", path.display());
            }
        }
    }
    if failures > 0 {
        return Err(rootcause::report!(
            "{failures} container(s) failed to decode"
        ));
    }
    Ok(())
}

fn print_summary(path: &Path, model: &DecodedModel) {
    println!(
        "{}: {} \"{}\", {} primitive(s), {} material(s), {} bone(s)",
        path.display(),
        model.platform,
        model.model_name,
        model.primitives.len(),
        model.materials.len(),
        model.bones.len(),
    );
    let vertices: usize = model.primitives.iter().map(|p| p.positions.len()).sum();
    let triangles: usize = model.primitives.iter().map(|p| p.triangles.len()).sum();
    println!("  {vertices} vertices, {triangles} triangles");
    for anomaly in &model.anomalies {
        println!("  anomaly: {anomaly}");
    }
}
