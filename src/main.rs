use anyhow::{bail, Context, Result};
use clap::Parser;
use scan_scaler::{find_scans, scale_scans, Conversion};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scan-scaler")]
#[command(about = "Rescale OBJ and PLY scans from one unit of length to another")]
#[command(version)]
struct Cli {
    /// Scan file or directory of scans to scale
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Incoming unit of measurement
    #[arg(short, long, default_value = "m")]
    in_unit: String,

    /// Outgoing unit of measurement
    #[arg(short, long, default_value = "mm")]
    out_unit: String,

    /// Recurse through child directories and process all scans
    #[arg(short, long)]
    recurse: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// `--verbose` forces debug output, otherwise `RUST_LOG` decides and
/// falls back to `info`.
fn log_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    if verbose {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let conversion = Conversion::new(&cli.in_unit, &cli.out_unit)
        .with_context(|| format!("Cannot convert '{}' to '{}'", cli.in_unit, cli.out_unit))?;
    if !cli.path.exists() {
        bail!("Path does not exist: {}", cli.path.display());
    }

    let scans = find_scans(&cli.path, cli.recurse)
        .with_context(|| format!("Failed to search for scans in {}", cli.path.display()))?;
    println!(
        "Scaling from '{}' to '{}' (Factor: {})",
        cli.in_unit,
        cli.out_unit,
        conversion.factor()
    );
    println!("Discovered {} scan(s)\n", scans.len());

    let reports = scale_scans(&scans, &conversion);
    let mut failures = 0;
    for report in &reports {
        match &report.outcome {
            Ok(_) => println!("Scaled: {}", report.source.display()),
            Err(error) if error.is_recoverable() => {
                failures += 1;
                eprintln!("Failed: {}: {}", report.source.display(), error);
            }
            Err(error) => bail!("{}: {}", report.source.display(), error),
        }
    }

    if failures > 0 {
        bail!("{} of {} scan(s) could not be scaled", failures, reports.len());
    }
    Ok(())
}
