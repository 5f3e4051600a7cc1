//! Compute audio features for every `.wav` file under a directory.
//!
//! Each file is decoded, the full built-in feature set is computed, and the
//! result is written beside the audio as `<stem>.features.json`. Unreadable
//! files are skipped with a warning so one bad recording never aborts a
//! batch.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use segcap::features::{FeatureConfig, FeatureExtractor, FeatureRegistry};
use segcap::wav;

#[derive(Debug, Parser)]
#[command(about = "Compute audio features for every .wav under a directory", version)]
struct Args {
    /// Root directory searched for .wav files
    #[arg(short, long)]
    dir: PathBuf,

    /// Maximum search depth below the root (-1 = unlimited)
    #[arg(short, long, default_value_t = -1)]
    level: i64,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    if !args.dir.is_dir() {
        bail!("--dir must name an existing directory, got {}", args.dir.display());
    }

    let extractor = FeatureExtractor::new(FeatureRegistry::builtin());
    let config = FeatureConfig::all();

    let mut walker = WalkDir::new(&args.dir);
    if args.level >= 0 {
        walker = walker.max_depth(args.level as usize + 1);
    }

    let mut processed = 0_usize;
    for entry in walker.into_iter().filter_map(|entry| entry.ok()) {
        if !entry.file_type().is_file() || !is_wav(entry.path()) {
            continue;
        }
        let path = entry.path();
        let segment = match wav::read_segment(path) {
            Ok(segment) => segment,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable file");
                continue;
            }
        };
        let features = extractor
            .compute(&segment, &config)
            .with_context(|| format!("feature extraction failed for {}", path.display()))?;

        let out = path.with_extension("features.json");
        fs::write(&out, serde_json::to_string_pretty(&features)?)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!(path = %out.display(), "features written");
        processed += 1;
    }

    info!(processed, "feature extraction complete");
    Ok(())
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
