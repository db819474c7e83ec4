//! framegrab - interactive capture session
//!
//! Loads the capture configuration, connects the configured frame source,
//! and runs the operator command loop on stdin/stdout. Only a failure to
//! build and connect the initial source terminates the process; everything
//! after that is reported per cycle and the loop continues.

use std::io::{stdin, stdout};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use framegrab::{config::CaptureConfig, pipeline::Pipeline, session, source, SourceKind};

#[derive(Debug, Parser)]
#[command(name = "framegrab", about = "Operator-driven still capture")]
struct Args {
    /// Path to a JSON config file (also: FRAMEGRAB_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured source backend ('live' or 'still').
    #[arg(long)]
    source: Option<SourceKind>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CaptureConfig::load(args.config.as_deref()).context("load configuration")?;
    if let Some(kind) = args.source {
        cfg.source = kind;
    }

    let pipeline = Pipeline::from_config(&cfg).context("build capture pipeline")?;
    let mut source = source::from_config(&cfg);
    source
        .connect()
        .with_context(|| format!("connect {} source", cfg.source))?;

    log::info!("source initialized: {}", cfg.source);
    log::info!("saving captures under {}", cfg.save_dir.display());
    match &cfg.upload {
        Some(upload) => log::info!("upload endpoint: {}", upload.url),
        None => log::info!("no upload endpoint configured"),
    }

    let result = session::run(source.as_mut(), &pipeline, stdin().lock(), stdout());
    source.disconnect();
    result.context("session loop")?;
    Ok(())
}
