use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use accum_rs::{config, Machine};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run a binary image on the accumulator-machine model"
)]
struct Opts {
    /// Run configuration (key: value lines)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Binary image produced by the translator
    #[arg(value_name = "BINARY")]
    binary: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let cfg = config::load_config(&opts.config)?;

    let mut machine = Machine::from_config(cfg)?;
    machine.load_binary(&opts.binary)?;
    machine.run()?;

    tracing::info!(ticks = machine.ticks(), hash = %machine.log_hash_hex(), "halted");
    Ok(())
}
