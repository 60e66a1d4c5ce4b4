//! edgarsync CLI: run, watch, status, reset.

use anyhow::Result;
use clap::Parser;
use edgarsync::engine::{Cli, dispatch};
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    dispatch(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
