// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use log::error;
use pbfstream::Entity;

#[derive(Debug, thiserror::Error)]
#[error("{0}: {1}")]
struct OpenError(PathBuf, #[source] std::io::Error);

#[derive(Parser)]
struct Cli {
    /// Path to the .osm.pbf file
    pbf_file: PathBuf,

    /// Number of decoder worker threads
    #[arg(short, long, default_value_t = 4)]
    workers: usize,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    colog::init();
    let cli = Cli::parse();

    let file = File::open(&cli.pbf_file).map_err(|e| OpenError(cli.pbf_file.clone(), e))?;
    let decoder = pbfstream::Decoder::new(file);
    decoder.start(cli.workers)?;

    let mut nodes = 0u64;
    let mut ways = 0u64;
    let mut relations = 0u64;

    for entity in &decoder {
        match entity {
            Ok(Entity::Node(_)) => nodes += 1,
            Ok(Entity::Way(_)) => ways += 1,
            Ok(Entity::Relation(_)) => relations += 1,
            Err(e) => {
                error!("decoding failed: {e}");
                return Err(e.into());
            }
        }
    }

    println!("nodes: {nodes}");
    println!("ways: {ways}");
    println!("relations: {relations}");

    Ok(())
}
