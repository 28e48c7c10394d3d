use std::path::PathBuf;

use em_core::prelude::*;
use serde_json::{
    Map,
    Value,
};

use crate::output::{
    render,
    OutputFormat,
};
use crate::scenario::Scenario;

#[derive(clap::Args)]
pub struct Args {
    #[arg(help = "path to a YAML scenario file")]
    pub scenario: PathBuf,

    #[arg(long, value_enum, default_value = "yaml", help = "format of the normalized configs")]
    pub format: OutputFormat,
}

/// Print each node's config exactly as the registry would apply it.  Malformed or out-of-range
/// fields show up as their defaults (and are logged at `warn`).
pub fn cmd(args: &Args) -> EmptyResult {
    let scenario = Scenario::load(&args.scenario)?;
    let mut resolved = Map::new();
    for (id, config) in scenario.resolved_configs()? {
        resolved.insert(id, serde_json::to_value(config)?);
    }
    println!("{}", render(&Value::Object(resolved), args.format)?);
    Ok(())
}
