#![deny(
    // Strict on purpose: an exception has to be spelled out as an inline allow, which flags it for a
    // second look in review.
    clippy::nursery,
    clippy::pedantic,
)]
#![warn(missing_docs)]
//! `emctl`: run emulation engine scenarios from the command line.
//!
//! A scenario is a YAML file listing diagram nodes and their configs; `emctl run` registers them,
//! drives the simulation clock, and prints every node's final metrics snapshot.

mod completions;
mod kinds;
mod output;
mod run;
mod scenario;
mod validate;

use clap::{
    crate_version,
    CommandFactory,
    Parser,
    Subcommand,
};
use em_core::prelude::*;

#[derive(Parser)]
#[command(
    about = "command-line app for running emulation engine scenarios",
    version,
    propagate_version = true
)]
struct EmCommandRoot {
    #[command(subcommand)]
    subcommand: EmSubcommand,

    #[arg(short, long, default_value = "warn", help = "log level / tracing filter")]
    verbosity: String,
}

#[derive(Subcommand)]
enum EmSubcommand {
    #[command(about = "generate shell completions for emctl")]
    Completions(completions::Args),

    #[command(about = "list the supported component kinds and their aliases")]
    Kinds,

    #[command(about = "register a scenario's nodes, drive the clock, and print the final snapshots")]
    Run(run::Args),

    #[command(about = "parse and normalize every node config in a scenario")]
    Validate(validate::Args),

    #[command(about = "print emctl version")]
    Version,
}

#[tokio::main]
async fn main() -> EmptyResult {
    let args = EmCommandRoot::parse();
    em_core::logging::setup(&args.verbosity);

    match &args.subcommand {
        EmSubcommand::Completions(args) => completions::cmd(args, EmCommandRoot::command()),
        EmSubcommand::Kinds => kinds::cmd(),
        EmSubcommand::Run(args) => run::cmd(args).await,
        EmSubcommand::Validate(args) => validate::cmd(args),
        EmSubcommand::Version => {
            println!("emctl {}", crate_version!());
            Ok(())
        },
    }
}
