use std::io;

use clap_complete::{
    generate,
    Shell,
};
use em_core::prelude::*;

#[derive(clap::Args)]
pub struct Args {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn cmd(args: &Args, mut cmd: clap::Command) -> EmptyResult {
    generate(args.shell, &mut cmd, "emctl", &mut io::stdout());
    Ok(())
}
