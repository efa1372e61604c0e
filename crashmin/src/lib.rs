pub mod cli;
mod config;
mod runner;

use anyhow::Context;

pub use crate::config::{RunConfig, TargetConfig};
pub use runner::{run, Summary};

pub fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let opt = cli::Arguments::parse();

    // init log config
    common::log::init_log(&opt.log_config)?;
    log::trace!("Args: {:#?}", opt);

    // create config from cli args
    let config =
        RunConfig::from_cli(opt).context("Failed to create minimizer config from arguments")?;
    log::trace!("config = {:#?}", config);

    // minimize crash
    run(config)
        .map(|_| ())
        .context("Failed to minimize crash")
        .map_err(|e| {
            log::error!("{:?}", e);
            e
        })
}
