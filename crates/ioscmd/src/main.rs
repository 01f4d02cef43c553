use anyhow::Result;
use clap::Parser;
use ioscmd::commands::{self, Target};
use ioscmd::{Cli, Settings};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let settings = Settings::load(&cli.global.overrides())?;
    let target = Target::new(&cli.global, settings);

    let code = commands::run(cli.command, &target)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
