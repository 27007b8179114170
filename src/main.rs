use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cfg = deepbrot::config::Config::parse();
    deepbrot::logging::init_file(cfg.log_file.as_deref())?;
    deepbrot::app::run(cfg)
}
