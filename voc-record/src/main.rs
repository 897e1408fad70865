use anyhow::Result;
use std::env;
use structopt::StructOpt;
use voc_record::config::Args;

pub fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    // parse arguments
    let config = Args::from_args().into_config()?;

    // convert the dataset
    let report = voc_record::run(&config)?;
    report.print_summary();

    Ok(())
}
