use clap::Parser;

use bootmon::cli::{run, Cli};

fn main() {
    if let Err(err) = try_main(Cli::parse()) {
        eprintln!("{:#}", err);
        std::process::exit(2);
    }
}

fn try_main(cli: Cli) -> anyhow::Result<()> {
    bootmon::logger::Logger::init().unwrap();

    match cli.verbose {
        0 => log::set_max_level(log::LevelFilter::Error),
        1 => log::set_max_level(log::LevelFilter::Warn),
        2 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    run(cli)
}
