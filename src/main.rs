mod cli;
mod command_handler;
mod commands;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use command_handler::handle_command;
use env_logger::Env;

fn main() {
    let args = Cli::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    if let Err(e) = handle_command(args) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
