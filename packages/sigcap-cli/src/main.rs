use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod logging;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_file = logging::init(cli.verbose);

    let exit_code = match cli.command {
        cli::Command::Record(args) => commands::record::execute(args, log_file).await,
        cli::Command::Discover(args) => commands::discover::execute(args).await,
        cli::Command::Kinds(args) => commands::kinds::execute(args),
    };

    log::logger().flush();
    std::process::exit(exit_code);
}
