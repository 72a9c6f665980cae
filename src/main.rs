use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod cli;

use cli::command::RunCommand;
use cli::exit::ExitCommand;
use cli::extract::ExtractCommand;
use cli::inject::InjectCommand;
use cli::targets::TargetsCommand;

#[derive(Parser)]
#[command(name = "twopence")]
#[command(about = "Run commands and transfer files on a system under test", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Command(RunCommand),
    Inject(InjectCommand),
    Extract(ExtractCommand),
    Exit(ExitCommand),
    Targets(TargetsCommand),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::Command(cmd) => cmd.execute(),
        Commands::Inject(cmd) => cmd.execute().map(|()| ExitCode::SUCCESS),
        Commands::Extract(cmd) => cmd.execute().map(|()| ExitCode::SUCCESS),
        Commands::Exit(cmd) => cmd.execute().map(|()| ExitCode::SUCCESS),
        Commands::Targets(cmd) => cmd.execute().map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
