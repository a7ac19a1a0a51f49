use clap::Parser;
use predledger::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
