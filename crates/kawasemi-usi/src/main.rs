//! Kawasemi USI front-end.

mod usi;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Kawasemi, a USI shogi engine", long_about = None)]
struct Args {
    /// Enable debug logging on stderr
    #[arg(short, long)]
    debug: bool,

    /// Evaluation network to load at startup
    #[arg(long)]
    eval_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, default_level),
    );

    usi::run(args.eval_file.as_deref())
}
