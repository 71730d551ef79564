mod cmd;
mod parser;

use clap::{CommandFactory, Parser};
use clap_complete::CompleteEnv;
use tracing_subscriber::EnvFilter;

use crate::parser::{Args, Command};

fn main() {
    CompleteEnv::with_factory(Args::command).complete();
    let args = Args::parse();

    let filter = args
        .log
        .clone()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::from_default_env());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let result = match args.command {
        Command::Ls { url, long } => rt.block_on(cmd::fs::ls(&mut std::io::stdout(), &url, long)),
        Command::Cat { url, start, end } => {
            rt.block_on(cmd::fs::cat(&mut std::io::stdout(), &url, start, end))
        }
        Command::Pipe { url } => rt.block_on(cmd::fs::pipe(&url)),
        Command::Cp {
            src,
            dst,
            recursive,
            max_depth,
            auto_mkdir,
        } => rt.block_on(cmd::fs::cp(&src, &dst, recursive, max_depth, auto_mkdir)),
        Command::Mv {
            src,
            dst,
            recursive,
        } => rt.block_on(cmd::fs::mv(&src, &dst, recursive)),
        Command::Rm {
            urls,
            recursive,
            max_depth,
        } => rt.block_on(cmd::fs::rm(&urls, recursive, max_depth)),
        Command::Du { url, max_depth } => {
            rt.block_on(cmd::fs::du(&mut std::io::stdout(), &url, max_depth))
        }
        Command::Glob { pattern } => rt.block_on(cmd::fs::glob(&mut std::io::stdout(), &pattern)),
        Command::Info { url } => rt.block_on(cmd::fs::info(&mut std::io::stdout(), &url)),
        Command::Protocols => cmd::fs::protocols(&mut std::io::stdout()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
