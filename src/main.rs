use std::process::exit;

use clap::Parser;

use kestrel::cli::Cli;
use kestrel::{compile, repl};

fn main() {
    let cli = Cli::parse();

    match &cli.file {
        Some(path) => {
            let source = match std::fs::read_to_string(path) {
                Ok(source) => source,
                Err(err) => {
                    eprintln!("Cannot read {}: {err}", path.display());
                    exit(1);
                }
            };
            if let Err(err) = compile::compile_src(&source, &cli) {
                eprintln!("Fatal: {err}");
                exit(1);
            }
        }
        None => {
            if let Err(err) = repl::run(&cli) {
                eprintln!("Fatal: {err}");
                exit(1);
            }
        }
    }
}
