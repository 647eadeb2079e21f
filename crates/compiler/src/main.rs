//! nic compiler CLI.
//!
//! One mandatory positional source file; diagnostics go to stderr, the
//! object image goes next to the source (or to `-o`). `-v` prints
//! compilation statistics, `-vv` adds postfix and statement dumps.

use clap::{ArgAction, CommandFactory, Parser as ClapParser};
use clap_complete::{generate, Shell};
use nicc::{format_diagnostics, CompilerConfig, PoolReport};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "nicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "nic compiler - compile .nic programs to object files", long_about = None)]
struct Cli {
    /// Input .nic source file
    input: Option<PathBuf>,

    /// Verbose diagnostics (-v statistics, -vv adds postfix and statement dumps)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Object file path (defaults to the source path with "ic" appended)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Custom lint configuration (TOML), merged over the defaults
    #[arg(long, value_name = "PATH")]
    lint_config: Option<PathBuf>,

    /// Generate a shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "nicc", &mut io::stdout());
        return;
    }

    let Some(input) = cli.input else {
        eprintln!("Error: no input file given");
        process::exit(2);
    };

    let config = CompilerConfig {
        verbosity: cli.verbose,
        output: cli.output,
        lint_config: cli.lint_config,
    };

    let outcome = match nicc::compile_file(&input, &config) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    eprint!(
        "{}",
        format_diagnostics(&outcome.compilation.diagnostics)
    );

    if config.verbosity >= 1 {
        eprintln!("{}", outcome.compilation.stats);
        eprintln!("{}", PoolReport::measure(&outcome.compilation.program));
    }
    if config.verbosity >= 2 {
        eprint!("{}", nicc::codegen::dump_postfix(&outcome.compilation.program));
        eprint!(
            "{}",
            nicc::codegen::dump_statements(&outcome.compilation.program)
        );
    }

    match outcome.object_path {
        Some(path) => println!("Compiled {} -> {}", input.display(), path.display()),
        None => process::exit(1),
    }
}
