use std::fs;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use vsi::{Environment, Grammar, Interpreter, LexError, Lexer, RuntimeError, SyntaxError};

#[derive(Parser, Debug)]
#[command(version, about = "very simple interpreter")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every token of a file, one per line
    Tokenize { filename: PathBuf },
    /// Print the syntax tree of every top-level statement
    Parse { filename: PathBuf },
    /// Run a program
    Run { filename: PathBuf },
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    // Only initialize if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

/// Reports a pipeline failure the way the language defines it and exits.
fn fail(e: miette::Report) -> miette::Result<()> {
    let (kind, code) = if e.downcast_ref::<LexError>().is_some() {
        ("LexError", 65)
    } else if e.downcast_ref::<SyntaxError>().is_some() {
        ("SyntaxError", 65)
    } else if e.downcast_ref::<RuntimeError>().is_some() {
        ("RuntimeError", 70)
    } else {
        return Err(e);
    };
    eprintln!("{kind}: {e}");
    eprintln!("{e:?}");
    std::process::exit(code);
}

fn main() -> miette::Result<()> {
    init_tracing();
    let args = Args::parse();

    let (Commands::Tokenize { filename }
    | Commands::Parse { filename }
    | Commands::Run { filename }) = &args.command;
    let file_contents = fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;
    let name = filename.to_str();
    let grammar = Grammar::default();

    let result = match &args.command {
        Commands::Tokenize { .. } => {
            Lexer::new(&grammar, name, &file_contents)
                .tokenize()
                .map(|tokens| {
                    for token in tokens {
                        println!("{token}");
                    }
                })
        }
        Commands::Parse { .. } => vsi::Parser::from_source(&grammar, name, &file_contents)
            .and_then(vsi::Parser::parse)
            .map(|program| {
                for statement in &program {
                    println!("{statement}");
                }
            }),
        Commands::Run { .. } => vsi::Parser::from_source(&grammar, name, &file_contents)
            .and_then(vsi::Parser::parse)
            .and_then(|program| {
                let mut environment = Environment::new();
                Interpreter::new(&mut environment).interpret(&program)
            }),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => fail(e),
    }
}
