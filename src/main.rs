//! Pattern Engine CLI
//!
//! Usage:
//!   pattern-engine [OPTIONS] [TEMPLATE]
//!
//! Options:
//!   -c, --config <FILE>  Engine configuration (TOML format)
//!   -d, --data <JSON>    Render context: a JSON object or a path to a JSON file
//!   -s, --string         Treat TEMPLATE as template text (reads stdin if omitted)
//!   -e, --emit           Print the compiled program instead of rendering
//!   -n, --namespaces     List the pattern namespaces and exit
//!   -h, --help           Print help

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use pattern_engine::{Engine, EngineConfig, EngineError, NamespaceRegistry, Resolver};

#[derive(Parser)]
#[command(name = "pattern-engine")]
#[command(about = "Render Pattern Lab templates with compile-time pattern data")]
struct Cli {
    /// Template name, `@namespace/path` reference or (with --string) template text
    template: Option<String>,

    /// Engine configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Render context: a JSON object or a path to a JSON file
    #[arg(short, long)]
    data: Option<String>,

    /// Treat TEMPLATE as template text
    #[arg(short, long)]
    string: bool,

    /// Print the compiled program instead of rendering
    #[arg(short, long)]
    emit: bool,

    /// List the pattern namespaces and exit
    #[arg(short, long)]
    namespaces: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    if cli.namespaces {
        match NamespaceRegistry::build(&config.pattern_source_dir()) {
            Ok(registry) => {
                for namespace in registry.iter() {
                    println!("@{}\t{}", namespace.name, namespace.directory.display());
                }
                return;
            }
            Err(e) => {
                eprintln!("Error: {}", EngineError::from(e));
                process::exit(1);
            }
        }
    }

    let context = match &cli.data {
        Some(data) => match load_context(data) {
            Ok(context) => context,
            Err(message) => {
                eprintln!("Error loading data: {}", message);
                process::exit(1);
            }
        },
        None => Map::new(),
    };

    let template = match (&cli.template, cli.string) {
        (Some(template), _) => template.clone(),
        (None, true) => {
            let mut buffer = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut buffer) {
                eprintln!("Error reading from stdin: {}", e);
                process::exit(1);
            }
            buffer
        }
        (None, false) => {
            eprintln!("Error: a TEMPLATE is required (see --help)");
            process::exit(1);
        }
    };

    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => fail(None, &e),
    };

    let result = if cli.emit {
        let program = if cli.string {
            engine.compile_string(&template)
        } else {
            engine.compile(&template)
        };
        program.map(|program| program.to_string())
    } else if cli.string {
        engine.render_string(&template, context)
    } else {
        engine.render(&template, context)
    };

    match result {
        Ok(output) => print!("{}", output),
        Err(e) => {
            let inline = cli.string.then_some(template.as_str());
            fail(Some((&engine, inline)), &e)
        }
    }
}

/// Parse `--data` as inline JSON or read it from a file
fn load_context(data: &str) -> Result<Map<String, Value>, String> {
    let text = if data.trim_start().starts_with('{') {
        data.to_string()
    } else {
        fs::read_to_string(data).map_err(|e| format!("cannot read '{}': {}", data, e))?
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("the render context must be a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Print an error, with source context for parse errors, and exit
fn fail(engine: Option<(&Engine, Option<&str>)>, err: &EngineError) -> ! {
    if let (Some((engine, inline)), EngineError::Parse { template, errors }) = (engine, err) {
        let text = match inline {
            Some(text) if text == template => Some(text.to_string()),
            _ => engine.resolver().load(template).ok().map(|source| source.text),
        };
        if let Some(text) = text {
            for error in errors {
                eprint!("{}", error.format(&text, template));
            }
            process::exit(1);
        }
    }
    eprintln!("Error: {}", err);
    process::exit(1);
}
