mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "overlay")]
#[command(about = "Evaluate and check overlay definition trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (defaults to ./overlay.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging, repeatable (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the JSON rendering of an evaluation
    Eval {
        /// Directories or source files, mounted together
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Dotted property path to render, e.g. `server.tls`
        #[arg(long)]
        path: Option<String>,

        /// Root keyword argument `name=value`; values are YAML scalars
        #[arg(long = "arg", value_parser = commands::parse_argument)]
        arguments: Vec<(String, overlay::Primitive)>,

        /// Scope nesting rendered before printing `null`
        #[arg(long, default_value = "16")]
        depth: usize,
    },

    /// Run the totality checker
    Check {
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Depth bound for recursive structures (overrides the config file)
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// List the property names of an evaluation
    Keys {
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        #[arg(long)]
        path: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Eval {
            roots,
            path,
            arguments,
            depth,
        } => {
            commands::eval(config, &roots, path.as_deref(), arguments, depth)?;
        }

        Commands::Check { roots, max_depth } => {
            commands::check(config, &roots, max_depth)?;
        }

        Commands::Keys { roots, path } => {
            commands::keys(config, &roots, path.as_deref())?;
        }
    }

    Ok(())
}
