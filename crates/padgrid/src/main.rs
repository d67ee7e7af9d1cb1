//! Binary entrypoint for the padgrid CLI.

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use config::{PALETTE, Profile};
use padgrid_engine::Result;
use tracing::error;

mod loopback;

#[derive(Parser, Debug)]
#[command(name = "padgrid", about = "Pad-grid to keyboard action mapper", version)]
/// Command-line interface for the `padgrid` binary.
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// Logging controls
    #[command(flatten)]
    log: logging::LogArgs,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Load and validate a profile then exit.
    Check {
        /// Path to the profile JSON file
        path: PathBuf,

        /// Dump the parsed profile back to stdout as JSON
        #[arg(long)]
        dump: bool,
    },
    /// List the device LED palette.
    Palette,
    /// Drive a profile against an in-memory loopback transport.
    ///
    /// Key injections are printed to stdout instead of being sent to the
    /// OS, and pads are pressed by typing commands.
    Emulate {
        /// Path to the profile JSON file
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_subscriber(&cli.log.spec());
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Check { path, dump } => check(&path, dump),
        Command::Palette => {
            for entry in PALETTE {
                let (r, g, b) = entry.rgb;
                println!(
                    "{:<14} velocity {:>3}  #{r:02X}{g:02X}{b:02X}",
                    entry.name, entry.velocity
                );
            }
            Ok(())
        }
        Command::Emulate { path } => {
            let profile = load_profile(&path)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(loopback::run(profile))
        }
    }
}

fn load_profile(path: &Path) -> Result<Profile> {
    let raw = fs::read_to_string(path)?;
    Ok(Profile::from_json(&raw)?)
}

fn check(path: &Path, dump: bool) -> Result<()> {
    let profile = load_profile(path)?;
    let mappings: usize = profile.layers.values().map(|l| l.len()).sum();
    println!(
        "profile \"{}\" OK: {} layer(s), {} mapping(s), base layer \"{}\"",
        profile.name,
        profile.layers.len(),
        mappings,
        profile.base_layer
    );
    if dump {
        println!("{}", profile.to_json()?);
    }
    Ok(())
}
