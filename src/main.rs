use std::{
    fs::File,
    io::{self, BufReader, Write},
    path::PathBuf,
    process,
};

use clap::{Parser, Subcommand};
use thiserror::Error;
use token_sale::{
    config::{ConfigError, SaleConfig},
    ledger::Amount,
    replay::{parse_script, Replay, ReplayError},
};

/// 21 million tokens.
const DEFAULT_SUPPLY: Amount = 21_000_000;

#[derive(Parser)]
#[command(name = "token-sale", version, about = "Fixed-price token sale with time-locked claims")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines operation script against a fresh sale and print
    /// one JSON outcome per operation followed by a summary.
    Replay {
        /// Sale configuration (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Operation script (JSON lines).
        #[arg(long)]
        script: PathBuf,
        /// Total token supply issued to the deployer.
        #[arg(long, default_value_t = DEFAULT_SUPPLY)]
        supply: Amount,
        /// Tokens moved into the sale account; defaults to the whole supply.
        #[arg(long)]
        inventory: Option<Amount>,
        #[arg(long, default_value = "deployer")]
        deployer: String,
        /// Starting timestamp of the replay clock (UNIX seconds).
        #[arg(long, default_value_t = 0)]
        start: u64,
    },
    /// Write a default sale configuration.
    InitConfig {
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Replay(#[from] ReplayError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("token-sale failed: {err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Replay {
            config,
            script,
            supply,
            inventory,
            deployer,
            start,
        } => {
            let config = SaleConfig::load(&config)?;
            let ops = parse_script(BufReader::new(File::open(&script)?))?;
            let replay = Replay::new(&config, supply, inventory.unwrap_or(supply), &deployer, start)?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            for (line, op) in &ops {
                let outcome = replay.apply(*line, op);
                serde_json::to_writer(&mut out, &outcome)?;
                writeln!(out)?;
            }
            serde_json::to_writer_pretty(&mut out, &replay.summary())?;
            writeln!(out)?;
            Ok(())
        }
        Command::InitConfig { out } => {
            SaleConfig::default().save(&out)?;
            eprintln!("wrote {}", out.display());
            Ok(())
        }
    }
}
