use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use colored::Colorize;
use lectern_lib::{
    Argon2Hasher, CoreConfig, Error, ListingProjector, ReconciliationEngine, Repository, Uid,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod account;
mod profile;
mod roster;

#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use this database file instead of the configured one
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Operate on researcher profiles
    #[command(subcommand)]
    Profile(profile::Command),
    /// Operate on login accounts
    #[command(subcommand)]
    Account(account::Command),
    /// Remove a profile, or hide an account, by id
    Remove { id: u64 },
    /// Print the public roster
    Roster,
    /// Write a timestamped copy of the database
    Backup {
        /// Directory to write the backup into
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    // Human friendly panicking in release mode
    human_panic::setup_panic!();

    // Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();

    let mut cfg = match CoreConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{} failed to load configuration: {err}", "error:".red().bold());
            return sysexits::ExitCode::Config.into();
        }
    };
    if let Some(path) = cli.database {
        cfg.database_path = Some(path);
    }

    let repo = match Repository::new(cfg.into_handle()) {
        Ok(repo) => repo,
        Err(err) => {
            eprintln!("{} failed to open database: {err}", "error:".red().bold());
            return sysexits::ExitCode::IoErr.into();
        }
    };
    let engine = ReconciliationEngine::new(repo.clone(), Arc::new(Argon2Hasher::new()));

    let result = match &cli.command {
        Command::Profile(cmd) => profile::handle(&engine, cmd),
        Command::Account(cmd) => account::handle(&engine, cmd),
        Command::Remove { id } => engine.delete_entity(Uid::from(*id)).map(|outcome| {
            println!("{}", outcome.message());
        }),
        Command::Roster => roster::handle(&ListingProjector::new(repo.clone())),
        Command::Backup { dir } => repo.backup(dir).map_err(Error::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            exit_code(&err).into()
        }
    }
}

fn exit_code(err: &Error) -> sysexits::ExitCode {
    match err.status_code() {
        400 => sysexits::ExitCode::DataErr,
        404 => sysexits::ExitCode::NoInput,
        409 => sysexits::ExitCode::CantCreat,
        _ => sysexits::ExitCode::Software,
    }
}
