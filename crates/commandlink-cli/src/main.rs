//! commandlink - issue relay tokens and drive remote minions.
//!
//! `run` executes a single command and closes any session it opened;
//! `shell` keeps sessions open across commands typed line by line.

mod cli;
mod config;
mod records;
mod router;
mod vault;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use commandlink_sdk::ConnectionRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ShellLine};
use config::RemoteConfig;
use router::{CommandRouter, Dispatch};
use vault::FileVault;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = RemoteConfig::from_env();
    if let Some(path) = cli.vault {
        config.vault_path = path;
    }
    if let Some(path) = cli.user_key {
        config.user_key_path = Some(path);
    }

    let user_key = config
        .user_key_path
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("reading user key {}", path.display()))
        })
        .transpose()?;
    let vault = FileVault::open(&config.vault_path)
        .with_context(|| format!("opening vault {}", config.vault_path.display()))?;
    info!(vault = %vault.path().display(), "vault loaded");

    let registry = Arc::new(ConnectionRegistry::websocket(config.read_timeout));
    let router = CommandRouter::new(config, vault, registry).with_user_key(user_key);

    let outcome = match cli.command {
        Commands::Run(args) => router.execute(&args).await.map(print).map_err(Into::into),
        Commands::Shell => shell(&router).await,
    };
    router.close_all().await;
    outcome
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn print(dispatch: Dispatch) {
    if let Dispatch::Done(lines) = dispatch {
        for line in lines {
            println!("{line}");
        }
    }
}

async fn shell(router: &CommandRouter<FileVault>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("remote> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["quit" | "q"] => return Ok(()),
            ["sessions"] => {
                for login in router.registry().logins().await {
                    println!("{login}");
                }
                continue;
            }
            _ => {}
        }

        match ShellLine::try_parse_from(words) {
            Ok(parsed) => match router.execute(&parsed.args).await {
                Ok(dispatch) => print(dispatch),
                Err(e) => error!(error = %e, "command failed"),
            },
            Err(e) => {
                // Also covers --help.
                if let Err(io) = e.print() {
                    warn!(error = %io, "could not print usage");
                }
            }
        }
    }
}
